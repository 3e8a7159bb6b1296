use regex::RegexBuilder;
use std::collections::HashMap;

/// Smart-quote/apostrophe characters stripped from a title's start
/// before and after article removal.
const IGNORE_STARTS: &[char] = &['\'', '"', '\u{2018}', '\u{2019}', '\u{201A}', '\u{201B}', '\u{201C}', '\u{201D}', '\u{2032}', '\u{2033}'];

/// Per-language leading-article list keyed by canonical language code.
/// English is the default and is always present even if the caller
/// never registers it.
pub struct ArticleTable {
    by_lang: HashMap<String, Vec<String>>,
}

impl ArticleTable {
    pub fn new() -> Self {
        let mut by_lang = HashMap::new();
        by_lang.insert("eng".to_string(), vec!["A".to_string(), "The".to_string(), "An".to_string()]);
        ArticleTable { by_lang }
    }

    pub fn set_articles(&mut self, lang: &str, articles: Vec<String>) {
        self.by_lang.insert(lang.to_string(), articles);
    }

    fn articles_for(&self, lang: Option<&str>) -> &[String] {
        lang.and_then(|l| self.by_lang.get(l))
            .unwrap_or_else(|| self.by_lang.get("eng").expect("eng default always present"))
    }
}

impl Default for ArticleTable {
    fn default() -> Self {
        Self::new()
    }
}

/// How titles (and, by the same routine, series names) are sorted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleSortOrder {
    /// Move a recognized leading article to the end after a comma.
    MoveArticleToEnd,
    /// Return the title unchanged; for corpora where article-stripping
    /// is linguistically wrong.
    StrictlyAlphabetic,
}

/// Compute the sort key for a title: strip a leading smart quote, move
/// a recognized leading article (per-language, default English {A,
/// The, An}) to the end after a comma, then strip a newly-exposed
/// leading smart quote again.
pub fn title_sort(title: &str, order: TitleSortOrder, lang: Option<&str>, articles: &ArticleTable) -> String {
    let title = title.trim();
    if order == TitleSortOrder::StrictlyAlphabetic {
        return title.to_string();
    }
    let mut title = strip_leading_ignore_start(title);

    let pat = compile_article_pattern(articles.articles_for(lang));
    if let Some(m) = pat.find(&title) {
        if m.start() == 0 {
            let prep = m.as_str();
            let prep_len = prep.len();
            let rest = &title[prep_len..];
            title = format!("{}, {}", rest, prep.trim_end());
            title = strip_leading_ignore_start(&title);
        }
    }
    title.trim().to_string()
}

fn strip_leading_ignore_start(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if IGNORE_STARTS.contains(&c) => chars.as_str().to_string(),
        _ => s.to_string(),
    }
}

fn compile_article_pattern(articles: &[String]) -> regex::Regex {
    let joined = articles.iter().map(|a| regex::escape(a)).collect::<Vec<_>>().join("|");
    let pattern = format!(r"^({joined})\s+");
    RegexBuilder::new(&pattern).case_insensitive(true).build().expect("article pattern always compiles")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_the_article() {
        let articles = ArticleTable::new();
        assert_eq!(title_sort("The Expanse", TitleSortOrder::MoveArticleToEnd, None, &articles), "Expanse, The");
    }

    #[test]
    fn leaves_titles_without_an_article_alone() {
        let articles = ArticleTable::new();
        assert_eq!(title_sort("Foundation", TitleSortOrder::MoveArticleToEnd, None, &articles), "Foundation");
    }

    #[test]
    fn strictly_alphabetic_mode_is_a_no_op() {
        let articles = ArticleTable::new();
        assert_eq!(title_sort("The Road", TitleSortOrder::StrictlyAlphabetic, None, &articles), "The Road");
    }

    #[test]
    fn strips_leading_smart_quote_around_the_article() {
        let articles = ArticleTable::new();
        assert_eq!(title_sort("\u{2018}The Exile", TitleSortOrder::MoveArticleToEnd, None, &articles), "Exile, The");
    }

    #[test]
    fn custom_language_article_list_is_honored() {
        let mut articles = ArticleTable::new();
        articles.set_articles("spa", vec!["El".to_string(), "La".to_string(), "Los".to_string()]);
        assert_eq!(title_sort("La Casa", TitleSortOrder::MoveArticleToEnd, Some("spa"), &articles), "Casa, La");
    }
}
