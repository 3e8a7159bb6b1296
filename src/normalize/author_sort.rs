use regex::{Regex, RegexBuilder};
use std::collections::HashSet;

/// How `author_to_author_sort` rotates a display name into its sort
/// form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMethod {
    /// Surname first, with a trailing comma: "James S.A. Corey" -> "Corey, James S.A.".
    Comma,
    /// Surname first, no trailing comma.
    NoComma,
    /// Leave single-token names and names already containing a comma
    /// untouched.
    CommaAware,
    /// Return the author string unchanged (for names that should never
    /// be rotated, or that appear in `copy_words`).
    Copy,
}

/// Configuration for author-name splitting and sort-string derivation:
/// prefix/suffix word lists, copy-word overrides, and the sort-copy
/// method, each independently overridable.
pub struct AuthorNameConfig {
    pub split_regex: Regex,
    pub prefixes: HashSet<String>,
    pub suffixes: HashSet<String>,
    pub copy_words: HashSet<String>,
    pub default_method: SortMethod,
}

impl AuthorNameConfig {
    pub fn new() -> Self {
        AuthorNameConfig {
            split_regex: RegexBuilder::new(r",?\s+(and|with)\s+").case_insensitive(true).build().expect("default split regex compiles"),
            prefixes: ["von", "van", "de", "di", "le", "der", "den", "mc", "mac"].iter().map(|s| s.to_string()).collect(),
            suffixes: ["jr", "jr.", "sr", "sr.", "ii", "iii", "iv"].iter().map(|s| s.to_string()).collect(),
            copy_words: HashSet::new(),
            default_method: SortMethod::Comma,
        }
    }
}

impl Default for AuthorNameConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Split an "authors" ingest string into individual display names.
/// Escaped `&&` is converted back to a literal `&` after splitting on
/// the configured regex; a bare `&` is treated as the storage separator
/// and also splits.
pub fn split_authors(input: &str, config: &AuthorNameConfig) -> Vec<String> {
    let placeholder = "\u{0}AMP\u{0}";
    let escaped = input.replace("&&", placeholder);
    let mut out = Vec::new();
    for part in config.split_regex.split(&escaped) {
        for amp_part in part.split('&') {
            let name = amp_part.replace(placeholder, "&");
            let name = name.trim();
            if !name.is_empty() {
                out.push(name.to_string());
            }
        }
    }
    out
}

/// `author_to_author_sort`: rotate "First Middle Last" into
/// "Last, First Middle", stripping configured prefixes/suffixes first
/// and reattaching the suffix after rotation. Names with fewer than two
/// tokens, names in `copy_words`, and (under `CommaAware`) names
/// already containing a comma are returned unchanged.
pub fn author_to_author_sort(author: &str, config: &AuthorNameConfig) -> String {
    if author.is_empty() {
        return String::new();
    }
    let sauthor = remove_bracketed_text(author);
    let sauthor = sauthor.trim();
    let tokens: Vec<&str> = sauthor.split_whitespace().collect();
    if tokens.len() < 2 {
        return author.to_string();
    }

    let ltoks: HashSet<String> = tokens.iter().map(|t| t.to_lowercase()).collect();
    let mut method = config.default_method;
    if ltoks.intersection(&config.copy_words).next().is_some() {
        method = SortMethod::Copy;
    }
    if method == SortMethod::Copy {
        return author.to_string();
    }

    let mut tokens: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();

    // Strip leading prefixes (keeping "Mc"/"Mac" attached happens at
    // display-case time, not here - these are *sort*-prefix words like
    // "von"/"de", a distinct concept from the Mc/Mac casing rule).
    while let Some(first) = tokens.first() {
        if config.prefixes.contains(&first.to_lowercase()) {
            tokens.remove(0);
        } else {
            break;
        }
    }
    if tokens.is_empty() {
        return author.to_string();
    }

    let mut suffix = String::new();
    while let Some(last) = tokens.last() {
        if config.suffixes.contains(&last.to_lowercase()) {
            suffix = format!("{} {}", tokens.pop().unwrap(), suffix);
        } else {
            break;
        }
    }
    let suffix = suffix.trim().to_string();
    if tokens.is_empty() {
        return author.to_string();
    }

    if method == SortMethod::CommaAware && tokens.join("").contains(',') {
        return author.to_string();
    }

    let mut atokens = vec![tokens.last().unwrap().clone()];
    atokens.extend(tokens[..tokens.len() - 1].iter().cloned());
    let num_toks = atokens.len();
    if !suffix.is_empty() {
        atokens.push(suffix);
    }
    if method != SortMethod::NoComma && num_toks > 1 {
        atokens[0] = format!("{},", atokens[0]);
    }
    atokens.join(" ")
}

fn remove_bracketed_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut depth = 0i32;
    for c in s.chars() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' if depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

/// Title-case a display name, keeping "Mc"/"Mac" attached to the
/// following word: "mcdonald" -> "McDonald",
/// "macintyre" -> "MacIntyre".
pub fn title_case_name(name: &str) -> String {
    name.split_whitespace().map(title_case_word).collect::<Vec<_>>().join(" ")
}

fn title_case_word(word: &str) -> String {
    let lower = word.to_lowercase();
    for prefix in ["mac", "mc"] {
        if lower.len() > prefix.len() && lower.starts_with(prefix) {
            let (head, tail) = word.split_at(prefix.len());
            let mut capitalized_head = String::new();
            let mut chars = head.chars();
            if let Some(c) = chars.next() {
                capitalized_head.push(c.to_ascii_uppercase());
            }
            capitalized_head.push_str(&chars.as_str().to_lowercase());
            let mut tail_chars = tail.chars();
            let mut capitalized_tail = String::new();
            if let Some(c) = tail_chars.next() {
                capitalized_tail.push(c.to_ascii_uppercase());
            }
            capitalized_tail.push_str(&tail_chars.as_str().to_lowercase());
            return format!("{capitalized_head}{capitalized_tail}");
        }
    }
    let mut chars = word.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

pub fn authors_to_sort_string(authors: &[String], config: &AuthorNameConfig) -> String {
    authors.iter().map(|a| author_to_author_sort(a, config)).collect::<Vec<_>>().join(" & ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotates_surname_first_with_comma() {
        let config = AuthorNameConfig::new();
        assert_eq!(author_to_author_sort("James S.A. Corey", &config), "Corey, James S.A.");
    }

    #[test]
    fn single_token_name_is_unchanged() {
        let config = AuthorNameConfig::new();
        assert_eq!(author_to_author_sort("Cher", &config), "Cher");
    }

    #[test]
    fn suffix_is_reattached_after_rotation() {
        let config = AuthorNameConfig::new();
        assert_eq!(author_to_author_sort("Martin Luther King Jr.", &config), "King, Martin Luther Jr.");
    }

    #[test]
    fn split_handles_and_with_and_ampersand() {
        let config = AuthorNameConfig::new();
        assert_eq!(split_authors("Neil Gaiman and Terry Pratchett", &config), vec!["Neil Gaiman", "Terry Pratchett"]);
        assert_eq!(split_authors("Penn & Teller", &config), vec!["Penn", "Teller"]);
    }

    #[test]
    fn escaped_ampersand_survives_split() {
        let config = AuthorNameConfig::new();
        assert_eq!(split_authors("Procter && Gamble", &config), vec!["Procter & Gamble"]);
    }

    #[test]
    fn mc_and_mac_stay_attached_when_title_casing() {
        assert_eq!(title_case_name("mcdonald"), "McDonald");
        assert_eq!(title_case_name("macintyre"), "MacIntyre");
        assert_eq!(title_case_name("james corey"), "James Corey");
    }
}
