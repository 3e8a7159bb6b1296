use crate::core::error::{Error, Result};

/// Strip everything but digits (preserving a trailing check-digit `X`)
/// and uppercase the result.
fn strip_non_digits(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_digit() || c.eq_ignore_ascii_case(&'x'))
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn all_same_digit(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => chars.all(|c| c == first),
        None => false,
    }
}

fn isbn10_checksum_valid(s: &str) -> bool {
    if s.len() != 10 {
        return false;
    }
    let mut sum = 0i32;
    for (i, c) in s.chars().enumerate() {
        let digit = if c == 'X' {
            if i != 9 {
                return false;
            }
            10
        } else {
            match c.to_digit(10) {
                Some(d) => d as i32,
                None => return false,
            }
        };
        sum += digit * (10 - i as i32);
    }
    sum % 11 == 0
}

fn isbn13_checksum_valid(s: &str) -> bool {
    if s.len() != 13 || !s.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    let digits: Vec<i32> = s.chars().map(|c| c.to_digit(10).unwrap() as i32).collect();
    let sum: i32 = digits.iter().enumerate().map(|(i, d)| if i % 2 == 0 { *d } else { d * 3 }).sum();
    sum % 10 == 0
}

/// Normalize an ISBN-ish identifier value to its bare canonical storage
/// form, rejecting malformed or checksum-invalid input.
/// Runs of the same digit (a frequent placeholder artifact) are
/// rejected too.
pub fn normalize_isbn(raw: &str) -> Result<String> {
    let stripped = strip_non_digits(raw);
    if stripped.is_empty() || all_same_digit(&stripped) {
        return Err(Error::input(format!("`{raw}` is not a plausible ISBN")));
    }
    match stripped.len() {
        10 if isbn10_checksum_valid(&stripped) => Ok(stripped),
        13 if isbn13_checksum_valid(&stripped) => Ok(stripped),
        _ => Err(Error::input(format!("`{raw}` fails the ISBN-10/13 checksum"))),
    }
}

/// Render the canonical storage form grouped for display only
/// (`xxx-x-xxxx-xxxx-x`); storage itself always uses the bare form.
pub fn display_isbn(canonical: &str) -> String {
    match canonical.len() {
        13 => format!(
            "{}-{}-{}-{}-{}",
            &canonical[0..3],
            &canonical[3..4],
            &canonical[4..8],
            &canonical[8..12],
            &canonical[12..13]
        ),
        10 => format!("{}-{}-{}-{}", &canonical[0..1], &canonical[1..5], &canonical[5..9], &canonical[9..10]),
        _ => canonical.to_string(),
    }
}

/// Clean an identifier's type key: strip, lowercase, drop characters
/// that are not ASCII alphanumerics or `-`/`_`.
pub fn sanitize_identifier_key(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_isbn13_with_hyphens() {
        assert_eq!(normalize_isbn("978-0-316-12908-4").unwrap(), "9780316129084");
    }

    #[test]
    fn rejects_bad_checksum() {
        assert!(normalize_isbn("978-0-316-12908-5").is_err());
    }

    #[test]
    fn accepts_isbn10_with_x_check_digit() {
        assert!(normalize_isbn("0-306-40615-2").is_ok());
    }

    #[test]
    fn rejects_repeated_digit_placeholder() {
        assert!(normalize_isbn("0000000000").is_err());
    }

    #[test]
    fn identifier_key_is_sanitized() {
        assert_eq!(sanitize_identifier_key("  ISBN! "), "isbn");
    }
}
