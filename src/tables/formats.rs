use crate::core::error::{Error, Result};
use crate::core::types::BookId;
use std::collections::HashMap;

const ORIGINAL_PREFIX: &str = "ORIGINAL_";
pub const COVER_INTERNAL: &str = "__COVER_INTERNAL__";

/// Split a stored format code (`EPUB_1`, `ORIGINAL_2_EPUB_1`, `PDF`)
/// into its base code and priority suffix. A bare base code with no
/// `_<n>` suffix is priority 1.
fn split_code(code: &str) -> (&str, u32) {
    match code.rsplit_once('_') {
        Some((base, suffix)) if !base.is_empty() => match suffix.parse::<u32>() {
            Ok(n) => (base, n),
            Err(_) => (code, 1),
        },
        _ => (code, 1),
    }
}

fn join_code(base: &str, priority: u32) -> String {
    format!("{base}_{priority}")
}

/// Formats: the set of on-disk book files, keyed by a priority-coded
/// format string (`BASE_k`, contiguous per book+base starting at 1) so
/// that a book may hold the same base format more than once (a EPUB and
/// a re-converted EPUB, say) while still exposing one canonical "the"
/// EPUB (priority 1) per base.
#[derive(Debug, Default)]
pub struct FormatsTable {
    pub book_col_map: HashMap<BookId, Vec<String>>,
    pub sizes: HashMap<(BookId, String), u64>,
    pub locations: HashMap<(BookId, String), String>,
}

impl FormatsTable {
    pub fn new() -> Self {
        FormatsTable::default()
    }

    /// Codes for a book, ordered by priority ascending (ties broken by
    /// base name) so the highest-priority slot of every base always
    /// comes first regardless of the order files were added in.
    pub fn formats_for_book(&self, book_id: BookId) -> Vec<&str> {
        let mut codes: Vec<&str> = self.book_col_map.get(&book_id).map(|v| v.iter().map(|s| s.as_str()).collect()).unwrap_or_default();
        codes.sort_by_key(|c| { let (b, p) = split_code(c); (p, b.to_string()) });
        codes
    }

    pub fn has_priority_fmt(&self, book_id: BookId, base: &str) -> Option<&str> {
        let target = join_code(base, 1);
        self.book_col_map.get(&book_id)?.iter().find(|c| **c == target).map(|s| s.as_str())
    }

    /// A bare base code with no explicit slot always lands at priority
    /// 1, the highest: existing slots of the same base shift down to
    /// make room.
    pub fn add_format(&mut self, book_id: BookId, base: &str, size: u64, location: &str) -> String {
        let existing = self.book_col_map.entry(book_id).or_default().clone();
        let mut matching: Vec<(usize, u32)> = existing.iter().enumerate().filter_map(|(i, c)| { let (b, p) = split_code(c); (b == base).then_some((i, p)) }).collect();
        matching.sort_by(|a, b| b.1.cmp(&a.1));
        for (i, p) in matching {
            let old_code = existing[i].clone();
            let new_code = join_code(base, p + 1);
            if old_code != new_code {
                if let Some(v) = self.sizes.remove(&(book_id, old_code.clone())) {
                    self.sizes.insert((book_id, new_code.clone()), v);
                }
                if let Some(v) = self.locations.remove(&(book_id, old_code.clone())) {
                    self.locations.insert((book_id, new_code.clone()), v);
                }
            }
            self.book_col_map.get_mut(&book_id).unwrap()[i] = new_code;
        }
        let code = join_code(base, 1);
        self.book_col_map.get_mut(&book_id).unwrap().push(code.clone());
        self.sizes.insert((book_id, code.clone()), size);
        self.locations.insert((book_id, code.clone()), location.to_string());
        code
    }

    /// Drop a format, then renumber the remaining slots of the same
    /// base so priorities stay contiguous starting at 1.
    pub fn remove_fmt(&mut self, book_id: BookId, code: &str) -> Result<()> {
        let (base, _) = split_code(code);
        let base = base.to_string();
        let codes = self.book_col_map.get_mut(&book_id).ok_or_else(|| Error::not_found(format!("book {} has no formats", book_id.value())))?;
        let pos = codes.iter().position(|c| c == code).ok_or_else(|| Error::not_found(format!("format `{code}` not present on book {}", book_id.value())))?;
        codes.remove(pos);
        self.sizes.remove(&(book_id, code.to_string()));
        self.locations.remove(&(book_id, code.to_string()));
        self.densify(book_id, &base);
        Ok(())
    }

    fn densify(&mut self, book_id: BookId, base: &str) {
        let Some(codes) = self.book_col_map.get(&book_id) else { return };
        let mut matching: Vec<(usize, u32)> = codes
            .iter()
            .enumerate()
            .filter_map(|(i, c)| { let (b, p) = split_code(c); (b == base).then_some((i, p)) })
            .collect();
        matching.sort_by_key(|(_, p)| *p);
        let renames: Vec<(usize, String)> = matching.into_iter().enumerate().map(|(k, (i, _))| (i, join_code(base, (k + 1) as u32))).collect();
        let codes = self.book_col_map.get_mut(&book_id).unwrap();
        for (i, new_code) in renames {
            let old_code = codes[i].clone();
            if old_code != new_code {
                if let Some(v) = self.sizes.remove(&(book_id, old_code.clone())) {
                    self.sizes.insert((book_id, new_code.clone()), v);
                }
                if let Some(v) = self.locations.remove(&(book_id, old_code.clone())) {
                    self.locations.insert((book_id, new_code.clone()), v);
                }
                codes[i] = new_code;
            }
        }
    }

    pub fn format_floc(&self, book_id: BookId, code: &str) -> Option<&str> {
        self.locations.get(&(book_id, code.to_string())).map(|s| s.as_str())
    }

    pub fn format_size(&self, book_id: BookId, code: &str) -> Option<u64> {
        self.sizes.get(&(book_id, code.to_string())).copied()
    }

    /// Preserve the current priority-1 slot of `base` under an
    /// `ORIGINAL_<n>_` prefix before a conversion overwrites it, so it
    /// can later be restored.
    pub fn save_original_format(&mut self, book_id: BookId, base: &str) -> Result<String> {
        let current = self.has_priority_fmt(book_id, base).map(|s| s.to_string()).ok_or_else(|| Error::not_found(format!("book {} has no `{base}` to preserve", book_id.value())))?;
        let archived = format!("{ORIGINAL_PREFIX}{current}");
        let codes = self.book_col_map.get_mut(&book_id).unwrap();
        let pos = codes.iter().position(|c| *c == current).unwrap();
        codes[pos] = archived.clone();
        if let Some(v) = self.sizes.remove(&(book_id, current.clone())) {
            self.sizes.insert((book_id, archived.clone()), v);
        }
        if let Some(v) = self.locations.remove(&(book_id, current.clone())) {
            self.locations.insert((book_id, archived.clone()), v);
        }
        Ok(archived)
    }

    /// Reverse `save_original_format`: drop whatever now occupies the
    /// base's priority-1 slot and restore the archived copy in its
    /// place.
    pub fn restore_original_format(&mut self, book_id: BookId, base: &str) -> Result<()> {
        let archived_prefix = format!("{ORIGINAL_PREFIX}{base}");
        let codes = self.book_col_map.get_mut(&book_id).ok_or_else(|| Error::not_found(format!("book {} has no formats", book_id.value())))?;
        let archived = codes.iter().find(|c| c.starts_with(&archived_prefix)).cloned().ok_or_else(|| Error::not_found(format!("no preserved original `{base}` on book {}", book_id.value())))?;
        if let Some(current) = self.has_priority_fmt(book_id, base).map(|s| s.to_string()) {
            self.remove_fmt(book_id, &current)?;
        }
        let codes = self.book_col_map.get_mut(&book_id).unwrap();
        let pos = codes.iter().position(|c| *c == archived).unwrap();
        let restored = join_code(base, 1);
        codes[pos] = restored.clone();
        if let Some(v) = self.sizes.remove(&(book_id, archived.clone())) {
            self.sizes.insert((book_id, restored.clone()), v);
        }
        if let Some(v) = self.locations.remove(&(book_id, archived.clone())) {
            self.locations.insert((book_id, restored.clone()), v);
        }
        self.densify(book_id, base);
        Ok(())
    }

    pub fn remove_books(&mut self, book_ids: &[BookId]) {
        for id in book_ids {
            if let Some(codes) = self.book_col_map.remove(id) {
                for code in codes {
                    self.sizes.remove(&(*id, code.clone()));
                    self.locations.remove(&(*id, code));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_format_inserts_newest_at_highest_priority() {
        let mut t = FormatsTable::new();
        let first = t.add_format(BookId::new(1), "EPUB", 100, "/a.epub");
        let second = t.add_format(BookId::new(1), "EPUB", 200, "/b.epub");
        assert_eq!(first, "EPUB_1");
        assert_eq!(second, "EPUB_1");
        assert_eq!(t.format_floc(BookId::new(1), "EPUB_1"), Some("/b.epub"));
        assert_eq!(t.format_floc(BookId::new(1), "EPUB_2"), Some("/a.epub"));
    }

    #[test]
    fn remove_fmt_densifies_remaining_slots() {
        let mut t = FormatsTable::new();
        t.add_format(BookId::new(1), "EPUB", 100, "/a.epub");
        t.add_format(BookId::new(1), "EPUB", 200, "/b.epub");
        t.add_format(BookId::new(1), "EPUB", 300, "/c.epub");
        // newest-first priority order is now c, b, a
        t.remove_fmt(BookId::new(1), "EPUB_2").unwrap();
        assert_eq!(t.format_floc(BookId::new(1), "EPUB_1"), Some("/c.epub"));
        assert_eq!(t.format_floc(BookId::new(1), "EPUB_2"), Some("/a.epub"));
    }

    #[test]
    fn save_and_restore_original_round_trips() {
        let mut t = FormatsTable::new();
        t.add_format(BookId::new(1), "EPUB", 100, "/orig.epub");
        t.save_original_format(BookId::new(1), "EPUB").unwrap();
        t.add_format(BookId::new(1), "EPUB", 150, "/converted.epub");
        assert_eq!(t.format_floc(BookId::new(1), "EPUB_1"), Some("/converted.epub"));
        t.restore_original_format(BookId::new(1), "EPUB").unwrap();
        assert_eq!(t.format_floc(BookId::new(1), "EPUB_1"), Some("/orig.epub"));
    }
}
