use crate::core::error::{Error, Result};
use crate::core::types::BookId;
use crate::normalize::isbn::sanitize_identifier_key;
use std::collections::HashMap;

/// Identifiers: an insertion-ordered list of (type, value) pairs per
/// book. Order is preserved across edits rather than re-sorted,
/// since display order is meaningful (isbn before a store-specific id,
/// say) and there is no natural total order over identifier types.
#[derive(Debug, Default)]
pub struct IdentifiersTable {
    pub book_col_map: HashMap<BookId, Vec<(String, String)>>,
}

impl IdentifiersTable {
    pub fn new() -> Self {
        IdentifiersTable::default()
    }

    pub fn for_book(&self, book_id: BookId) -> &[(String, String)] {
        self.book_col_map.get(&book_id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn get(&self, book_id: BookId, id_type: &str) -> Option<&str> {
        let key = sanitize_identifier_key(id_type);
        self.for_book(book_id).iter().find(|(t, _)| *t == key).map(|(_, v)| v.as_str())
    }

    /// Insert or update one identifier, preserving its existing position
    /// if it already exists and appending it otherwise.
    pub fn set_one(&mut self, book_id: BookId, id_type: &str, value: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(Error::input("identifier value must not be empty"));
        }
        let key = sanitize_identifier_key(id_type);
        if key.is_empty() {
            return Err(Error::input(format!("`{id_type}` has no usable identifier-type characters")));
        }
        let entries = self.book_col_map.entry(book_id).or_default();
        match entries.iter_mut().find(|(t, _)| *t == key) {
            Some((_, v)) => *v = value.to_string(),
            None => entries.push((key, value.to_string())),
        }
        Ok(())
    }

    pub fn remove_one(&mut self, book_id: BookId, id_type: &str) {
        let key = sanitize_identifier_key(id_type);
        if let Some(entries) = self.book_col_map.get_mut(&book_id) {
            entries.retain(|(t, _)| *t != key);
        }
    }

    /// Replace the whole set for a book, in the order given.
    pub fn set_all(&mut self, book_id: BookId, pairs: Vec<(String, String)>) -> Result<()> {
        let mut ordered = Vec::with_capacity(pairs.len());
        for (id_type, value) in pairs {
            if value.trim().is_empty() {
                continue;
            }
            let key = sanitize_identifier_key(&id_type);
            if key.is_empty() {
                continue;
            }
            if ordered.iter().any(|(t, _): &(String, String)| *t == key) {
                continue;
            }
            ordered.push((key, value));
        }
        self.book_col_map.insert(book_id, ordered);
        Ok(())
    }

    pub fn remove_books(&mut self, book_ids: &[BookId]) {
        for id in book_ids {
            self.book_col_map.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_one_preserves_insertion_order() {
        let mut t = IdentifiersTable::new();
        t.set_one(BookId::new(1), "isbn", "9780316129084").unwrap();
        t.set_one(BookId::new(1), "asin", "B001").unwrap();
        t.set_one(BookId::new(1), "isbn", "9780316129085").unwrap();
        assert_eq!(
            t.for_book(BookId::new(1)),
            &[("isbn".to_string(), "9780316129085".to_string()), ("asin".to_string(), "B001".to_string())]
        );
    }

    #[test]
    fn empty_value_is_rejected() {
        let mut t = IdentifiersTable::new();
        assert!(t.set_one(BookId::new(1), "isbn", "  ").is_err());
    }
}
