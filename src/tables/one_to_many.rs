use crate::core::error::Result;
use crate::core::types::{BookId, ItemId};
use std::collections::HashMap;

/// `OneToMany`: a book may own several item rows that belong to no one
/// else. Used for comments
/// and notes — free text rows with no cross-book sharing, so there is
/// no `id_map`/`col_book_map` reverse index to maintain.
#[derive(Debug, Default)]
pub struct OneToManyTable {
    pub item_table: String,
    pub book_col_map: HashMap<BookId, Vec<ItemId>>,
    pub values: HashMap<ItemId, String>,
    next_id: i64,
}

impl OneToManyTable {
    pub fn new(item_table: &str) -> Self {
        OneToManyTable { item_table: item_table.to_string(), book_col_map: HashMap::new(), values: HashMap::new(), next_id: 1 }
    }

    pub fn for_book(&self, book_id: BookId) -> Vec<&str> {
        self.book_col_map
            .get(&book_id)
            .map(|ids| ids.iter().filter_map(|id| self.values.get(id)).map(|s| s.as_str()).collect())
            .unwrap_or_default()
    }

    /// Replace the full set of rows owned by `book_id`, dropping the
    /// items it previously owned (they belong to no one else, so they
    /// are simply discarded rather than reference-counted).
    pub fn set_for_book(&mut self, book_id: BookId, values: Vec<String>) -> Result<Vec<ItemId>> {
        if let Some(old_ids) = self.book_col_map.remove(&book_id) {
            for id in old_ids {
                self.values.remove(&id);
            }
        }
        let mut ids = Vec::with_capacity(values.len());
        for value in values {
            let id = ItemId::new(self.next_id);
            self.next_id += 1;
            self.values.insert(id, value);
            ids.push(id);
        }
        self.book_col_map.insert(book_id, ids.clone());
        Ok(ids)
    }

    pub fn remove_books(&mut self, book_ids: &[BookId]) {
        for id in book_ids {
            if let Some(old_ids) = self.book_col_map.remove(id) {
                for item in old_ids {
                    self.values.remove(&item);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_for_book_replaces_prior_rows() {
        let mut t = OneToManyTable::new("comments");
        t.set_for_book(BookId::new(1), vec!["first".into()]).unwrap();
        t.set_for_book(BookId::new(1), vec!["second".into(), "third".into()]).unwrap();
        assert_eq!(t.for_book(BookId::new(1)), vec!["second", "third"]);
        assert_eq!(t.values.len(), 2);
    }

    #[test]
    fn remove_books_drops_owned_rows() {
        let mut t = OneToManyTable::new("comments");
        t.set_for_book(BookId::new(1), vec!["a".into()]).unwrap();
        t.remove_books(&[BookId::new(1)]);
        assert!(t.for_book(BookId::new(1)).is_empty());
        assert!(t.values.is_empty());
    }
}
