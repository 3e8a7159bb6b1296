use crate::core::error::{Error, Result};
use crate::core::types::{BookId, ItemId, LinkAux, LinkShape};
use std::collections::{HashMap, HashSet};

/// A single link between a book and an item, carrying whatever
/// auxiliary data its `LinkShape` defines.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkEntry {
    pub item_id: ItemId,
    pub aux: LinkAux,
}

/// `ManyToMany`: a book may reference several items and an item may be
/// referenced by several books, mediated by a link table whose shape
/// governs ordering and typing. Backs tags, languages, rating
/// directly, and is the base the Authors/Formats specializations wrap.
#[derive(Debug)]
pub struct ManyToManyTable {
    pub item_table: String,
    pub link_table: String,
    pub shape: LinkShape,
    pub book_col_map: HashMap<BookId, Vec<LinkEntry>>,
    pub col_book_map: HashMap<ItemId, HashSet<BookId>>,
    pub id_map: HashMap<ItemId, String>,
    next_id: i64,
}

impl ManyToManyTable {
    pub fn new(item_table: &str, link_table: &str, shape: LinkShape) -> Self {
        ManyToManyTable {
            item_table: item_table.to_string(),
            link_table: link_table.to_string(),
            shape,
            book_col_map: HashMap::new(),
            col_book_map: HashMap::new(),
            id_map: HashMap::new(),
            next_id: 1,
        }
    }

    /// Items linked to `book_id`, in link order (priority shapes) or in
    /// whatever order they were inserted.
    pub fn for_book(&self, book_id: BookId) -> Vec<&str> {
        self.book_col_map
            .get(&book_id)
            .map(|entries| entries.iter().filter_map(|e| self.id_map.get(&e.item_id)).map(|s| s.as_str()).collect())
            .unwrap_or_default()
    }

    pub fn entries_for_book(&self, book_id: BookId) -> &[LinkEntry] {
        self.book_col_map.get(&book_id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn books_for(&self, item_id: ItemId) -> HashSet<BookId> {
        self.col_book_map.get(&item_id).cloned().unwrap_or_default()
    }

    pub fn id_for_value(&self, value: &str) -> Option<ItemId> {
        self.id_map.iter().find(|(_, v)| v.eq_ignore_ascii_case(value)).map(|(k, _)| *k)
    }

    pub fn allocate(&mut self, value: &str) -> ItemId {
        let id = ItemId::new(self.next_id);
        self.next_id += 1;
        self.id_map.insert(id, value.to_string());
        id
    }

    /// Allocate at a caller-supplied id (the Store's own auto-assigned
    /// row id from a blank-row insert), bumping the internal counter
    /// past it so a later in-cache-only `allocate` never collides.
    pub fn allocate_with_id(&mut self, id: ItemId, value: &str) {
        self.id_map.insert(id, value.to_string());
        self.next_id = self.next_id.max(id.value() + 1);
    }

    /// Replace the full link set for a book, preserving the order of
    /// `entries` (the writer is responsible for assigning priority/index
    /// values consistent with the table's shape before calling this).
    pub fn set_for_book(&mut self, book_id: BookId, entries: Vec<LinkEntry>) -> Result<()> {
        for e in &entries {
            if !self.id_map.contains_key(&e.item_id) {
                return Err(Error::invariant(format!("item {} not present in `{}`", e.item_id.value(), self.item_table)));
            }
        }
        if let Some(old) = self.book_col_map.remove(&book_id) {
            for e in old {
                if let Some(set) = self.col_book_map.get_mut(&e.item_id) {
                    set.remove(&book_id);
                }
            }
        }
        for e in &entries {
            self.col_book_map.entry(e.item_id).or_default().insert(book_id);
        }
        self.book_col_map.insert(book_id, entries);
        Ok(())
    }

    pub fn fix_case_duplicates(&mut self) -> Vec<(ItemId, ItemId)> {
        let mut merges = Vec::new();
        let mut seen: HashMap<String, ItemId> = HashMap::new();
        let mut ids: Vec<ItemId> = self.id_map.keys().cloned().collect();
        ids.sort();
        for id in ids {
            let value = self.id_map.get(&id).unwrap().clone();
            let key = value.to_lowercase();
            match seen.get(&key) {
                Some(&kept) if kept != id => {
                    merges.push((kept, id));
                    self.id_map.remove(&id);
                    if let Some(books) = self.col_book_map.remove(&id) {
                        for book in &books {
                            if let Some(entries) = self.book_col_map.get_mut(book) {
                                for e in entries.iter_mut() {
                                    if e.item_id == id {
                                        e.item_id = kept;
                                    }
                                }
                            }
                        }
                        self.col_book_map.entry(kept).or_default().extend(books);
                    }
                }
                _ => {
                    seen.insert(key, id);
                }
            }
        }
        merges
    }

    pub fn remove_books(&mut self, book_ids: &[BookId]) {
        for id in book_ids {
            if let Some(entries) = self.book_col_map.remove(id) {
                for e in entries {
                    if let Some(set) = self.col_book_map.get_mut(&e.item_id) {
                        set.remove(id);
                    }
                }
            }
        }
    }

    pub fn remove_items(&mut self, item_ids: &[ItemId]) -> Vec<BookId> {
        let mut affected = Vec::new();
        for item in item_ids {
            self.id_map.remove(item);
            if let Some(books) = self.col_book_map.remove(item) {
                affected.extend(books.iter().copied());
            }
        }
        for book in &affected {
            if let Some(entries) = self.book_col_map.get_mut(book) {
                entries.retain(|e| !item_ids.contains(&e.item_id));
            }
        }
        affected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_for_book_preserves_order() {
        let mut t = ManyToManyTable::new("tags", "books_tags_link", LinkShape::Plain);
        let a = t.allocate("fiction");
        let b = t.allocate("mystery");
        t.set_for_book(BookId::new(1), vec![LinkEntry { item_id: a, aux: LinkAux::default() }, LinkEntry { item_id: b, aux: LinkAux::default() }]).unwrap();
        assert_eq!(t.for_book(BookId::new(1)), vec!["fiction", "mystery"]);
    }

    #[test]
    fn unknown_item_is_rejected() {
        let mut t = ManyToManyTable::new("tags", "books_tags_link", LinkShape::Plain);
        let bogus = ItemId::new(999);
        let err = t.set_for_book(BookId::new(1), vec![LinkEntry { item_id: bogus, aux: LinkAux::default() }]);
        assert!(err.is_err());
    }

    #[test]
    fn remove_items_strips_book_entries() {
        let mut t = ManyToManyTable::new("tags", "books_tags_link", LinkShape::Plain);
        let a = t.allocate("fiction");
        t.set_for_book(BookId::new(1), vec![LinkEntry { item_id: a, aux: LinkAux::default() }]).unwrap();
        let affected = t.remove_items(&[a]);
        assert_eq!(affected, vec![BookId::new(1)]);
        assert!(t.for_book(BookId::new(1)).is_empty());
    }
}
