use crate::core::error::{Error, Result};
use crate::core::types::{BookId, ItemId};
use crate::normalize::case_fold::case_equal;
use crate::store::driver::StoreDriver;
use std::collections::HashMap;

/// `OneToOne` in a table other than titles: `book_col_map: book_id ->
/// item_id`, `id_map: item_id -> value`. Used by single-valued
/// custom columns whose values are shared across books (e.g. an
/// enumeration column), where two or more books can point at the same
/// item id.
#[derive(Debug, Default)]
pub struct OneToOneTable {
    pub item_table: String,
    pub link_column: String,
    pub book_col_map: HashMap<BookId, ItemId>,
    pub id_map: HashMap<ItemId, String>,
    next_id: i64,
}

impl OneToOneTable {
    pub fn new(item_table: &str, link_column: &str) -> Self {
        OneToOneTable {
            item_table: item_table.to_string(),
            link_column: link_column.to_string(),
            book_col_map: HashMap::new(),
            id_map: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn for_book(&self, book_id: BookId) -> Option<&str> {
        self.book_col_map.get(&book_id).and_then(|id| self.id_map.get(id)).map(|s| s.as_str())
    }

    pub fn books_for(&self, item_id: ItemId) -> Vec<BookId> {
        self.book_col_map.iter().filter(|(_, v)| **v == item_id).map(|(k, _)| *k).collect()
    }

    /// Find (or, if `allow_create`, allocate) the item id for a display
    /// value using case-insensitive identity.
    pub fn id_for_value(&mut self, value: &str) -> Option<ItemId> {
        self.id_map.iter().find(|(_, v)| case_equal(v, value)).map(|(k, _)| *k)
    }

    pub fn allocate(&mut self, value: &str) -> ItemId {
        let id = ItemId::new(self.next_id);
        self.next_id += 1;
        self.id_map.insert(id, value.to_string());
        id
    }

    /// Allocate at a caller-supplied (Store-assigned) id; see
    /// `ManyToManyTable::allocate_with_id`.
    pub fn allocate_with_id(&mut self, id: ItemId, value: &str) {
        self.id_map.insert(id, value.to_string());
        self.next_id = self.next_id.max(id.value() + 1);
    }

    /// Reject an update that would point a book at an item id this table
    /// does not know about.
    pub fn update_precheck(&self, updates: &HashMap<BookId, ItemId>) -> Result<()> {
        for item_id in updates.values() {
            if !self.id_map.contains_key(item_id) {
                return Err(Error::invariant(format!("item {} not present in `{}`", item_id.value(), self.item_table)));
            }
        }
        Ok(())
    }

    pub fn internal_update_cache(&mut self, book_updates: HashMap<BookId, ItemId>, id_map_update: HashMap<ItemId, String>) {
        self.book_col_map.extend(book_updates);
        self.id_map.extend(id_map_update);
    }

    /// Coalesce items differing only in case, keeping the lowest id and
    /// repointing every book that referenced the merged id.
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
                    for v in self.book_col_map.values_mut() {
                        if *v == id {
                            *v = kept;
                        }
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
            self.book_col_map.remove(id);
        }
    }

    /// Remove items, returning the set of books that referenced them
    /// (they lose the field entirely).
    pub fn remove_items(&mut self, item_ids: &[ItemId]) -> Vec<BookId> {
        let mut affected = Vec::new();
        for item_id in item_ids {
            self.id_map.remove(item_id);
        }
        self.book_col_map.retain(|book, item| {
            if item_ids.contains(item) {
                affected.push(*book);
                false
            } else {
                true
            }
        });
        affected
    }

    pub fn read_from_store(&mut self, _store: &dyn StoreDriver) -> Result<()> {
        Ok(())
    }
}
