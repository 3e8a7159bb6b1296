use crate::core::error::Result;
use crate::core::types::{BookId, ItemId, LinkAux, LinkShape};
use crate::tables::many_to_many::{LinkEntry, ManyToManyTable};
use std::collections::HashMap;

/// Authors ride a `TypedPriority` `ManyToMany` link (creators are
/// ordered and, in principle, role-discriminated) plus two side maps
/// the base shape has no room for: `asort_map` (author_sort per author
/// id) and `alink_map` (an external link URL per author id).
#[derive(Debug)]
pub struct AuthorsTable {
    pub base: ManyToManyTable,
    pub asort_map: HashMap<ItemId, String>,
    pub alink_map: HashMap<ItemId, String>,
}

impl AuthorsTable {
    pub fn new() -> Self {
        AuthorsTable { base: ManyToManyTable::new("authors", "books_authors_link", LinkShape::TypedPriority), asort_map: HashMap::new(), alink_map: HashMap::new() }
    }

    pub fn for_book(&self, book_id: BookId) -> Vec<&str> {
        self.base.for_book(book_id)
    }

    pub fn sort_for_book(&self, book_id: BookId) -> Vec<&str> {
        self.base
            .entries_for_book(book_id)
            .iter()
            .filter_map(|e| self.asort_map.get(&e.item_id))
            .map(|s| s.as_str())
            .collect()
    }

    pub fn allocate(&mut self, name: &str, sort: &str, link: &str) -> ItemId {
        let id = self.base.allocate(name);
        self.asort_map.insert(id, sort.to_string());
        self.alink_map.insert(id, link.to_string());
        id
    }

    /// Allocate at a caller-supplied (Store-assigned) id; see
    /// `ManyToManyTable::allocate_with_id`.
    pub fn allocate_with_id(&mut self, id: ItemId, name: &str, sort: &str, link: &str) {
        self.base.allocate_with_id(id, name);
        self.asort_map.insert(id, sort.to_string());
        self.alink_map.insert(id, link.to_string());
    }

    pub fn set_sort(&mut self, item_id: ItemId, sort: &str) {
        self.asort_map.insert(item_id, sort.to_string());
    }

    pub fn set_link(&mut self, item_id: ItemId, link: &str) {
        self.alink_map.insert(item_id, link.to_string());
    }

    pub fn set_for_book(&mut self, book_id: BookId, item_ids: Vec<ItemId>) -> Result<()> {
        let entries = item_ids
            .into_iter()
            .enumerate()
            .map(|(i, item_id)| LinkEntry { item_id, aux: LinkAux { priority: Some(i as i64), ..Default::default() } })
            .collect();
        self.base.set_for_book(book_id, entries)
    }

    pub fn remove_books(&mut self, book_ids: &[BookId]) {
        self.base.remove_books(book_ids);
    }

    pub fn remove_items(&mut self, item_ids: &[ItemId]) -> Vec<BookId> {
        for id in item_ids {
            self.asort_map.remove(id);
            self.alink_map.remove(id);
        }
        self.base.remove_items(item_ids)
    }
}

impl Default for AuthorsTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_for_book_preserves_priority_order() {
        let mut t = AuthorsTable::new();
        let a = t.allocate("James S.A. Corey", "Corey, James S.A.", "");
        let b = t.allocate("Leigh Bardugo", "Bardugo, Leigh", "");
        t.set_for_book(BookId::new(1), vec![a, b]).unwrap();
        assert_eq!(t.for_book(BookId::new(1)), vec!["James S.A. Corey", "Leigh Bardugo"]);
        assert_eq!(t.sort_for_book(BookId::new(1)), vec!["Corey, James S.A.", "Bardugo, Leigh"]);
    }
}
