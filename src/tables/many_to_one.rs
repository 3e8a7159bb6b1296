use crate::core::error::{Error, Result};
use crate::core::types::{BookId, ItemId};
use std::collections::{HashMap, HashSet};

/// `ManyToOne`: one item per book (`book_col_map: book_id -> item_id`),
/// but an item may be shared by many books (`col_book_map: item_id ->
/// set(book_id)`). Used for series, publisher, subjects, synopses,
/// genre. Series/publisher/genre are tree-shaped;
/// the tree is represented as `(id, parent_id|null)` rather than a
/// recursive join.
#[derive(Debug, Default)]
pub struct ManyToOneTable {
    pub item_table: String,
    pub book_col_map: HashMap<BookId, ItemId>,
    pub col_book_map: HashMap<ItemId, HashSet<BookId>>,
    pub id_map: HashMap<ItemId, String>,
    pub parent_map: HashMap<ItemId, Option<ItemId>>,
    next_id: i64,
}

impl ManyToOneTable {
    pub fn new(item_table: &str) -> Self {
        ManyToOneTable {
            item_table: item_table.to_string(),
            book_col_map: HashMap::new(),
            col_book_map: HashMap::new(),
            id_map: HashMap::new(),
            parent_map: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn for_book(&self, book_id: BookId) -> Option<&str> {
        self.book_col_map.get(&book_id).and_then(|id| self.id_map.get(id)).map(|s| s.as_str())
    }

    pub fn id_for_book(&self, book_id: BookId) -> Option<ItemId> {
        self.book_col_map.get(&book_id).copied()
    }

    pub fn books_for(&self, item_id: ItemId) -> HashSet<BookId> {
        self.col_book_map.get(&item_id).cloned().unwrap_or_default()
    }

    pub fn id_for_value(&self, value: &str) -> Option<ItemId> {
        self.id_map.iter().find(|(_, v)| v.eq_ignore_ascii_case(value)).map(|(k, _)| *k)
    }

    pub fn allocate(&mut self, value: &str, parent: Option<ItemId>) -> Result<ItemId> {
        if let Some(p) = parent {
            if !self.id_map.contains_key(&p) {
                return Err(Error::not_found(format!("parent {} missing in `{}`", p.value(), self.item_table)));
            }
        }
        let id = ItemId::new(self.next_id);
        self.next_id += 1;
        self.id_map.insert(id, value.to_string());
        self.parent_map.insert(id, parent);
        Ok(id)
    }

    /// Allocate at a caller-supplied (Store-assigned) id; see
    /// `ManyToManyTable::allocate_with_id`.
    pub fn allocate_with_id(&mut self, id: ItemId, value: &str, parent: Option<ItemId>) {
        self.id_map.insert(id, value.to_string());
        self.parent_map.insert(id, parent);
        self.next_id = self.next_id.max(id.value() + 1);
    }

    /// Set `item`'s parent, rejecting the change if it would create a
    /// cycle.
    pub fn set_parent(&mut self, item: ItemId, parent: Option<ItemId>) -> Result<()> {
        if let Some(p) = parent {
            let mut cursor = Some(p);
            while let Some(cur) = cursor {
                if cur == item {
                    return Err(Error::invariant(format!("setting parent of {} to {} would create a cycle", item.value(), p.value())));
                }
                cursor = self.parent_map.get(&cur).copied().flatten();
            }
        }
        self.parent_map.insert(item, parent);
        Ok(())
    }

    /// Walk `parent_id` to the root, collecting display values, then
    /// reverse them: the "linear row index" used for derived strings
    /// like "Trilogy: Part 1: Book".
    pub fn linear_path(&self, item: ItemId) -> Vec<String> {
        let mut path = Vec::new();
        let mut cursor = Some(item);
        let mut guard = 0;
        while let Some(cur) = cursor {
            guard += 1;
            if guard > self.id_map.len() + 1 {
                break; // defensive: a cycle slipped past set_parent somehow
            }
            if let Some(name) = self.id_map.get(&cur) {
                path.push(name.clone());
            }
            cursor = self.parent_map.get(&cur).copied().flatten();
        }
        path.reverse();
        path
    }

    pub fn update_precheck(&self, updates: &HashMap<BookId, ItemId>) -> Result<()> {
        for item_id in updates.values() {
            if !self.id_map.contains_key(item_id) {
                return Err(Error::invariant(format!("item {} not present in `{}`", item_id.value(), self.item_table)));
            }
        }
        Ok(())
    }

    pub fn internal_update_cache(&mut self, book_updates: HashMap<BookId, ItemId>, id_map_update: HashMap<ItemId, String>) {
        for (book, new_item) in book_updates {
            if let Some(old_item) = self.book_col_map.insert(book, new_item) {
                if old_item != new_item {
                    if let Some(set) = self.col_book_map.get_mut(&old_item) {
                        set.remove(&book);
                    }
                }
            }
            self.col_book_map.entry(new_item).or_default().insert(book);
        }
        self.id_map.extend(id_map_update);
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
                        for b in &books {
                            self.book_col_map.insert(*b, kept);
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
            if let Some(item) = self.book_col_map.remove(id) {
                if let Some(set) = self.col_book_map.get_mut(&item) {
                    set.remove(id);
                }
            }
        }
    }

    pub fn remove_items(&mut self, item_ids: &[ItemId]) -> Vec<BookId> {
        let mut affected = Vec::new();
        for item in item_ids {
            self.id_map.remove(item);
            self.parent_map.remove(item);
            if let Some(books) = self.col_book_map.remove(item) {
                affected.extend(books);
            }
        }
        for b in &affected {
            self.book_col_map.remove(b);
        }
        affected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_is_rejected() {
        let mut t = ManyToOneTable::new("series");
        let a = t.allocate("A", None).unwrap();
        let b = t.allocate("B", Some(a)).unwrap();
        assert!(t.set_parent(a, Some(b)).is_err());
    }

    #[test]
    fn linear_path_walks_root_to_leaf() {
        let mut t = ManyToOneTable::new("series");
        let trilogy = t.allocate("Trilogy", None).unwrap();
        let part = t.allocate("Part 1", Some(trilogy)).unwrap();
        assert_eq!(t.linear_path(part), vec!["Trilogy".to_string(), "Part 1".to_string()]);
    }
}
