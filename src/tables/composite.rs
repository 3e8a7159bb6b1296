use crate::core::types::BookId;
use std::collections::HashMap;

/// A composite field: a template rendered from other fields' values,
/// cached per book and invalidated whenever one of its dependencies is
/// written. Rendering itself lives in the formatter template
/// engine invoked by the Cache Controller; this table only owns the
/// cache and the dependency list used to decide when to drop an entry.
#[derive(Debug, Default)]
pub struct CompositeTable {
    pub name: String,
    pub template: String,
    pub depends_on: Vec<String>,
    cache: HashMap<BookId, String>,
}

impl CompositeTable {
    pub fn new(name: &str, template: &str, depends_on: Vec<String>) -> Self {
        CompositeTable { name: name.to_string(), template: template.to_string(), depends_on, cache: HashMap::new() }
    }

    pub fn cached(&self, book_id: BookId) -> Option<&str> {
        self.cache.get(&book_id).map(|s| s.as_str())
    }

    pub fn fill(&mut self, book_id: BookId, rendered: String) {
        self.cache.insert(book_id, rendered);
    }

    /// Drop `book_id`'s cached value; called by the cache controller
    /// whenever a write touches one of `depends_on`.
    pub fn invalidate(&mut self, book_id: BookId) {
        self.cache.remove(&book_id);
    }

    pub fn invalidate_all(&mut self) {
        self.cache.clear();
    }

    pub fn depends_on_field(&self, field_name: &str) -> bool {
        self.depends_on.iter().any(|d| d == field_name)
    }

    pub fn remove_books(&mut self, book_ids: &[BookId]) {
        for id in book_ids {
            self.cache.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalidate_drops_only_that_book() {
        let mut t = CompositeTable::new("#series_sort", "{series} [{series_index}]", vec!["series".into()]);
        t.fill(BookId::new(1), "Foo [1]".into());
        t.fill(BookId::new(2), "Bar [2]".into());
        t.invalidate(BookId::new(1));
        assert_eq!(t.cached(BookId::new(1)), None);
        assert_eq!(t.cached(BookId::new(2)), Some("Bar [2]"));
    }

    #[test]
    fn depends_on_field_checks_membership() {
        let t = CompositeTable::new("#x", "{series}", vec!["series".into()]);
        assert!(t.depends_on_field("series"));
        assert!(!t.depends_on_field("tags"));
    }
}
