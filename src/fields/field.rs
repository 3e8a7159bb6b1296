use crate::core::types::{BookId, FieldValue, ItemId, Scalar};
use crate::normalize::case_fold::sort_key;
use crate::registry::field_meta::FieldMetadata;
use crate::tables::TableImpl;
use std::collections::HashSet;

/// Wraps one Table's shape-specific storage behind the read interface
/// every field exposes regardless of shape. Writers mutate a
/// Table directly (through the Cache Controller); a Field only reads.
#[derive(Debug)]
pub struct Field {
    pub meta: FieldMetadata,
}

impl Field {
    pub fn new(meta: FieldMetadata) -> Self {
        Field { meta }
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// The book's value, or `default` if absent, honoring the
    /// field's multiplicity.
    pub fn for_book(&self, table: &TableImpl, book_id: BookId, default: FieldValue) -> FieldValue {
        match table {
            TableImpl::OneToOne(t) => t.for_book(book_id).map(|v| FieldValue::Scalar(Scalar::Text(v.to_string()))).unwrap_or(default),
            TableImpl::ManyToOne(t) => t.for_book(book_id).map(|v| FieldValue::Scalar(Scalar::Text(v.to_string()))).unwrap_or(default),
            TableImpl::OneToMany(t) => {
                let values = t.for_book(book_id);
                if values.is_empty() {
                    default
                } else {
                    FieldValue::TextList(values.into_iter().map(str::to_string).collect())
                }
            }
            TableImpl::ManyToMany(t) => {
                let values = t.for_book(book_id);
                if values.is_empty() {
                    default
                } else {
                    FieldValue::TextList(values.into_iter().map(str::to_string).collect())
                }
            }
            TableImpl::Authors(t) => {
                let values = t.for_book(book_id);
                if values.is_empty() {
                    default
                } else {
                    FieldValue::TextList(values.into_iter().map(str::to_string).collect())
                }
            }
            TableImpl::Formats(t) => {
                let values = t.formats_for_book(book_id);
                if values.is_empty() {
                    default
                } else {
                    FieldValue::TextList(values.into_iter().map(str::to_string).collect())
                }
            }
            TableImpl::Identifiers(t) => {
                let pairs = t.for_book(book_id);
                if pairs.is_empty() {
                    default
                } else {
                    FieldValue::Identifiers(pairs.iter().cloned().collect())
                }
            }
            TableImpl::Composite(t) => t.cached(book_id).map(|s| FieldValue::Scalar(Scalar::Text(s.to_string()))).unwrap_or(default),
            TableImpl::Virtual(_) => default,
        }
    }

    /// Linked item ids, in link order where the shape carries one.
    pub fn ids_for_book(&self, table: &TableImpl, book_id: BookId) -> Vec<ItemId> {
        match table {
            TableImpl::OneToOne(t) => t.book_col_map.get(&book_id).into_iter().cloned().collect(),
            TableImpl::ManyToOne(t) => t.id_for_book(book_id).into_iter().collect(),
            TableImpl::ManyToMany(t) => t.entries_for_book(book_id).iter().map(|e| e.item_id).collect(),
            TableImpl::Authors(t) => t.base.entries_for_book(book_id).iter().map(|e| e.item_id).collect(),
            TableImpl::OneToMany(t) => t.book_col_map.get(&book_id).cloned().unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    pub fn books_for(&self, table: &TableImpl, item_id: ItemId) -> HashSet<BookId> {
        match table {
            TableImpl::OneToOne(t) => t.books_for(item_id).into_iter().collect(),
            TableImpl::ManyToOne(t) => t.books_for(item_id),
            TableImpl::ManyToMany(t) => t.books_for(item_id),
            TableImpl::Authors(t) => t.base.books_for(item_id),
            _ => HashSet::new(),
        }
    }

    /// A comparable key for multisort:
    /// title-like fields use their precomputed `sort` value where
    /// present, everything else falls back to case-folded text.
    pub fn sort_key_for(&self, table: &TableImpl, book_id: BookId) -> Vec<String> {
        match self.for_book(table, book_id, FieldValue::Absent) {
            FieldValue::Scalar(Scalar::Text(s)) => sort_key(&s),
            FieldValue::TextList(list) => sort_key(&list.join(" ")),
            FieldValue::SeriesValue { name, .. } => sort_key(&name),
            _ => Vec::new(),
        }
    }

    pub fn iter_searchable_values<'a>(&self, table: &'a TableImpl, book_ids: &[BookId]) -> Vec<(String, HashSet<BookId>)> {
        let wanted: HashSet<BookId> = book_ids.iter().copied().collect();
        match table {
            TableImpl::ManyToOne(t) => t
                .id_map
                .iter()
                .map(|(id, value)| (value.clone(), t.books_for(*id).into_iter().filter(|b| wanted.contains(b)).collect()))
                .collect(),
            TableImpl::ManyToMany(t) => t
                .id_map
                .iter()
                .map(|(id, value)| (value.clone(), t.books_for(*id).into_iter().filter(|b| wanted.contains(b)).collect()))
                .collect(),
            TableImpl::Authors(t) => t
                .base
                .id_map
                .iter()
                .map(|(id, value)| (value.clone(), t.base.books_for(*id).into_iter().filter(|b| wanted.contains(b)).collect()))
                .collect(),
            _ => Vec::new(),
        }
    }
}
