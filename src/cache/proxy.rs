use crate::cache::controller::CacheController;
use crate::core::types::{BookId, FieldValue};

/// A lazy view over one book's metadata: fields resolve only when
/// accessed, rather than eagerly materializing every field into a
/// plain struct. Formatter
/// templates hold one of these per book instead of a fully-resolved
/// metadata object.
pub struct ProxyMetadata<'a> {
    controller: &'a CacheController,
    pub book_id: BookId,
}

impl<'a> ProxyMetadata<'a> {
    pub fn new(controller: &'a CacheController, book_id: BookId) -> Self {
        ProxyMetadata { controller, book_id }
    }

    pub fn get(&self, field: &str) -> FieldValue {
        self.controller.field_for(field, self.book_id, FieldValue::Absent)
    }
}
