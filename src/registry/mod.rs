pub mod field_meta;
pub mod registry;

pub use field_meta::{DisplayConfig, FieldMetadata, SeparatorPolicy};
pub use registry::FieldMetadataRegistry;
