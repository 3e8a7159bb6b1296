use crate::core::types::{DataType, LinkShape, TableShape};
use serde::{Deserialize, Serialize};

/// The three separator conventions a multi-valued text field needs
///: how values are joined when read from the cache, how a UI
/// splits free text back into values, and how values are rejoined for
/// display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeparatorPolicy {
    pub cache_to_list: String,
    pub ui_to_list: String,
    pub list_to_ui: String,
}

impl SeparatorPolicy {
    pub fn comma() -> Self {
        SeparatorPolicy {
            cache_to_list: ",".to_string(),
            ui_to_list: ",".to_string(),
            list_to_ui: ", ".to_string(),
        }
    }

    /// Authors use `&` as the storage/display separator and recognize a
    /// configurable split regex on ingest.
    pub fn ampersand() -> Self {
        SeparatorPolicy {
            cache_to_list: "&".to_string(),
            ui_to_list: "&".to_string(),
            list_to_ui: " & ".to_string(),
        }
    }
}

/// Rendering hints for a field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisplayConfig {
    pub sort_order: Option<String>,
    pub template: Option<String>,
    pub description: Option<String>,
}

/// Everything the engine needs to know about one field, builtin or
/// custom.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMetadata {
    pub name: String,
    pub datatype: DataType,
    pub is_multiple: bool,
    pub separators: Option<SeparatorPolicy>,
    /// Whether the field's values live in their own table, referenced
    /// through a link table, as opposed to a scalar column on titles.
    pub normalized: bool,
    pub display: DisplayConfig,
    pub is_custom: bool,
    pub custom_num: Option<i64>,
    pub column: String,
    pub table: String,
    pub link_column: Option<String>,
    pub link_table: Option<String>,
    pub is_category: bool,
    pub clear_unused: bool,
    pub table_shape: TableShape,
    pub link_shape: Option<LinkShape>,
}

impl FieldMetadata {
    pub fn builtin_scalar(name: &str, table: &str, column: &str, datatype: DataType) -> Self {
        FieldMetadata {
            name: name.to_string(),
            datatype,
            is_multiple: false,
            separators: None,
            normalized: false,
            display: DisplayConfig::default(),
            is_custom: false,
            custom_num: None,
            column: column.to_string(),
            table: table.to_string(),
            link_column: None,
            link_table: None,
            is_category: false,
            clear_unused: false,
            table_shape: TableShape::OneToOneInTitles,
            link_shape: None,
        }
    }

    pub fn builtin_many_to_one(name: &str, table: &str, link_table: &str, is_category: bool) -> Self {
        FieldMetadata {
            name: name.to_string(),
            datatype: DataType::Text,
            is_multiple: false,
            separators: None,
            normalized: true,
            display: DisplayConfig::default(),
            is_custom: false,
            custom_num: None,
            column: "name".to_string(),
            table: table.to_string(),
            link_column: None,
            link_table: Some(link_table.to_string()),
            is_category,
            clear_unused: true,
            table_shape: TableShape::ManyToOne,
            link_shape: Some(LinkShape::Priority),
        }
    }

    pub fn builtin_many_to_many(name: &str, table: &str, link_table: &str, link_shape: LinkShape, is_category: bool) -> Self {
        FieldMetadata {
            name: name.to_string(),
            datatype: DataType::Text,
            is_multiple: true,
            separators: Some(if name == "authors" { SeparatorPolicy::ampersand() } else { SeparatorPolicy::comma() }),
            normalized: true,
            display: DisplayConfig::default(),
            is_custom: false,
            custom_num: None,
            column: "name".to_string(),
            table: table.to_string(),
            link_column: None,
            link_table: Some(link_table.to_string()),
            is_category,
            clear_unused: true,
            table_shape: TableShape::ManyToMany,
            link_shape: Some(link_shape),
        }
    }

    pub fn builtin_one_to_many(name: &str, table: &str) -> Self {
        FieldMetadata {
            name: name.to_string(),
            datatype: DataType::Text,
            is_multiple: true,
            separators: None,
            normalized: true,
            display: DisplayConfig::default(),
            is_custom: false,
            custom_num: None,
            column: "text".to_string(),
            table: table.to_string(),
            link_column: None,
            link_table: None,
            is_category: false,
            clear_unused: false,
            table_shape: TableShape::OneToMany,
            link_shape: None,
        }
    }

    pub fn composite(name: &str, template: &str) -> Self {
        FieldMetadata {
            name: name.to_string(),
            datatype: DataType::Composite,
            is_multiple: false,
            separators: None,
            normalized: false,
            display: DisplayConfig {
                template: Some(template.to_string()),
                ..Default::default()
            },
            is_custom: true,
            custom_num: None,
            column: String::new(),
            table: String::new(),
            link_column: None,
            link_table: None,
            is_category: false,
            clear_unused: false,
            table_shape: TableShape::Composite,
            link_shape: None,
        }
    }

    pub fn virtual_field(name: &str) -> Self {
        FieldMetadata {
            name: name.to_string(),
            datatype: DataType::Float,
            is_multiple: false,
            separators: None,
            normalized: false,
            display: DisplayConfig::default(),
            is_custom: false,
            custom_num: None,
            column: String::new(),
            table: String::new(),
            link_column: None,
            link_table: None,
            is_category: false,
            clear_unused: false,
            table_shape: TableShape::Virtual,
            link_shape: None,
        }
    }
}
