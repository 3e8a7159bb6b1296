use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identity of a Book, shared across the titles/books tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BookId(pub i64);

impl BookId {
    pub fn new(id: i64) -> Self {
        BookId(id)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl From<i64> for BookId {
    fn from(id: i64) -> Self {
        BookId(id)
    }
}

/// Identity of a row in any normalized (non-titles) table: a creator,
/// series, publisher, tag, language, custom-column item, etc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(pub i64);

impl ItemId {
    pub fn new(id: i64) -> Self {
        ItemId(id)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl From<i64> for ItemId {
    fn from(id: i64) -> Self {
        ItemId(id)
    }
}

/// Field datatypes recognized by the Field Metadata Registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Text,
    Int,
    Float,
    Bool,
    Rating,
    Datetime,
    Series,
    Composite,
    Enumeration,
    Identifiers,
    Languages,
}

/// A single scalar carried by a row column or a link-table aux column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    DateTime(DateTime<Utc>),
    Null,
}

impl Scalar {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Scalar::Float(f) => Some(*f),
            Scalar::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }
}

/// A single value of a (possibly multi-valued) field, as produced by a
/// writer adapter and as returned by a Field reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// A scalar field (title, pubdate, rating, ...).
    Scalar(Scalar),
    /// An ordered list of text items (authors, tags, series names seen
    /// through a ManyToMany link in link order).
    TextList(Vec<String>),
    /// An ordered, insertion-preserving map (identifiers: type -> value).
    Identifiers(BTreeMap<String, String>),
    /// A series-like value: the display name plus its numeric index.
    SeriesValue { name: String, index: f64 },
    Absent,
}

impl FieldValue {
    /// Flatten to display text for a formatter template placeholder
    ///, following each datatype's
    /// `list-to-ui` separator policy for multi-valued fields.
    pub fn display_text(&self) -> String {
        match self {
            FieldValue::Scalar(Scalar::Text(s)) => s.clone(),
            FieldValue::Scalar(Scalar::Int(n)) => n.to_string(),
            FieldValue::Scalar(Scalar::Float(f)) => f.to_string(),
            FieldValue::Scalar(Scalar::Bool(b)) => b.to_string(),
            FieldValue::Scalar(Scalar::DateTime(dt)) => dt.to_rfc3339(),
            FieldValue::Scalar(Scalar::Null) => String::new(),
            FieldValue::TextList(list) => list.join(" & "),
            FieldValue::Identifiers(map) => map.iter().map(|(k, v)| format!("{k}:{v}")).collect::<Vec<_>>().join(", "),
            FieldValue::SeriesValue { name, index } => format!("{name} [{index}]"),
            FieldValue::Absent => String::new(),
        }
    }
}

/// The link shape of a relation mediated by a link table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkShape {
    /// Set semantics, no ordering, no type discriminator (tag<->title).
    Plain,
    /// Ordered by a priority column (publisher<->title).
    Priority,
    /// Discriminated by a type column, no ordering (language<->title).
    Typed,
    /// Both ordered and discriminated (creator<->title, note<->title).
    TypedPriority,
}

/// A tagged shape dispatch enum, replacing per-class virtual dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableShape {
    OneToOneInTitles,
    OneToOneInOther,
    ManyToOne,
    OneToMany,
    ManyToMany,
    Composite,
    Virtual,
}

/// A single link-table row's auxiliary data, present only for the
/// shapes that carry it (priority / typed / typed+priority).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkAux {
    pub priority: Option<i64>,
    pub link_type: Option<String>,
    pub index: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
}
