use crate::core::error::{Error, Result};
use crate::core::types::{DataType, LinkShape};
use crate::registry::field_meta::FieldMetadata;
use std::collections::BTreeMap;

/// Static and dynamic descriptions of every field, builtin and custom.
/// Dynamic state (user categories, grouped search terms) is
/// reconstructed from preferences on `init()` and on any preference
/// write that names them.
pub struct FieldMetadataRegistry {
    fields: BTreeMap<String, FieldMetadata>,
    /// @-prefixed virtual tag-browser categories -> search expression.
    user_categories: BTreeMap<String, String>,
    /// Synonym groups: group name -> member field names.
    grouped_search_terms: BTreeMap<String, Vec<String>>,
    next_custom_num: i64,
}

impl FieldMetadataRegistry {
    pub fn new() -> Self {
        let mut reg = FieldMetadataRegistry {
            fields: BTreeMap::new(),
            user_categories: BTreeMap::new(),
            grouped_search_terms: BTreeMap::new(),
            next_custom_num: 1,
        };
        reg.register_builtins();
        reg
    }

    fn register_builtins(&mut self) {
        use crate::core::types::TableShape;
        let scalar = [
            ("title", "titles", "title"),
            ("sort", "titles", "sort"),
            ("author_sort", "titles", "author_sort"),
            ("series_index", "titles", "series_index"),
            ("timestamp", "titles", "timestamp"),
            ("pubdate", "titles", "pubdate"),
            ("uuid", "titles", "uuid"),
            ("path", "titles", "path"),
            ("last_modified", "titles", "last_modified"),
            ("cover", "titles", "has_cover"),
        ];
        for (name, table, column) in scalar {
            let dt = match name {
                "series_index" => DataType::Float,
                "timestamp" | "pubdate" | "last_modified" => DataType::Datetime,
                "cover" => DataType::Bool,
                "uuid" => DataType::Text,
                _ => DataType::Text,
            };
            self.fields.insert(name.to_string(), FieldMetadata::builtin_scalar(name, table, column, dt));
        }
        self.fields.insert("notes".to_string(), FieldMetadata::builtin_one_to_many("notes", "notes"));

        for (name, table, link, is_category) in [
            ("series", "series", "books_series_link", true),
            ("publisher", "publishers", "books_publishers_link", true),
            ("subjects", "subjects", "books_subjects_link", true),
            ("synopses", "synopses", "books_synopses_link", false),
            ("genre", "genres", "books_genres_link", true),
        ] {
            self.fields.insert(name.to_string(), FieldMetadata::builtin_many_to_one(name, table, link, is_category));
        }

        self.fields.insert("comments".to_string(), FieldMetadata::builtin_one_to_many("comments", "comments"));

        for (name, table, link, shape, is_category) in [
            ("authors", "authors", "books_authors_link", LinkShape::TypedPriority, true),
            ("tags", "tags", "books_tags_link", LinkShape::Plain, true),
            ("formats", "data", "books_formats_link", LinkShape::Priority, false),
            ("identifiers", "identifiers", "books_identifiers_link", LinkShape::Typed, false),
            ("languages", "languages", "books_languages_link", LinkShape::Typed, false),
            ("rating", "ratings", "books_ratings_link", LinkShape::Plain, true),
        ] {
            self.fields
                .insert(name.to_string(), FieldMetadata::builtin_many_to_many(name, table, link, shape, is_category));
        }

        // Derived "titles_aggregate" rows the Maintainer keeps current
        // whenever a dependency is written.
        for name in ["creator_tags", "title_tags", "series_tags", "genre_tags", "identifier_map", "publisher_tags"] {
            self.fields.insert(name.to_string(), FieldMetadata::composite(name, ""));
        }

        self.fields.insert("size".to_string(), FieldMetadata::virtual_field("size"));
        self.fields.insert("ondevice".to_string(), FieldMetadata::virtual_field("ondevice"));
        self.fields.insert(
            "title_sort_index".to_string(),
            FieldMetadata {
                table_shape: TableShape::Virtual,
                ..FieldMetadata::virtual_field("title_sort_index")
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&FieldMetadata> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.fields.keys().cloned().collect()
    }

    pub fn insert(&mut self, meta: FieldMetadata) {
        self.fields.insert(meta.name.clone(), meta);
    }

    pub fn remove(&mut self, name: &str) {
        self.fields.remove(name);
    }

    /// Register a custom column, injecting its table (and link table, if
    /// multi-valued) at runtime.
    pub fn create_custom_column(&mut self, name: &str, datatype: DataType, is_multiple: bool, is_series: bool) -> Result<FieldMetadata> {
        if self.fields.contains_key(name) {
            return Err(Error::input(format!("field `{name}` already exists")));
        }
        let custom_num = self.next_custom_num;
        self.next_custom_num += 1;
        let table = format!("custom_column_{custom_num}");
        let meta = if is_multiple {
            let link = format!("{table}_link");
            FieldMetadata {
                custom_num: Some(custom_num),
                ..FieldMetadata::builtin_many_to_many(name, &table, &link, LinkShape::Plain, true)
            }
        } else if datatype == DataType::Composite {
            FieldMetadata {
                custom_num: Some(custom_num),
                ..FieldMetadata::composite(name, "")
            }
        } else {
            let mut m = FieldMetadata::builtin_scalar(name, "custom_columns", &table, datatype);
            m.is_custom = true;
            m.custom_num = Some(custom_num);
            m
        };
        self.fields.insert(name.to_string(), meta.clone());
        if is_series {
            let index_name = format!("{name}_index");
            self.fields.insert(
                index_name.clone(),
                FieldMetadata {
                    name: index_name,
                    datatype: DataType::Float,
                    is_custom: true,
                    custom_num: Some(custom_num),
                    ..FieldMetadata::virtual_field("series_index")
                },
            );
        }
        Ok(meta)
    }

    pub fn delete_custom_column(&mut self, name: &str) -> Result<()> {
        let meta = self.fields.remove(name).ok_or_else(|| Error::not_found(format!("no field `{name}`")))?;
        if !meta.is_custom {
            return Err(Error::input(format!("`{name}` is not a custom column")));
        }
        self.fields.remove(&format!("{name}_index"));
        Ok(())
    }

    pub fn user_categories(&self) -> &BTreeMap<String, String> {
        &self.user_categories
    }

    /// Load user categories from prefs, case-merging any pair that
    /// differs only by case so two categories like
    /// "Read" and "read" collapse into one, keeping the first-seen
    /// display form.
    pub fn load_user_categories(&mut self, categories: BTreeMap<String, String>) {
        let mut merged: BTreeMap<String, (String, String)> = BTreeMap::new();
        for (name, expr) in categories {
            let key = name.to_lowercase();
            merged.entry(key).or_insert((name, expr));
        }
        self.user_categories = merged.into_values().collect();
    }

    pub fn grouped_search_terms(&self) -> &BTreeMap<String, Vec<String>> {
        &self.grouped_search_terms
    }

    pub fn load_grouped_search_terms(&mut self, groups: BTreeMap<String, Vec<String>>) {
        self.grouped_search_terms = groups;
    }
}

impl Default for FieldMetadataRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_cover_every_declared_field_shape() {
        let reg = FieldMetadataRegistry::new();
        for name in ["title", "sort", "series", "publisher", "authors", "tags", "formats", "identifiers", "languages", "rating", "size", "ondevice", "comments"] {
            assert!(reg.contains(name), "missing builtin field {name}");
        }
    }

    #[test]
    fn custom_column_rejects_duplicate_name() {
        let mut reg = FieldMetadataRegistry::new();
        assert!(reg.create_custom_column("title", DataType::Text, false, false).is_err());
    }

    #[test]
    fn custom_series_injects_index_field() {
        let mut reg = FieldMetadataRegistry::new();
        reg.create_custom_column("myseries", DataType::Series, false, true).unwrap();
        assert!(reg.contains("myseries_index"));
    }

    #[test]
    fn user_category_case_merge_keeps_first_seen() {
        let mut reg = FieldMetadataRegistry::new();
        let mut cats = BTreeMap::new();
        cats.insert("Read".to_string(), "tags:read".to_string());
        cats.insert("read".to_string(), "tags:READ".to_string());
        reg.load_user_categories(cats);
        assert_eq!(reg.user_categories().len(), 1);
    }
}
