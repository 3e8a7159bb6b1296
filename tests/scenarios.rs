//! End-to-end scenarios against the public `CacheController` API, backed
//! by `MemoryStore`. Each test builds a fresh controller so scenarios
//! never interact with each other's state.

use bibliocache::cache::controller::CacheController;
use bibliocache::core::config::Config;
use bibliocache::core::types::{FieldValue, Scalar};
use bibliocache::store::memory::MemoryStore;
use std::collections::BTreeMap;
use std::sync::Arc;

fn new_controller() -> CacheController {
    let store = Arc::new(MemoryStore::new());
    let controller = CacheController::new(store, Config::default());
    controller.init().unwrap();
    controller
}

#[test]
fn creating_a_book_derives_sort_and_author_sort() {
    let controller = new_controller();
    let book = controller.create_book_entry("The Expanse", &["James S.A. Corey".to_string()]).unwrap();

    assert_eq!(controller.field_for("sort", book, FieldValue::Absent), FieldValue::Scalar(Scalar::Text("Expanse, The".to_string())));
    assert_eq!(controller.field_for("author_sort", book, FieldValue::Absent), FieldValue::Scalar(Scalar::Text("Corey, James S.A.".to_string())));
}

#[test]
fn adding_formats_puts_the_newest_file_at_priority_one() {
    let controller = new_controller();
    let book = controller.create_book_entry("Leviathan Wakes", &[]).unwrap();

    controller.add_format(book, "EPUB", 1000, "/library/leviathan-1.epub").unwrap();
    controller.add_format(book, "EPUB", 2000, "/library/leviathan-2.epub").unwrap();

    assert_eq!(controller.formats(book), vec!["EPUB_1".to_string(), "EPUB_2".to_string()]);
    assert_eq!(controller.format_floc(book, "EPUB_1"), Some("/library/leviathan-2.epub".to_string()));
    assert_eq!(controller.format_floc(book, "EPUB_2"), Some("/library/leviathan-1.epub".to_string()));
}

#[test]
fn identifiers_are_normalized_by_type() {
    let controller = new_controller();
    let book = controller.create_book_entry("Consider Phlebas", &[]).unwrap();

    let mut ids = BTreeMap::new();
    ids.insert("ISBN".to_string(), "978-0-316-12908-4".to_string());
    let mut fields = BTreeMap::new();
    fields.insert("identifiers".to_string(), FieldValue::Identifiers(ids));
    controller.set_metadata(book, fields).unwrap();

    let mut expected = BTreeMap::new();
    expected.insert("isbn".to_string(), "9780316129084".to_string());
    assert_eq!(controller.field_for("identifiers", book, FieldValue::Absent), FieldValue::Identifiers(expected));
}

#[test]
fn merging_tags_via_rename_items_unions_their_books() {
    let controller = new_controller();
    let book_a = controller.create_book_entry("Book A", &[]).unwrap();
    let book_b = controller.create_book_entry("Book B", &[]).unwrap();

    let mut fields_a = BTreeMap::new();
    fields_a.insert("tags".to_string(), FieldValue::TextList(vec!["fiction".to_string()]));
    controller.set_metadata(book_a, fields_a).unwrap();

    let mut fields_b = BTreeMap::new();
    fields_b.insert("tags".to_string(), FieldValue::TextList(vec!["mystery".to_string()]));
    controller.set_metadata(book_b, fields_b).unwrap();

    let id_fiction = controller.get_item_id("tags", "fiction").unwrap();
    let id_mystery = controller.get_item_id("tags", "mystery").unwrap();

    let mut renames = std::collections::HashMap::new();
    renames.insert(id_mystery, "fiction".to_string());
    controller.rename_items("tags", &renames).unwrap();

    assert_eq!(controller.get_item_id("tags", "mystery"), None);
    let books = controller.books_for_field("tags", id_fiction);
    assert!(books.contains(&book_a) && books.contains(&book_b));
    assert_eq!(controller.all_field_ids("tags").len(), 1);
}

#[test]
fn setting_a_series_assigns_and_then_preserves_the_index() {
    let controller = new_controller();
    let book = controller.create_book_entry("Foundation's Edge", &[]).unwrap();

    let mut fields = BTreeMap::new();
    fields.insert("series".to_string(), FieldValue::Scalar(Scalar::Text("Foundation".to_string())));
    controller.set_metadata(book, fields).unwrap();
    assert_eq!(controller.field_for("series", book, FieldValue::Absent), FieldValue::Scalar(Scalar::Text("Foundation".to_string())));
    assert_eq!(controller.field_for("series_index", book, FieldValue::Absent), FieldValue::Scalar(Scalar::Float(1.0)));

    // bump the index up before switching series
    let mut bump = BTreeMap::new();
    bump.insert("series_index".to_string(), FieldValue::Scalar(Scalar::Float(3.0)));
    controller.set_metadata(book, bump).unwrap();

    let mut fields = BTreeMap::new();
    fields.insert("series".to_string(), FieldValue::Scalar(Scalar::Text("Robot".to_string())));
    controller.set_metadata(book, fields).unwrap();
    assert_eq!(controller.field_for("series", book, FieldValue::Absent), FieldValue::Scalar(Scalar::Text("Robot".to_string())));
    assert_eq!(controller.field_for("series_index", book, FieldValue::Absent), FieldValue::Scalar(Scalar::Float(3.0)));
}

#[test]
fn removing_a_book_clears_every_reverse_map_and_the_cover_cache() {
    let controller = new_controller();
    let book = controller.create_book_entry("Hyperion", &["Dan Simmons".to_string()]).unwrap();
    controller.set_cover(book, true).unwrap();

    let mut fields = BTreeMap::new();
    fields.insert("tags".to_string(), FieldValue::TextList(vec!["sci-fi".to_string()]));
    controller.set_metadata(book, fields).unwrap();
    let tag_id = controller.get_item_id("tags", "sci-fi").unwrap();

    controller.remove_books(&[book]).unwrap();

    assert!(!controller.all_book_ids().contains(&book));
    assert!(controller.books_for_field("tags", tag_id).is_empty());
    assert_eq!(controller.cover(book), None);
    assert_eq!(controller.field_for("title", book, FieldValue::Absent), FieldValue::Absent);
}

#[test]
fn comments_persist_to_the_store_and_replace_on_rewrite() {
    use bibliocache::store::driver::StoreDriver;

    let store = Arc::new(MemoryStore::new());
    let controller = CacheController::new(store.clone(), Config::default());
    controller.init().unwrap();
    let book = controller.create_book_entry("The Diamond Age", &[]).unwrap();

    let mut fields = BTreeMap::new();
    fields.insert("comments".to_string(), FieldValue::TextList(vec!["A primer on nanotech.".to_string()]));
    controller.set_metadata(book, fields).unwrap();

    assert_eq!(controller.field_for("comments", book, FieldValue::Absent), FieldValue::TextList(vec!["A primer on nanotech.".to_string()]));
    let rows = store.all_rows("comments", None, false).unwrap();
    assert_eq!(rows.len(), 1);

    // Rewriting drops the old row rather than accumulating duplicates.
    let mut fields = BTreeMap::new();
    fields.insert("comments".to_string(), FieldValue::TextList(vec!["Revised synopsis.".to_string()]));
    controller.set_metadata(book, fields).unwrap();
    let rows = store.all_rows("comments", None, false).unwrap();
    assert_eq!(rows.len(), 1);

    controller.remove_books(&[book]).unwrap();
    assert!(store.all_rows("comments", None, false).unwrap().is_empty());
}

#[test]
fn title_templates_render_and_cache_per_book() {
    let controller = new_controller();
    let book = controller.create_book_entry("Snow Crash", &["Neal Stephenson".to_string()]).unwrap();

    let rendered = controller.render_title_template(book, "{title} by {authors}");
    assert_eq!(rendered, "Snow Crash by Neal Stephenson");
    // second call should hit the memoized path and return the same text
    assert_eq!(controller.render_title_template(book, "{title} by {authors}"), rendered);
}
