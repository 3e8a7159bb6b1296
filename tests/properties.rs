//! Property-style checks against the public `CacheController` API:
//! round-tripping, idempotence, case folding, invariant enforcement,
//! dirty-queue bookkeeping, and concurrent-writer safety.

use bibliocache::cache::controller::CacheController;
use bibliocache::core::config::Config;
use bibliocache::core::types::{FieldValue, Scalar};
use bibliocache::store::memory::MemoryStore;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;

fn new_controller() -> Arc<CacheController> {
    let store = Arc::new(MemoryStore::new());
    let controller = Arc::new(CacheController::new(store, Config::default()));
    controller.init().unwrap();
    controller
}

fn set_one(controller: &CacheController, book: bibliocache::BookId, name: &str, value: FieldValue) -> std::collections::HashSet<bibliocache::BookId> {
    let mut fields = BTreeMap::new();
    fields.insert(name.to_string(), value);
    controller.set_metadata(book, fields).unwrap()
}

#[test]
fn round_trips_a_scalar_and_a_list_field() {
    let controller = new_controller();
    let book = controller.create_book_entry("Round Trip", &[]).unwrap();

    set_one(&controller, book, "publisher", FieldValue::Scalar(Scalar::Text("Orbit".to_string())));
    assert_eq!(controller.field_for("publisher", book, FieldValue::Absent), FieldValue::Scalar(Scalar::Text("Orbit".to_string())));

    set_one(&controller, book, "tags", FieldValue::TextList(vec!["sci-fi".to_string(), "space opera".to_string()]));
    assert_eq!(
        controller.field_for("tags", book, FieldValue::Absent),
        FieldValue::TextList(vec!["sci-fi".to_string(), "space opera".to_string()])
    );
}

#[test]
fn setting_the_same_value_twice_reports_no_change_the_second_time() {
    let controller = new_controller();
    let book = controller.create_book_entry("Idempotent", &[]).unwrap();

    let first = set_one(&controller, book, "title", FieldValue::Scalar(Scalar::Text("New Title".to_string())));
    assert_eq!(first.len(), 1);

    let second = set_one(&controller, book, "title", FieldValue::Scalar(Scalar::Text("New Title".to_string())));
    assert!(second.is_empty());
}

#[test]
fn tags_differing_only_in_case_share_one_item_id() {
    let controller = new_controller();
    let book_a = controller.create_book_entry("A", &[]).unwrap();
    let book_b = controller.create_book_entry("B", &[]).unwrap();

    set_one(&controller, book_a, "tags", FieldValue::TextList(vec!["scifi".to_string()]));
    let id_lower = controller.get_item_id("tags", "scifi").unwrap();

    set_one(&controller, book_b, "tags", FieldValue::TextList(vec!["SciFi".to_string()]));
    let id_mixed = controller.get_item_id("tags", "SciFi").unwrap();

    assert_eq!(id_lower, id_mixed);
    assert_eq!(controller.all_field_ids("tags").len(), 1);
}

#[test]
fn a_book_may_carry_more_than_one_language_with_only_the_first_as_primary() {
    let controller = new_controller();
    let book = controller.create_book_entry("Polyglot", &[]).unwrap();

    set_one(&controller, book, "languages", FieldValue::TextList(vec!["eng".to_string(), "fra".to_string()]));
    assert_eq!(controller.field_for("languages", book, FieldValue::Absent), FieldValue::TextList(vec!["eng".to_string(), "fra".to_string()]));
    assert_eq!(controller.field_ids_for("languages", book).len(), 2);
}

#[test]
fn dirty_queue_tracks_changed_books_and_clears_by_sequence() {
    let controller = new_controller();
    let book = controller.create_book_entry("Fresh", &[]).unwrap();

    // `create_book_entry` is the only write so far; it marks the book
    // dirty exactly once, so this is the controller's very first
    // sequence number.
    assert_eq!(controller.dirty_queue_length(), 1);
    assert!(!controller.clear_dirtied(book, 0));
    assert_eq!(controller.dirty_queue_length(), 1);
    assert!(controller.clear_dirtied(book, 1));
    assert_eq!(controller.dirty_queue_length(), 0);

    let affected = set_one(&controller, book, "title", FieldValue::Scalar(Scalar::Text("Fresh Title".to_string())));
    assert_eq!(affected.len(), 1);
    assert_eq!(controller.dirty_queue_length(), 1);
}

#[test]
fn concurrent_writers_each_setting_a_distinct_books_tags_lose_nothing() {
    let controller = new_controller();
    let books: Vec<_> = (0..8).map(|i| controller.create_book_entry(&format!("Book {i}"), &[]).unwrap()).collect();

    std::thread::scope(|scope| {
        for (i, book) in books.iter().enumerate() {
            let controller = Arc::clone(&controller);
            let book = *book;
            scope.spawn(move || {
                let mut fields = BTreeMap::new();
                fields.insert("tags".to_string(), FieldValue::TextList(vec![format!("tag-{i}")]));
                controller.set_metadata(book, fields).unwrap();
            });
        }
    });

    let mut names = controller.all_field_names("tags");
    names.sort();
    let mut expected: Vec<String> = (0..8).map(|i| format!("tag-{i}")).collect();
    expected.sort();
    assert_eq!(names, expected);

    for (i, book) in books.iter().enumerate() {
        assert_eq!(controller.field_for("tags", *book, FieldValue::Absent), FieldValue::TextList(vec![format!("tag-{i}")]));
    }
}

/// Randomized idempotence: for a spread of random tag sets drawn
/// from a small vocabulary, re-applying the same `set_metadata` call a
/// book already has is always a no-op, regardless of which subset or
/// ordering came up.
#[test]
fn idempotence_holds_across_random_tag_sets() {
    let vocabulary = ["fiction", "mystery", "space opera", "noir", "classic", "debut"];
    let mut rng = rand::thread_rng();
    let controller = new_controller();

    for trial in 0..20 {
        let book = controller.create_book_entry(&format!("Trial {trial}"), &[]).unwrap();
        let mut pool = vocabulary.to_vec();
        pool.shuffle(&mut rng);
        let take = rng.gen_range(1..=vocabulary.len());
        let tags: Vec<String> = pool.into_iter().take(take).map(str::to_string).collect();

        let first = set_one(&controller, book, "tags", FieldValue::TextList(tags.clone()));
        assert_eq!(first.len(), 1, "first write of a fresh tag set always changes the book");

        let second = set_one(&controller, book, "tags", FieldValue::TextList(tags.clone()));
        assert!(second.is_empty(), "re-applying the same tag set must report no change");

        let mut stored = match controller.field_for("tags", book, FieldValue::Absent) {
            FieldValue::TextList(list) => list,
            other => panic!("expected a tag list, got {other:?}"),
        };
        stored.sort();
        let mut expected = tags;
        expected.sort();
        assert_eq!(stored, expected);
    }
}
