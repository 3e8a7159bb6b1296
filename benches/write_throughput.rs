use bibliocache::cache::controller::CacheController;
use bibliocache::core::config::Config;
use bibliocache::core::types::{FieldValue, Scalar};
use bibliocache::store::memory::MemoryStore;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::BTreeMap;
use std::sync::Arc;

fn new_controller() -> Arc<CacheController> {
    let store = Arc::new(MemoryStore::new());
    let controller = Arc::new(CacheController::new(store, Config::default()));
    controller.init().unwrap();
    controller
}

/// Single-book creation, the cheapest possible write: one Store insert
/// plus a cache row.
fn bench_create_book_entry(c: &mut Criterion) {
    let controller = new_controller();
    let mut i = 0u64;
    c.bench_function("create_book_entry", |b| {
        b.iter(|| {
            i += 1;
            controller.create_book_entry(black_box(&format!("Book {i}")), black_box(&["Author Name".to_string()])).unwrap();
        });
    });
}

/// Batch creation at increasing sizes, to see how throughput scales
/// with the size of a single `add_books` call.
fn bench_add_books_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_books_batch");
    for batch_size in [10, 50, 200].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(batch_size), batch_size, |b, &batch_size| {
            let controller = new_controller();
            let mut counter = 0u64;
            b.iter(|| {
                let entries: Vec<(String, Vec<String>)> = (0..batch_size)
                    .map(|_| {
                        counter += 1;
                        (format!("Book {counter}"), vec![format!("Author {counter}")])
                    })
                    .collect();
                controller.add_books(black_box(&entries)).unwrap();
            });
        });
    }
    group.finish();
}

/// `set_metadata` throughput against an already-populated library: the
/// path that exercises the full writer protocol (Store mutation, cache
/// mutation, composite invalidation, dirty marking) per call.
fn bench_set_metadata(c: &mut Criterion) {
    let controller = new_controller();
    let book_id = controller.create_book_entry("Consider Phlebas", &["Iain M. Banks".to_string()]).unwrap();

    c.bench_function("set_metadata_publisher_and_tags", |b| {
        b.iter(|| {
            let mut fields = BTreeMap::new();
            fields.insert("publisher".to_string(), FieldValue::Scalar(Scalar::Text("Orbit".to_string())));
            fields.insert("tags".to_string(), FieldValue::TextList(vec!["sci-fi".to_string(), "space opera".to_string()]));
            controller.set_metadata(black_box(book_id), black_box(fields)).unwrap();
        });
    });
}

/// Many-author writes, which exercise the item-allocation path on the
/// Authors table most heavily.
fn bench_set_field_authors(c: &mut Criterion) {
    let controller = new_controller();
    let book_id = controller.create_book_entry("The Culture", &[]).unwrap();
    let mut i = 0u64;

    c.bench_function("set_field_authors_new_author", |b| {
        b.iter(|| {
            i += 1;
            let mut fields = BTreeMap::new();
            fields.insert("authors".to_string(), FieldValue::TextList(vec![format!("Author {i}")]));
            controller.set_metadata(black_box(book_id), black_box(fields)).unwrap();
        });
    });
}

criterion_group!(benches, bench_create_book_entry, bench_add_books_batch, bench_set_metadata, bench_set_field_authors);
criterion_main!(benches);
