//! A minimal end-to-end walk through the public API: open a store,
//! spawn the maintainer so it's wired to the controller's writers, add
//! a book, set its authors and a custom field — each write pushes a
//! `DirtyRecord`/`DirtyInterlink` the maintainer picks up on its own —
//! then read the result back through a `ProxyMetadata` view.
//!
//! Run with `cargo run --example usage` once the crate is wired into a
//! real workspace (this file is not compiled as part of a test run
//! here, just a reference for how the pieces fit together).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bibliocache::cache::controller::CacheController;
use bibliocache::core::config::Config;
use bibliocache::core::types::{FieldValue, Scalar};
use bibliocache::maintainer::Maintainer;
use bibliocache::store::memory::MemoryStore;

fn main() -> bibliocache::Result<()> {
    tracing_subscriber::fmt::init();

    let store = Arc::new(MemoryStore::new());
    let controller = Arc::new(CacheController::new(store, Config::default()));
    controller.init()?;

    // Spawning the maintainer before any writes means `create_book_entry`
    // and `set_metadata` below already have somewhere to push their dirty
    // events; nothing further needs to tell it what changed.
    let maintainer = Maintainer::spawn(controller.clone(), Duration::from_millis(50));

    let book_id = controller.create_book_entry("The Player of Games", &["Iain M. Banks".to_string()])?;

    let mut fields = BTreeMap::new();
    fields.insert("publisher".to_string(), FieldValue::Scalar(Scalar::Text("Orbit".to_string())));
    fields.insert("languages".to_string(), FieldValue::TextList(vec!["eng".to_string()]));
    controller.set_metadata(book_id, fields)?;

    let meta = controller.get_proxy_metadata(book_id);
    println!("title: {:?}", meta.get("title"));
    println!("author_sort: {:?}", meta.get("author_sort"));
    println!("publisher: {:?}", meta.get("publisher"));

    std::thread::sleep(Duration::from_millis(100));
    drop(maintainer);

    Ok(())
}
