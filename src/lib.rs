pub mod cache;
pub mod core;
pub mod fields;
pub mod maintainer;
pub mod normalize;
pub mod registry;
pub mod store;
pub mod tables;
pub mod writers;

pub use cache::CacheController;
pub use core::config::Config;
pub use core::error::{Error, ErrorKind, Result};
pub use core::types::{BookId, DataType, FieldValue, ItemId, LinkShape, Scalar, TableShape};
pub use store::driver::StoreDriver;

/*
┌──────────────────────────────────────────────────────────────────────────┐
│                         CacheController struct                           │
│  store: Arc<dyn StoreDriver>        // persistent relational backend      │
│  config: Config                     // engine tunables                   │
│  registry: RwLock<FieldMetadataRegistry>                                 │
│  state: RwLock<CacheState>          // one lock over every Table/Field    │
└──────────────────────────────────────────────────────────────────────────┘

Three layers sit under that single lock:

  1. field/table cache (`tables::*`, `fields::*`, `registry::*`): a
     normalized, in-memory projection of the Store, one concrete Table
     shape per kind of relation (`OneToOne`, `ManyToOne`, `OneToMany`,
     `ManyToMany`, plus the `Authors`/`Formats`/`Identifiers`
     specializations and `Composite`/`Virtual`), wrapped in the
     `TableImpl` tagged sum. A `Field` reads through whichever `TableImpl`
     backs it without knowing its shape ahead of time.

  2. writer dispatch (`writers::*`): `dispatch(field_name, shape)` maps a
     field to one `WriterKind`; `CacheController`'s write-api methods
     hold one match arm per kind, each running the same eight-step
     protocol (adapt, preflight, precheck, case propagation, Store
     mutation, cache mutation, side effects, dirty marking).

  3. maintenance/consistency (`maintainer::*`): a background daemon
     draining dirty-record/dirty-interlink queues to recompute derived
     aggregates, merge duplicate items, and clean orphaned rows, keeping
     the cache consistent with itself without blocking writers.

  struct Row                      struct LinkEntry
  • table, id, store_id           • item_id: ItemId
  • cached column values          • aux: LinkAux (priority/type/...)

  enum TableImpl                  enum WriterKind
  • OneToOne / ManyToOne          • Title / AuthorSort / Uuid / Covers
  • OneToMany / ManyToMany        • Identifiers / Languages
  • Authors / Formats             • ManyToOne / ManyToMany / OneToMany
  • Identifiers                   • OneToOne / CustomSeriesIndex
  • Composite / Virtual           • Dummy (refuses writes)

  CacheController ──owns──> RwLock<CacheState> ──holds──> TableImpl, Field
       │
       ├──talks to──> dyn StoreDriver (row I/O, link CRUD, transactions)
       │
       └──feeds──> Maintainer ──drains──> DirtyRecord/DirtyInterlink queues
                        │
                        └──calls back into──> CacheController (recompute,
                                               merge_items, clean, fix_duplicates)
*/
