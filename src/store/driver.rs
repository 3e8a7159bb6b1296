use crate::core::error::Result;
use crate::core::types::{LinkAux, Scalar};
use std::collections::BTreeMap;
use std::path::Path;

/// A single row, keyed by column name. Every table's id column and its `datestamp`/`*_datestamp` column
/// appear here like any other column; the driver tells the core which
/// ones they are via `id_column`/`timestamp_column`.
pub type RowDict = BTreeMap<String, Scalar>;

/// One row of a link table: left id, right id, plus whatever auxiliary
/// columns its link shape carries. `aux` is all-`None` for a
/// plain (set-semantics) link shape.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkRow {
    pub left_id: i64,
    pub right_id: i64,
    pub aux: LinkAux,
}

impl LinkRow {
    pub fn plain(left_id: i64, right_id: i64) -> Self {
        LinkRow {
            left_id,
            right_id,
            aux: LinkAux::default(),
        }
    }
}

/// Opaque transaction handle. The core never inspects it; it only
/// threads it through `commit_transaction`/`rollback_transaction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHandle(pub u64);

/// The narrow contract a persistent relational store must satisfy.
/// Anything implementing this trait can back a
/// `CacheController` — the core never depends on a specific SQL engine.
pub trait StoreDriver: Send + Sync {
    /// Stable identity of this store instance, used by `Row` to hash
    /// and compare by `(store, table, id)` rather than by trait object
    /// pointer.
    fn store_id(&self) -> uuid::Uuid;

    // -- introspection --------------------------------------------------
    fn tables(&self) -> Vec<String>;
    fn columns(&self, table: &str) -> Result<Vec<String>>;
    fn id_column(&self, table: &str) -> Result<String>;
    fn timestamp_column(&self, table: &str) -> Result<Option<String>>;
    fn link_table(&self, a: &str, b: &str) -> Result<Option<String>>;
    fn link_columns(&self, a: &str, b: &str) -> Result<Option<(String, String)>>;

    // -- row I/O ----------------------------------------------------------
    fn get_row(&self, table: &str, id: i64) -> Result<Option<RowDict>>;
    fn get_blank_row(&self, table: &str) -> Result<RowDict>;
    fn insert_row(&self, table: &str, row: RowDict) -> Result<i64>;
    fn update_row(&self, table: &str, id: i64, row: RowDict) -> Result<()>;
    fn delete_by_id(&self, table: &str, ids: &[i64]) -> Result<()>;
    fn all_rows(&self, table: &str, order_by: Option<&str>, desc: bool) -> Result<Vec<(i64, RowDict)>>;

    /// Lazily iterate a table in bounded batches so a caller holding the
    /// iterator never pins an unbounded Store transaction.
    fn all_rows_iter(&self, table: &str, batch_size: usize) -> Result<Box<dyn Iterator<Item = (i64, RowDict)> + Send>>;

    // -- link table CRUD (structured, driver-portable without a SQL parser) --
    fn link_rows(&self, link_table: &str) -> Result<Vec<LinkRow>>;
    fn insert_link(&self, link_table: &str, row: LinkRow) -> Result<()>;
    fn delete_links(&self, link_table: &str, left_id: i64, right_ids: &[i64]) -> Result<()>;
    fn update_link_aux(&self, link_table: &str, left_id: i64, right_id: i64, aux: LinkAux) -> Result<()>;

    // -- batched statements (SQL-shaped escape hatch for driver-specific
    //    maintenance; the core's own writers never depend on this) -------
    fn execute(&self, sql: &str, bindings: &[Scalar]) -> Result<u64>;
    fn executemany(&self, sql: &str, bindings: &[Vec<Scalar>]) -> Result<u64>;
    fn executescript(&self, script: &str) -> Result<()>;

    // -- scalar/aggregate hook registration (idempotent) -------------------
    fn register_scalar_fn(&self, name: &str) -> Result<()>;
    fn register_aggregate_fn(&self, name: &str) -> Result<()>;

    // -- lifecycle ----------------------------------------------------------
    fn open(&self) -> Result<()>;
    fn close(&self) -> Result<()>;
    fn reopen(&self) -> Result<()>;
    fn backup(&self, to_path: &Path) -> Result<()>;
    fn dump_and_restore(&self, script: Option<&str>) -> Result<()>;
    fn vacuum(&self) -> Result<()>;
    fn user_version(&self) -> Result<i64>;

    // -- transaction boundary -----------------------------------------
    fn begin_transaction(&self) -> Result<TxHandle>;
    fn commit_transaction(&self, tx: TxHandle) -> Result<()>;
    fn rollback_transaction(&self, tx: TxHandle) -> Result<()>;
}
