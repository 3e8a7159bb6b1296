use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Scalar;
use crate::store::driver::{RowDict, StoreDriver};
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A typed dictionary-like handle to a single row, bound to a Store and
/// a table. Construction resolves the table's id column and its
/// allowed-column set so that writes to unknown columns are rejected
/// before they ever reach the Store.
pub struct Row {
    store: Arc<dyn StoreDriver>,
    table: String,
    id_column: String,
    allowed_columns: BTreeSet<String>,
    id: Option<i64>,
    values: RowDict,
    read_only: bool,
}

impl Row {
    pub fn new(store: Arc<dyn StoreDriver>, table: &str, id: Option<i64>, read_only: bool) -> Result<Self> {
        let id_column = store.id_column(table)?;
        let allowed_columns: BTreeSet<String> = store.columns(table)?.into_iter().collect();
        let values = match id {
            Some(existing) => store
                .get_row(table, existing)?
                .ok_or_else(|| Error::not_found(format!("no row {existing} in {table}")))?,
            None => store.get_blank_row(table)?,
        };
        Ok(Row {
            store,
            table: table.to_string(),
            id_column,
            allowed_columns,
            id,
            values,
            read_only,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn get(&self, column: &str) -> Option<&Scalar> {
        self.values.get(column)
    }

    /// Set a column's value. Rejects unknown columns.
    pub fn set(&mut self, column: &str, value: Scalar) -> Result<()> {
        if !self.allowed_columns.contains(column) {
            return Err(Error::input(format!("unknown column `{column}` on `{}`", self.table)));
        }
        self.values.insert(column.to_string(), value);
        Ok(())
    }

    /// Promote the row to persistent state: allocate an id if absent (by
    /// blank-row insert), then write the full dict.
    pub fn sync(&mut self) -> Result<i64> {
        if self.read_only {
            return Err(Error::new(ErrorKind::RowReadOnlyError, format!("row in `{}` is read-only", self.table)));
        }
        match self.id {
            Some(id) => {
                self.store.update_row(&self.table, id, self.values.clone())?;
                Ok(id)
            }
            None => {
                let new_id = self.store.insert_row(&self.table, self.values.clone())?;
                self.id = Some(new_id);
                self.values.insert(self.id_column.clone(), Scalar::Int(new_id));
                Ok(new_id)
            }
        }
    }

    /// Explicit no-op escape hatch for read-only rows that makes the
    /// read-only discipline visible at call sites instead of silently
    /// dropping writes.
    pub fn no_sync(&self) -> Result<()> {
        if self.read_only {
            Err(Error::new(ErrorKind::RowReadOnlyError, format!("row in `{}` is read-only", self.table)))
        } else {
            Ok(())
        }
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.store.store_id() == other.store.store_id() && self.table == other.table && self.id == other.id
    }
}

impl Eq for Row {}

impl Hash for Row {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.store.store_id().hash(state);
        self.table.hash(state);
        self.id.hash(state);
    }
}
