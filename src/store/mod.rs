pub mod driver;
pub mod memory;
pub mod row;

pub use driver::{LinkRow, RowDict, StoreDriver, TxHandle};
pub use memory::{MemoryStore, TableSchema};
pub use row::Row;
