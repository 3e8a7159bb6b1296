pub mod controller;
pub mod proxy;
pub mod state;

pub use controller::CacheController;
pub use proxy::ProxyMetadata;
pub use state::{CacheState, FormatMeta, TitleRow};
