pub mod daemon;
pub mod merge;

pub use daemon::{DirtyInterlink, DirtyRecord, Maintainer};
