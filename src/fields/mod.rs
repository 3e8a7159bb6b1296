pub mod field;

pub use field::Field;
