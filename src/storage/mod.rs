pub mod duckdb;
pub mod named;
pub mod traits;

pub use self::duckdb::DuckDbStorage;
pub use named::{FieldValue, NamedFields, NamedStatement};
pub use traits::{Storage, StorageError};
