pub mod error;
pub mod types;
pub mod value;

pub use error::{Result, StorageError};
pub use types::{Column, ColumnType, Id, IdPolicy};
pub use value::Value;
