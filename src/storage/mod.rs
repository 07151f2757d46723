pub mod block;
pub mod engine;
pub mod error;
pub mod insert;
pub mod select;
pub mod wal;

pub use engine::{Appender, Store, StoreOptions};
pub use error::StorageError;
