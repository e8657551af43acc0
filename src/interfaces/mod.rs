pub mod http;
pub mod store;

pub use store::{CommitBatch, InvalidSensor, ReadingLookup, SqliteStore, Store, StoreError};
