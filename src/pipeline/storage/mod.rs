//! Local record persistence.
//!
//! All backends store the whole collection as one serialized blob (see
//! `codec`) and replace it in a single atomic step.

pub mod codec;
pub mod sqlite_store;
pub mod file_store;
pub mod memory_store;

pub use codec::{decode_records, encode_records};
pub use file_store::FileRecordStore;
pub use memory_store::MemoryRecordStore;
pub use sqlite_store::SqliteRecordStore;

use thiserror::Error;

use crate::db::DatabaseError;

/// Default blob key, shared with earlier versions of the capture app.
pub const DEFAULT_STORE_KEY: &str = "visual-text-extractor-db";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Stored record collection is unreadable: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Record store lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(DatabaseError::Sqlite(e))
    }
}
