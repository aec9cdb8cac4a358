//! Trait definitions for the reconciliation pipeline.
//!
//! Three traits define the module boundaries:
//! - RecordStore: durable local collection, read-full / write-full
//! - ExtractionClient: image + schema → structured fields (remote, slow, fallible)
//! - RemoteSink: hosted table CRUD (row-level atomic, no cross-call transactions)

use std::collections::BTreeSet;

use crate::models::{FieldMap, FieldSchema, Record};
use crate::pipeline::extraction::{DecodedImage, ExtractionError};
use crate::pipeline::remote::{RemoteError, RemotePayload, RemoteRow};
use crate::pipeline::storage::StoreError;

/// Durable local collection of records, keyed by id.
pub trait RecordStore: Send + Sync {
    /// Every persisted record, in stored order. An unparseable blob is
    /// `StoreError::Corrupt`.
    fn load_all(&self) -> Result<Vec<Record>, StoreError>;

    /// Atomically replace the whole collection. Readers observe either the
    /// old or the new collection, never a mix.
    fn save_all(&self, records: &[Record]) -> Result<(), StoreError>;

    /// Replace by id, or append.
    fn upsert(&self, record: &Record) -> Result<(), StoreError> {
        let mut records = self.load_all()?;
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        self.save_all(&records)
    }

    fn get(&self, id: &str) -> Result<Option<Record>, StoreError> {
        Ok(self.load_all()?.into_iter().find(|r| r.id == id))
    }

    /// Remove the given ids. Returns how many records were removed.
    fn remove(&self, ids: &BTreeSet<String>) -> Result<usize, StoreError> {
        let mut records = self.load_all()?;
        let before = records.len();
        records.retain(|r| !ids.contains(&r.id));
        let removed = before - records.len();
        if removed > 0 {
            self.save_all(&records)?;
        }
        Ok(removed)
    }
}

/// Vision-model field extraction. One call per image; no retries inside.
pub trait ExtractionClient: Send + Sync {
    fn extract(&self, image: &DecodedImage, schema: &FieldSchema) -> Result<FieldMap, ExtractionError>;
}

/// Hosted table that stores finalized records off-device.
pub trait RemoteSink: Send + Sync {
    fn insert(&self, payload: &RemotePayload) -> Result<(), RemoteError>;

    fn update(&self, remote_id: &str, payload: &RemotePayload) -> Result<(), RemoteError>;

    fn delete(&self, remote_ids: &BTreeSet<String>) -> Result<(), RemoteError>;

    /// All rows, newest first by `order_column`.
    fn select_all(&self, order_column: &str) -> Result<Vec<RemoteRow>, RemoteError>;
}
