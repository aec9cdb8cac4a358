//! In-process record store. Holds the serialized blob, not live records,
//! so it exercises the same codec (and corruption path) as durable backends.

use std::sync::Mutex;

use super::codec::{decode_records, encode_records};
use super::StoreError;
use crate::models::Record;
use crate::pipeline::reconcile::traits::RecordStore;

#[derive(Default)]
pub struct MemoryRecordStore {
    blob: Mutex<Option<String>>,
    writes: Mutex<usize>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with records (not counted as a write).
    pub fn with_records(records: &[Record]) -> Result<Self, StoreError> {
        let store = Self::new();
        *store.blob.lock().map_err(|_| StoreError::LockPoisoned)? = Some(encode_records(records)?);
        Ok(store)
    }

    /// Seed with an arbitrary blob, e.g. a legacy or damaged one.
    pub fn with_raw_blob(blob: &str) -> Self {
        Self {
            blob: Mutex::new(Some(blob.to_string())),
            writes: Mutex::new(0),
        }
    }

    /// Number of `save_all` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.lock().map(|w| *w).unwrap_or(0)
    }

    pub fn raw_blob(&self) -> Option<String> {
        self.blob.lock().ok().and_then(|b| b.clone())
    }
}

impl RecordStore for MemoryRecordStore {
    fn load_all(&self) -> Result<Vec<Record>, StoreError> {
        let blob = self.blob.lock().map_err(|_| StoreError::LockPoisoned)?;
        match blob.as_deref() {
            Some(s) => decode_records(s),
            None => Ok(Vec::new()),
        }
    }

    fn save_all(&self, records: &[Record]) -> Result<(), StoreError> {
        let encoded = encode_records(records)?;
        *self.blob.lock().map_err(|_| StoreError::LockPoisoned)? = Some(encoded);
        *self.writes.lock().map_err(|_| StoreError::LockPoisoned)? += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeSet;

    #[test]
    fn empty_store_loads_nothing() {
        let store = MemoryRecordStore::new();
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn upsert_replaces_by_id() {
        let store = MemoryRecordStore::new();
        let mut record = Record::new("a", "img", Utc::now());
        store.upsert(&record).unwrap();
        record.fields.insert("name", "Ada");
        store.upsert(&record).unwrap();

        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].fields.contains_key("name"));
        assert_eq!(store.write_count(), 2);
    }

    #[test]
    fn upsert_appends_new_ids_in_order() {
        let store = MemoryRecordStore::new();
        for id in ["a", "b", "c"] {
            store.upsert(&Record::new(id, "img", Utc::now())).unwrap();
        }
        let ids: Vec<String> = store.load_all().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn remove_skips_write_when_nothing_matches() {
        let store = MemoryRecordStore::with_records(&[Record::new("a", "img", Utc::now())]).unwrap();
        let removed = store.remove(&BTreeSet::from(["zzz".to_string()])).unwrap();
        assert_eq!(removed, 0);
        assert_eq!(store.write_count(), 0);

        let removed = store.remove(&BTreeSet::from(["a".to_string()])).unwrap();
        assert_eq!(removed, 1);
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn corrupt_blob_surfaces_as_corrupt() {
        let store = MemoryRecordStore::with_raw_blob("[{broken");
        assert!(store.load_all().unwrap_err().is_corrupt());
    }
}
