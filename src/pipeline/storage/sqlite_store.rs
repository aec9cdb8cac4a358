//! SQLite-backed record store: the whole collection is one row of `kv_store`.
//!
//! Replacing the row is a single statement inside a transaction, which gives
//! the all-or-nothing swap the store contract requires.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};

use super::codec::{decode_records, encode_records};
use super::{StoreError, DEFAULT_STORE_KEY};
use crate::db::{open_database, open_memory_database};
use crate::models::Record;
use crate::pipeline::reconcile::traits::RecordStore;

pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
    key: String,
}

impl SqliteRecordStore {
    pub fn new(conn: Connection, key: &str) -> Self {
        Self {
            conn: Mutex::new(conn),
            key: key.to_string(),
        }
    }

    /// Open (and migrate) the database at `path`, using the default key.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = open_database(path)?;
        Ok(Self::new(conn, DEFAULT_STORE_KEY))
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = open_memory_database()?;
        Ok(Self::new(conn, DEFAULT_STORE_KEY))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Raw blob for the configured key, if any.
    pub fn raw_blob(&self) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        read_blob(&conn, &self.key)
    }

    /// Overwrite the raw blob. Used for imports from the browser-era store.
    pub fn write_raw_blob(&self, blob: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        write_blob(&conn, &self.key, blob)
    }
}

fn read_blob(conn: &Connection, key: &str) -> Result<Option<String>, StoreError> {
    let mut stmt = conn.prepare("SELECT value FROM kv_store WHERE key = ?1")?;
    match stmt.query_row([key], |row| row.get::<_, String>(0)) {
        Ok(val) => Ok(Some(val)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(rusqlite::Error::FromSqlConversionFailure(_, _, e)) => {
            Err(StoreError::Corrupt(e.to_string()))
        }
        Err(e) => Err(StoreError::from(e)),
    }
}

fn write_blob(conn: &Connection, key: &str, blob: &str) -> Result<(), StoreError> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO kv_store (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
        params![key, blob],
    )?;
    tx.commit()?;
    Ok(())
}

impl RecordStore for SqliteRecordStore {
    fn load_all(&self) -> Result<Vec<Record>, StoreError> {
        match self.raw_blob()? {
            Some(blob) => decode_records(&blob),
            None => Ok(Vec::new()),
        }
    }

    fn save_all(&self, records: &[Record]) -> Result<(), StoreError> {
        let encoded = encode_records(records)?;
        self.write_raw_blob(&encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Lifecycle;
    use chrono::Utc;

    fn setup_store() -> SqliteRecordStore {
        SqliteRecordStore::open_in_memory().expect("Failed to open in-memory DB")
    }

    #[test]
    fn empty_database_loads_nothing() {
        let store = setup_store();
        assert!(store.load_all().unwrap().is_empty());
        assert!(store.raw_blob().unwrap().is_none());
    }

    #[test]
    fn save_all_then_load_all() {
        let store = setup_store();
        let mut a = Record::new("a", "img-a", Utc::now());
        a.fields.insert("name", "Ada");
        a.lifecycle = Lifecycle::AnalyzedUnsaved;
        let b = Record::new("b", "img-b", Utc::now());

        store.save_all(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(store.load_all().unwrap(), vec![a, b]);
    }

    #[test]
    fn save_all_replaces_whole_collection() {
        let store = setup_store();
        store
            .save_all(&[Record::new("a", "1", Utc::now()), Record::new("b", "2", Utc::now())])
            .unwrap();
        store.save_all(&[Record::new("c", "3", Utc::now())]).unwrap();

        let ids: Vec<String> = store.load_all().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["c"]);
    }

    #[test]
    fn separate_keys_are_independent() {
        let conn = open_memory_database().unwrap();
        let store = SqliteRecordStore::new(conn, "other-key");
        store.save_all(&[Record::new("a", "1", Utc::now())]).unwrap();
        assert_eq!(store.key(), "other-key");

        let conn = store.conn.lock().unwrap();
        assert!(read_blob(&conn, DEFAULT_STORE_KEY).unwrap().is_none());
    }

    #[test]
    fn legacy_blob_import() {
        let store = setup_store();
        store
            .write_raw_blob(r#"[{"id":"1718000000000","imageSrc":"data:image/jpeg;base64,/9j/","analyzed":true,"name":"Bob"}]"#)
            .unwrap();
        let records = store.load_all().unwrap();
        assert_eq!(records[0].lifecycle, Lifecycle::AnalyzedUnsaved);
    }

    #[test]
    fn corrupt_blob_is_reported() {
        let store = setup_store();
        store.write_raw_blob("not json").unwrap();
        assert!(store.load_all().unwrap_err().is_corrupt());
    }

    #[test]
    fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cardscan.db");
        SqliteRecordStore::open(&path)
            .unwrap()
            .save_all(&[Record::new("a", "1", Utc::now())])
            .unwrap();
        let reopened = SqliteRecordStore::open(&path).unwrap();
        assert_eq!(reopened.load_all().unwrap().len(), 1);
    }
}
