//! JSON file record store.
//!
//! Writes go to a temporary file in the same directory, are fsynced, then
//! renamed over the target, so a crash leaves either the old or the new file.

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::codec::{decode_records, encode_records};
use super::StoreError;
use crate::models::Record;
use crate::pipeline::reconcile::traits::RecordStore;

pub struct FileRecordStore {
    path: PathBuf,
}

impl FileRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parent_dir(&self) -> &Path {
        self.path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }
}

impl RecordStore for FileRecordStore {
    fn load_all(&self) -> Result<Vec<Record>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(blob) => decode_records(&blob),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                Err(StoreError::Corrupt(format!("{}: {e}", self.path.display())))
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn save_all(&self, records: &[Record]) -> Result<(), StoreError> {
        let encoded = encode_records(records)?;
        let dir = self.parent_dir();
        std::fs::create_dir_all(dir)?;

        let mut staging = NamedTempFile::new_in(dir)?;
        staging.write_all(encoded.as_bytes())?;
        staging.as_file().sync_all()?;
        staging
            .persist(&self.path)
            .map_err(|e| StoreError::Io(e.error))?;

        tracing::debug!(
            path = %self.path.display(),
            records = records.len(),
            "Record collection written"
        );
        Ok(())
    }
}
