use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{RemoteError, RemotePayload, RemoteRow};
use crate::pipeline::reconcile::traits::RemoteSink;

/// In-memory hosted table. Inserted payloads become rows with sequential ids.
#[derive(Default)]
pub struct MockRemoteSink {
    rows: Mutex<Vec<RemoteRow>>,
    inserted: Mutex<Vec<RemotePayload>>,
    updates: Mutex<Vec<(String, RemotePayload)>>,
    insert_failures: Mutex<VecDeque<String>>,
    offline: AtomicBool,
    next_id: AtomicU64,
    delete_calls: AtomicUsize,
}

impl MockRemoteSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<RemoteRow>) -> Self {
        let next = rows
            .iter()
            .filter_map(|r| r.id.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        Self {
            rows: Mutex::new(rows),
            next_id: AtomicU64::new(next),
            ..Self::default()
        }
    }

    /// Fail the next insert with `reason`. Calls queue up.
    pub fn fail_next_insert(&self, reason: &str) {
        if let Ok(mut q) = self.insert_failures.lock() {
            q.push_back(reason.to_string());
        }
    }

    /// While offline every call fails with a connection error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn inserted(&self) -> Vec<RemotePayload> {
        self.inserted.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn insert_count(&self) -> usize {
        self.inserted.lock().map(|v| v.len()).unwrap_or(0)
    }

    pub fn updates(&self) -> Vec<(String, RemotePayload)> {
        self.updates.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn rows(&self) -> Vec<RemoteRow> {
        self.rows.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), RemoteError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Connection("mock://offline".into()));
        }
        Ok(())
    }

    fn lock_poisoned() -> RemoteError {
        RemoteError::Rejected("mock state lock poisoned".into())
    }
}

impl RemoteSink for MockRemoteSink {
    fn insert(&self, payload: &RemotePayload) -> Result<(), RemoteError> {
        self.check_online()?;
        let failure = self
            .insert_failures
            .lock()
            .map_err(|_| Self::lock_poisoned())?
            .pop_front();
        if let Some(reason) = failure {
            return Err(RemoteError::Rejected(reason));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.rows
            .lock()
            .map_err(|_| Self::lock_poisoned())?
            .push(RemoteRow::new(&id.to_string(), payload.as_map().clone()));
        self.inserted
            .lock()
            .map_err(|_| Self::lock_poisoned())?
            .push(payload.clone());
        Ok(())
    }

    fn update(&self, remote_id: &str, payload: &RemotePayload) -> Result<(), RemoteError> {
        self.check_online()?;
        let mut rows = self.rows.lock().map_err(|_| Self::lock_poisoned())?;
        let row = rows
            .iter_mut()
            .find(|r| r.id == remote_id)
            .ok_or_else(|| RemoteError::Api {
                status: 404,
                body: format!("no row {remote_id}"),
            })?;
        for (column, value) in payload.as_map() {
            row.values.insert(column.clone(), value.clone());
        }
        self.updates
            .lock()
            .map_err(|_| Self::lock_poisoned())?
            .push((remote_id.to_string(), payload.clone()));
        Ok(())
    }

    fn delete(&self, remote_ids: &BTreeSet<String>) -> Result<(), RemoteError> {
        self.check_online()?;
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.rows
            .lock()
            .map_err(|_| Self::lock_poisoned())?
            .retain(|r| !remote_ids.contains(&r.id));
        Ok(())
    }

    fn select_all(&self, order_column: &str) -> Result<Vec<RemoteRow>, RemoteError> {
        self.check_online()?;
        let mut rows = self.rows();
        let sort_key = |row: &RemoteRow| row.get(order_column).map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        });
        // Newest first; rows missing the column go last.
        rows.sort_by(|a, b| sort_key(b).cmp(&sort_key(a)));
        Ok(rows)
    }
}
