//! Off-thread batch runs.
//!
//! A batch run blocks on network calls for every record, so callers that
//! must stay responsive start it here and keep the returned handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::error::ReconcileError;
use super::reconciler::BatchReconciler;
use super::types::{BatchReport, BatchStatusEvent};

/// Callback invoked from the worker thread for every status event.
pub type ProgressCallback = Box<dyn Fn(BatchStatusEvent) + Send>;

/// Handle for a batch run on a worker thread.
///
/// Dropping the handle requests cancellation and waits for the worker; the
/// record in flight still completes and is persisted.
pub struct BatchHandle {
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<BatchReport, ReconcileError>>>,
}

impl BatchHandle {
    /// Stop after the record currently being processed.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the run to end and return its outcome.
    pub fn join(mut self) -> Result<BatchReport, ReconcileError> {
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_else(|panic| {
                Err(ReconcileError::WorkerPanicked(panic_message(panic.as_ref())))
            }),
            None => Err(ReconcileError::WorkerPanicked("batch already joined".to_string())),
        }
    }
}

impl Drop for BatchHandle {
    fn drop(&mut self) {
        self.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Start a batch run on a dedicated thread.
pub fn spawn_batch(reconciler: Arc<BatchReconciler>, progress: Option<ProgressCallback>) -> BatchHandle {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();

    let handle = std::thread::spawn(move || {
        tracing::debug!("Batch worker started");
        let progress_fn = progress.as_ref().map(|p| p.as_ref() as &dyn Fn(BatchStatusEvent));
        reconciler.run_batch_extraction_with(Some(&flag), progress_fn)
    });

    BatchHandle {
        cancel,
        handle: Some(handle),
    }
}

/// Run a batch from async code on tokio's blocking pool.
pub async fn run_batch_async(reconciler: Arc<BatchReconciler>) -> Result<BatchReport, ReconcileError> {
    tokio::task::spawn_blocking(move || reconciler.run_batch_extraction())
        .await
        .map_err(|e| ReconcileError::WorkerPanicked(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldMap, FieldSchema, Lifecycle, Record};
    use crate::pipeline::extraction::MockExtractionClient;
    use crate::pipeline::reconcile::traits::RecordStore;
    use crate::pipeline::remote::MockRemoteSink;
    use crate::pipeline::storage::MemoryRecordStore;
    use chrono::Utc;
    use std::sync::mpsc;
    use std::time::Duration;

    const JPEG: &str = "data:image/jpeg;base64,/9j/4AAQ";

    fn setup(count: usize, delay: Duration) -> (Arc<MemoryRecordStore>, Arc<BatchReconciler>) {
        let records: Vec<Record> = (0..count)
            .map(|i| Record::new(format!("r{i}"), JPEG, Utc::now()))
            .collect();
        let store = Arc::new(MemoryRecordStore::with_records(&records).unwrap());
        let fields: FieldMap = [("name", "Worker")].into_iter().collect();
        let extractor = Arc::new(MockExtractionClient::new(fields).with_delay(delay));
        let reconciler = Arc::new(BatchReconciler::new(
            store.clone(),
            extractor,
            Arc::new(MockRemoteSink::new()),
            FieldSchema::default_contact(),
        ));
        (store, reconciler)
    }

    #[test]
    fn spawned_batch_reports_progress() {
        let (store, reconciler) = setup(3, Duration::ZERO);
        let (tx, rx) = mpsc::channel();
        let progress: ProgressCallback = Box::new(move |event| {
            let _ = tx.send(event);
        });

        let report = spawn_batch(reconciler, Some(progress)).join().unwrap();
        assert_eq!(report.processed, 3);

        let events: Vec<BatchStatusEvent> = rx.try_iter().collect();
        assert!(matches!(events.first(), Some(BatchStatusEvent::Started { record_count: 3 })));
        assert!(matches!(events.last(), Some(BatchStatusEvent::Completed { processed: 3, .. })));
        assert!(store
            .load_all()
            .unwrap()
            .iter()
            .all(|r| r.lifecycle == Lifecycle::AnalyzedUnsaved));
    }

    #[test]
    fn second_run_while_busy_is_rejected() {
        let (_store, reconciler) = setup(3, Duration::from_millis(150));
        let handle = spawn_batch(reconciler.clone(), None);

        while !reconciler.is_running() && !handle.is_finished() {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(matches!(
            reconciler.run_batch_extraction(),
            Err(ReconcileError::BatchInProgress)
        ));
        assert!(matches!(
            reconciler.analyze_record("r0"),
            Err(ReconcileError::BatchInProgress)
        ));

        assert_eq!(handle.join().unwrap().processed, 3);
        assert!(!reconciler.is_running());
    }

    #[test]
    fn cancel_stops_between_records() {
        let (store, reconciler) = setup(10, Duration::from_millis(50));
        let handle = spawn_batch(reconciler.clone(), None);

        while reconciler.cursor().current_index == 0 && !handle.is_finished() {
            std::thread::sleep(Duration::from_millis(5));
        }
        handle.cancel();
        let report = handle.join().unwrap();

        assert!(report.cancelled);
        assert!(report.processed < 10);
        let analyzed = store
            .load_all()
            .unwrap()
            .iter()
            .filter(|r| r.lifecycle == Lifecycle::AnalyzedUnsaved)
            .count();
        assert_eq!(analyzed, report.processed);
    }

    #[tokio::test]
    async fn async_run_uses_blocking_pool() {
        let (store, reconciler) = setup(2, Duration::ZERO);
        let report = run_batch_async(reconciler).await.unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(store.load_all().unwrap().len(), 2);
    }
}
