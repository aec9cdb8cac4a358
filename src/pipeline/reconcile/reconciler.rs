//! Batch reconciler: drives extraction over unanalyzed records and remote
//! saves over analyzed ones.
//!
//! Store mutations are read-full / modify / write-full cycles serialized by
//! `store_lock`, which is never held across an extraction or remote call.
//! Batch runs and single-record analysis share one run flag, so at most one
//! extraction is in flight per reconciler.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

use super::error::ReconcileError;
use super::traits::{ExtractionClient, RecordStore, RemoteSink};
use super::types::{
    BatchCursor, BatchReport, BatchStatusEvent, ReconcileConfig, SaveAllReport, SaveFailure,
    SaveOutcome, SkippedRecord, ViewKind,
};
use super::views::{count_by_lifecycle, project, ViewCounts, ViewProjection, ViewSnapshot};
use crate::models::{FieldMap, FieldSchema, FieldValue, Lifecycle, Record};
use crate::pipeline::extraction::decode_image_ref;
use crate::pipeline::remote::payload_for_record;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn emit(progress_fn: Option<&dyn Fn(BatchStatusEvent)>, event: BatchStatusEvent) {
    if let Some(progress) = progress_fn {
        progress(event);
    }
}

/// Holds the run flag until dropped.
struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, ReconcileError> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| ReconcileError::BatchInProgress)?;
        Ok(Self { flag })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Marks one record as having a remote save in flight until dropped.
struct SaveGuard<'a> {
    in_flight: &'a Mutex<BTreeSet<String>>,
    id: String,
}

impl<'a> SaveGuard<'a> {
    fn acquire(in_flight: &'a Mutex<BTreeSet<String>>, id: &str) -> Result<Self, ReconcileError> {
        if !lock(in_flight).insert(id.to_string()) {
            return Err(ReconcileError::SaveInProgress {
                record_id: id.to_string(),
            });
        }
        Ok(Self {
            in_flight,
            id: id.to_string(),
        })
    }
}

impl Drop for SaveGuard<'_> {
    fn drop(&mut self) {
        lock(self.in_flight).remove(&self.id);
    }
}

enum StepOutcome {
    Extracted,
    Skipped(SkippedRecord),
}

pub struct BatchReconciler {
    store: Arc<dyn RecordStore>,
    extractor: Arc<dyn ExtractionClient>,
    sink: Arc<dyn RemoteSink>,
    schema: FieldSchema,
    config: ReconcileConfig,
    running: AtomicBool,
    saving: Mutex<BTreeSet<String>>,
    store_lock: Mutex<()>,
    cursor: Mutex<BatchCursor>,
    pending_save: Mutex<Vec<Record>>,
    view: Mutex<ViewProjection>,
}

impl BatchReconciler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        extractor: Arc<dyn ExtractionClient>,
        sink: Arc<dyn RemoteSink>,
        schema: FieldSchema,
    ) -> Self {
        let reconciler = Self {
            store,
            extractor,
            sink,
            schema,
            config: ReconcileConfig::default(),
            running: AtomicBool::new(false),
            saving: Mutex::new(BTreeSet::new()),
            store_lock: Mutex::new(()),
            cursor: Mutex::new(BatchCursor::default()),
            pending_save: Mutex::new(Vec::new()),
            view: Mutex::new(ViewProjection::default()),
        };
        reconciler.publish_pending_save();
        reconciler
    }

    pub fn with_config(mut self, config: ReconcileConfig) -> Self {
        self.config = config;
        self
    }

    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn cursor(&self) -> BatchCursor {
        *lock(&self.cursor)
    }

    // ───────────────────────────────────────
    // Batch extraction
    // ───────────────────────────────────────

    /// Extract every unanalyzed record with an image, in stored order.
    pub fn run_batch_extraction(&self) -> Result<BatchReport, ReconcileError> {
        self.run_batch_extraction_with(None, None)
    }

    /// Batch extraction with a cancel flag (checked between records) and an
    /// optional progress callback.
    ///
    /// The work queue is fixed when the run starts. An undecodable image
    /// skips its record; an extraction failure aborts the run with the queue
    /// index of the failing record. Every successful record is persisted
    /// before the next one starts.
    pub fn run_batch_extraction_with(
        &self,
        cancel: Option<&AtomicBool>,
        progress_fn: Option<&dyn Fn(BatchStatusEvent)>,
    ) -> Result<BatchReport, ReconcileError> {
        let _run = RunGuard::acquire(&self.running)?;
        let start = Instant::now();
        let mut report = BatchReport::empty();

        let records = match self.store.load_all() {
            Ok(records) => records,
            Err(e) if e.is_corrupt() => {
                tracing::warn!(error = %e, "Stored records unreadable, treating collection as empty");
                report.storage_warning = Some(e.to_string());
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        let mut queue: Vec<Record> = records
            .into_iter()
            .filter(|r| r.lifecycle == Lifecycle::Unanalyzed && r.has_image())
            .collect();
        if let Some(max) = self.config.max_records_per_run {
            queue.truncate(max);
        }
        report.total = queue.len();

        *lock(&self.cursor) = BatchCursor {
            current_index: 0,
            total: queue.len(),
            running: true,
        };
        tracing::info!(queued = report.total, "Batch extraction started");
        emit(progress_fn, BatchStatusEvent::Started { record_count: report.total });

        let result = self.process_queue(&queue, cancel, progress_fn, &mut report);

        report.duration_ms = start.elapsed().as_millis() as u64;
        self.publish_pending_save();
        lock(&self.cursor).running = false;

        match result {
            Ok(()) => {
                if !report.cancelled {
                    emit(
                        progress_fn,
                        BatchStatusEvent::Completed {
                            processed: report.processed,
                            skipped: report.skipped.len(),
                            duration_ms: report.duration_ms,
                        },
                    );
                }
                tracing::info!(
                    processed = report.processed,
                    skipped = report.skipped.len(),
                    cancelled = report.cancelled,
                    duration_ms = report.duration_ms,
                    "Batch extraction finished"
                );
                Ok(report)
            }
            Err(e) => {
                let index = self.cursor().current_index;
                let record_id = e
                    .record_id()
                    .map(str::to_string)
                    .or_else(|| queue.get(index).map(|r| r.id.clone()))
                    .unwrap_or_default();
                tracing::warn!(
                    index,
                    record_id = %record_id,
                    processed = report.processed,
                    error = %e,
                    "Batch extraction aborted"
                );
                emit(
                    progress_fn,
                    BatchStatusEvent::Failed {
                        index,
                        record_id,
                        error: e.to_string(),
                    },
                );
                Err(e)
            }
        }
    }

    fn process_queue(
        &self,
        queue: &[Record],
        cancel: Option<&AtomicBool>,
        progress_fn: Option<&dyn Fn(BatchStatusEvent)>,
        report: &mut BatchReport,
    ) -> Result<(), ReconcileError> {
        let total = queue.len();
        for (index, record) in queue.iter().enumerate() {
            if cancel.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
                report.cancelled = true;
                tracing::info!(completed = index, total, "Batch extraction cancelled");
                emit(progress_fn, BatchStatusEvent::Cancelled { completed: index, total });
                return Ok(());
            }

            lock(&self.cursor).current_index = index;
            emit(
                progress_fn,
                BatchStatusEvent::Progress {
                    completed: index,
                    total,
                    record_id: record.id.clone(),
                },
            );

            match self.extract_and_commit(record, index)? {
                StepOutcome::Extracted => report.processed += 1,
                StepOutcome::Skipped(skipped) => report.skipped.push(skipped),
            }
        }
        lock(&self.cursor).current_index = total;
        Ok(())
    }

    fn extract_and_commit(&self, record: &Record, index: usize) -> Result<StepOutcome, ReconcileError> {
        let image = match decode_image_ref(record.image_ref()) {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!(
                    record_id = %record.id,
                    index,
                    error = %e,
                    "Skipping record with undecodable image"
                );
                return Ok(StepOutcome::Skipped(SkippedRecord {
                    record_id: record.id.clone(),
                    reason: e.to_string(),
                }));
            }
        };

        tracing::debug!(record_id = %record.id, index, image_bytes = image.len(), "Extracting fields");
        let extracted = self
            .extractor
            .extract(&image, &self.schema)
            .map_err(|e| ReconcileError::ExtractionFailed {
                record_id: record.id.clone(),
                index,
                reason: e.to_string(),
            })?;

        match self.commit_extraction(&record.id, &extracted)? {
            Some(_) => Ok(StepOutcome::Extracted),
            None => {
                tracing::warn!(record_id = %record.id, index, "Record removed during run, result discarded");
                Ok(StepOutcome::Skipped(SkippedRecord {
                    record_id: record.id.clone(),
                    reason: "record removed during run".to_string(),
                }))
            }
        }
    }

    /// Merge an extraction result into the stored record and persist the
    /// whole collection. Returns `None` when the record no longer exists.
    fn commit_extraction(&self, id: &str, extracted: &FieldMap) -> Result<Option<Record>, ReconcileError> {
        let fields = self.schema.retain_known(extracted);

        let _store = lock(&self.store_lock);
        let mut records = self.store.load_all()?;
        let Some(record) = records.iter_mut().find(|r| r.id == id) else {
            return Ok(None);
        };
        let written = record.apply_extraction(
            &fields,
            self.config.extraction_timestamp_key.as_deref(),
            Utc::now(),
        );
        let updated = record.clone();
        self.store.save_all(&records)?;

        tracing::debug!(record_id = id, fields = written, "Extraction result committed");
        Ok(Some(updated))
    }

    /// Extract a single record now. Already-saved records are returned
    /// unchanged without calling the extraction service.
    pub fn analyze_record(&self, id: &str) -> Result<Record, ReconcileError> {
        let _run = RunGuard::acquire(&self.running)?;

        let records = self.store.load_all()?;
        let (index, record) = records
            .iter()
            .enumerate()
            .find(|(_, r)| r.id == id)
            .ok_or_else(|| ReconcileError::RecordNotFound(id.to_string()))?;

        if record.lifecycle == Lifecycle::Saved {
            tracing::info!(record_id = id, "Record already saved, not re-analyzing");
            return Ok(record.clone());
        }

        let image = decode_image_ref(record.image_ref()).map_err(|e| ReconcileError::InvalidImage {
            record_id: id.to_string(),
            reason: e.to_string(),
        })?;
        let extracted = self
            .extractor
            .extract(&image, &self.schema)
            .map_err(|e| ReconcileError::ExtractionFailed {
                record_id: id.to_string(),
                index,
                reason: e.to_string(),
            })?;

        let updated = self
            .commit_extraction(id, &extracted)?
            .ok_or_else(|| ReconcileError::RecordNotFound(id.to_string()))?;
        self.publish_pending_save();
        tracing::info!(record_id = id, "Record analyzed");
        Ok(updated)
    }

    // ───────────────────────────────────────
    // Remote saves
    // ───────────────────────────────────────

    /// Insert an analyzed record into the hosted table and mark it saved.
    /// The local record is kept. Only one save per record id runs at a time;
    /// an overlapping call gets `SaveInProgress`.
    pub fn save_record_to_remote(&self, id: &str) -> Result<SaveOutcome, ReconcileError> {
        let _saving = SaveGuard::acquire(&self.saving, id)?;

        let record = self
            .store
            .get(id)?
            .ok_or_else(|| ReconcileError::RecordNotFound(id.to_string()))?;

        match record.lifecycle {
            Lifecycle::Saved => {
                tracing::info!(record_id = id, "Record already saved, no remote write");
                self.drop_from_pending(id);
                return Ok(SaveOutcome::AlreadySaved);
            }
            Lifecycle::Unanalyzed => {
                return Err(ReconcileError::NotAnalyzed {
                    record_id: id.to_string(),
                })
            }
            Lifecycle::AnalyzedUnsaved => {}
        }

        let payload = payload_for_record(&record, &self.schema);
        if payload.is_empty() {
            return Err(ReconcileError::NothingToSave {
                record_id: id.to_string(),
            });
        }

        if let Err(e) = self.sink.insert(&payload) {
            tracing::warn!(record_id = id, error = %e, "Remote save failed");
            return Err(ReconcileError::RemoteWriteFailed {
                record_id: id.to_string(),
                reason: e.to_string(),
            });
        }

        let committed = self.commit_saved(id)?;
        self.drop_from_pending(id);
        if !committed {
            return Ok(SaveOutcome::RemoteOnly);
        }
        tracing::info!(record_id = id, columns = payload.len(), "Record saved to remote");
        Ok(SaveOutcome::Saved)
    }

    /// Mark the record saved. Returns false when it was removed or changed
    /// while the remote write was running.
    fn commit_saved(&self, id: &str) -> Result<bool, ReconcileError> {
        let _store = lock(&self.store_lock);
        let mut records = self.store.load_all()?;
        match records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                if !record.mark_saved() {
                    tracing::warn!(
                        record_id = id,
                        lifecycle = %record.lifecycle,
                        "Record changed during remote save, lifecycle left as is"
                    );
                    return Ok(false);
                }
            }
            None => {
                tracing::warn!(record_id = id, "Record removed during remote save");
                return Ok(false);
            }
        }
        self.store.save_all(&records)?;
        Ok(true)
    }

    /// Save every analyzed-unsaved record. Per-record failures are collected;
    /// only store failures abort.
    pub fn save_all_pending(&self) -> Result<SaveAllReport, ReconcileError> {
        let pending: Vec<String> = self
            .store
            .load_all()?
            .into_iter()
            .filter(|r| r.lifecycle == Lifecycle::AnalyzedUnsaved)
            .map(|r| r.id)
            .collect();

        let mut report = SaveAllReport::default();
        for id in pending {
            match self.save_record_to_remote(&id) {
                Ok(SaveOutcome::Saved) => report.saved.push(id),
                Ok(SaveOutcome::AlreadySaved) => {}
                Ok(SaveOutcome::RemoteOnly) => report.remote_only.push(id),
                Err(ReconcileError::SaveInProgress { .. }) => {
                    tracing::debug!(record_id = %id, "Save already in flight, skipped");
                }
                Err(e @ (ReconcileError::StorageCorrupt(_) | ReconcileError::Store(_))) => {
                    return Err(e)
                }
                Err(e) => report.failed.push(SaveFailure {
                    record_id: id,
                    error: e.to_string(),
                }),
            }
        }

        tracing::info!(
            saved = report.saved.len(),
            remote_only = report.remote_only.len(),
            failed = report.failed.len(),
            "Pending records saved"
        );
        Ok(report)
    }

    // ───────────────────────────────────────
    // Local record maintenance
    // ───────────────────────────────────────

    /// Store a new unanalyzed record for `image_ref`.
    pub fn capture(&self, image_ref: &str) -> Result<Record, ReconcileError> {
        if image_ref.trim().is_empty() {
            return Err(ReconcileError::InvalidImage {
                record_id: String::new(),
                reason: "empty image reference".to_string(),
            });
        }
        let record = Record::capture(image_ref);
        {
            let _store = lock(&self.store_lock);
            self.store.upsert(&record)?;
        }
        tracing::info!(record_id = %record.id, "Record captured");
        Ok(record)
    }

    /// Apply user edits to an analyzed record. Keys outside the schema are
    /// ignored; the timestamp field is normalized to RFC 3339.
    pub fn update_fields(&self, id: &str, edits: &FieldMap) -> Result<Record, ReconcileError> {
        let edits = self.schema.retain_known(edits);

        let updated = {
            let _store = lock(&self.store_lock);
            let mut records = self.store.load_all()?;
            let record = records
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or_else(|| ReconcileError::RecordNotFound(id.to_string()))?;
            if record.lifecycle == Lifecycle::Unanalyzed {
                return Err(ReconcileError::NotAnalyzed {
                    record_id: id.to_string(),
                });
            }

            let now = Utc::now();
            record.apply_edits(&edits, now);
            if let Some(key) = self.config.extraction_timestamp_key.as_deref() {
                let normalized = record.fields.get(key).map(|v| normalize_timestamp(v, now));
                if let Some(value) = normalized {
                    record.fields.insert(key, value);
                }
            }
            let updated = record.clone();
            self.store.save_all(&records)?;
            updated
        };

        self.publish_pending_save();
        tracing::debug!(record_id = id, fields = edits.len(), "Record fields updated");
        Ok(updated)
    }

    /// Delete records from the local store. Returns how many were removed.
    pub fn remove_records(&self, ids: &BTreeSet<String>) -> Result<usize, ReconcileError> {
        let removed = {
            let _store = lock(&self.store_lock);
            self.store.remove(ids)?
        };
        lock(&self.pending_save).retain(|r| !ids.contains(&r.id));
        tracing::info!(requested = ids.len(), removed, "Records removed");
        Ok(removed)
    }

    // ───────────────────────────────────────
    // Views
    // ───────────────────────────────────────

    /// Records awaiting a remote save, as of the last run, analysis, or edit.
    pub fn pending_save_view(&self) -> Vec<Record> {
        lock(&self.pending_save).clone()
    }

    /// Switch between the unanalyzed and pending-save views, projected from
    /// a fresh store read.
    pub fn toggle_view(&self) -> Result<ViewSnapshot, ReconcileError> {
        let records = self.load_recovering()?;
        let mut view = lock(&self.view);
        view.toggle();
        Ok(view.snapshot(&records))
    }

    pub fn current_view(&self) -> Result<ViewSnapshot, ReconcileError> {
        let records = self.load_recovering()?;
        Ok(lock(&self.view).snapshot(&records))
    }

    pub fn counts(&self) -> Result<ViewCounts, ReconcileError> {
        Ok(count_by_lifecycle(&self.load_recovering()?))
    }

    /// Recompute the pending-save view from the store.
    pub fn publish_pending_save(&self) {
        match self.store.load_all() {
            Ok(records) => *lock(&self.pending_save) = project(ViewKind::PendingSave, &records),
            Err(e) => tracing::warn!(error = %e, "Pending-save view not refreshed"),
        }
    }

    fn drop_from_pending(&self, id: &str) {
        lock(&self.pending_save).retain(|r| r.id != id);
    }

    /// Load for display: an unreadable collection shows as empty.
    fn load_recovering(&self) -> Result<Vec<Record>, ReconcileError> {
        match self.store.load_all() {
            Ok(records) => Ok(records),
            Err(e) if e.is_corrupt() => {
                tracing::warn!(error = %e, "Stored records unreadable, showing empty collection");
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }
}

// ═══════════════════════════════════════════
// Timestamp normalization
// ═══════════════════════════════════════════

/// Normalize a stored date value to RFC 3339. Unparseable values become `now`.
pub fn normalize_timestamp(value: &FieldValue, now: DateTime<Utc>) -> String {
    let parsed = match value {
        FieldValue::Text(raw) => parse_timestamp(raw),
        FieldValue::Number(millis) => Utc.timestamp_millis_opt(*millis as i64).single(),
    };
    parsed.unwrap_or(now).to_rfc3339()
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%m/%d/%Y, %I:%M:%S %p",
        "%m/%d/%Y %I:%M:%S %p",
        "%m/%d/%Y, %H:%M:%S",
    ];
    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    for format in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }
    None
}
