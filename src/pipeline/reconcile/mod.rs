//! Batch reconciliation between the local record store, the extraction
//! service, and the hosted contacts table.
//!
//! Every record moves forward through `Unanalyzed → AnalyzedUnsaved → Saved`.
//! Progress is written through to the store after each record, so an
//! interrupted run resumes by re-running: only records still unanalyzed are
//! queued again.

pub mod background;
pub mod error;
pub mod reconciler;
pub mod traits;
pub mod types;
pub mod views;

pub use background::{run_batch_async, spawn_batch, BatchHandle, ProgressCallback};
pub use error::ReconcileError;
pub use reconciler::{normalize_timestamp, BatchReconciler};
pub use traits::{ExtractionClient, RecordStore, RemoteSink};
pub use types::{
    BatchCursor, BatchReport, BatchStatusEvent, ReconcileConfig, SaveAllReport, SaveFailure,
    SaveOutcome, SkippedRecord, ViewKind,
};
pub use views::{count_by_lifecycle, project, ViewCounts, ViewProjection, ViewSnapshot};
