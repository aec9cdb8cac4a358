//! Reports, events, and configuration for reconciliation runs.

use serde::{Deserialize, Serialize};

use crate::models::Lifecycle;

// ═══════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Field stamped with the extraction time on every successful
    /// extraction. `None` disables stamping.
    pub extraction_timestamp_key: Option<String>,
    /// Cap on records processed by one batch run. `None` processes the
    /// whole queue.
    pub max_records_per_run: Option<usize>,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            extraction_timestamp_key: Some("dateAdded".to_string()),
            max_records_per_run: None,
        }
    }
}

// ═══════════════════════════════════════════
// Batch run results
// ═══════════════════════════════════════════

/// A queued record the run left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRecord {
    pub record_id: String,
    pub reason: String,
}

/// Outcome of a batch run that was not aborted by an extraction failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Length of the work queue fixed at run start.
    pub total: usize,
    pub processed: usize,
    pub skipped: Vec<SkippedRecord>,
    pub cancelled: bool,
    /// Set when the stored collection was unreadable and the run treated it
    /// as empty.
    pub storage_warning: Option<String>,
    pub duration_ms: u64,
}

impl BatchReport {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Progress events, serialized with a `type` tag for front ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BatchStatusEvent {
    Started {
        record_count: usize,
    },
    Progress {
        completed: usize,
        total: usize,
        record_id: String,
    },
    Completed {
        processed: usize,
        skipped: usize,
        duration_ms: u64,
    },
    Failed {
        index: usize,
        record_id: String,
        error: String,
    },
    Cancelled {
        completed: usize,
        total: usize,
    },
}

/// Position of the current (or last) batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCursor {
    pub current_index: usize,
    pub total: usize,
    pub running: bool,
}

// ═══════════════════════════════════════════
// Remote saves
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveOutcome {
    Saved,
    /// Record was already saved; no remote write was made.
    AlreadySaved,
    /// The remote row was written, but the local record was removed or
    /// changed meanwhile and is not marked saved.
    RemoteOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveFailure {
    pub record_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveAllReport {
    pub saved: Vec<String>,
    /// Written remotely, but gone or changed locally before it could be
    /// marked saved.
    pub remote_only: Vec<String>,
    pub failed: Vec<SaveFailure>,
}

impl SaveAllReport {
    pub fn all_saved(&self) -> bool {
        self.failed.is_empty() && self.remote_only.is_empty()
    }
}

// ═══════════════════════════════════════════
// Views
// ═══════════════════════════════════════════

/// The two record lists a user switches between.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewKind {
    #[default]
    Unanalyzed,
    PendingSave,
}

impl ViewKind {
    pub fn lifecycle(self) -> Lifecycle {
        match self {
            Self::Unanalyzed => Lifecycle::Unanalyzed,
            Self::PendingSave => Lifecycle::AnalyzedUnsaved,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Self::Unanalyzed => Self::PendingSave,
            Self::PendingSave => Self::Unanalyzed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_event_serializes_with_type_tag() {
        let event = BatchStatusEvent::Failed {
            index: 1,
            record_id: "b".to_string(),
            error: "503".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"Failed\""));
        assert!(json.contains("\"index\":1"));
    }

    #[test]
    fn config_defaults_stamp_date_added() {
        let config = ReconcileConfig::default();
        assert_eq!(config.extraction_timestamp_key.as_deref(), Some("dateAdded"));
        assert_eq!(config.max_records_per_run, None);

        let parsed: ReconcileConfig = serde_json::from_str(r#"{"max_records_per_run": 5}"#).unwrap();
        assert_eq!(parsed.max_records_per_run, Some(5));
        assert_eq!(parsed.extraction_timestamp_key.as_deref(), Some("dateAdded"));
    }

    #[test]
    fn view_kind_toggles() {
        assert_eq!(ViewKind::default().toggled(), ViewKind::PendingSave);
        assert_eq!(ViewKind::PendingSave.toggled(), ViewKind::Unanalyzed);
        assert_eq!(ViewKind::PendingSave.lifecycle(), Lifecycle::AnalyzedUnsaved);
    }
}
