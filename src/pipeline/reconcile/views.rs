//! Lifecycle-filtered projections of the record collection.

use serde::Serialize;

use super::types::ViewKind;
use crate::models::{Lifecycle, Record};

/// Records shown for one view, in stored order.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewSnapshot {
    pub kind: ViewKind,
    pub records: Vec<Record>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ViewCounts {
    pub unanalyzed: usize,
    pub pending_save: usize,
    pub saved: usize,
}

/// Which view is active. Projections are always computed from the records
/// passed in, never cached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewProjection {
    kind: ViewKind,
}

impl ViewProjection {
    pub fn new(kind: ViewKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> ViewKind {
        self.kind
    }

    /// Switch to the other view and return it.
    pub fn toggle(&mut self) -> ViewKind {
        self.kind = self.kind.toggled();
        self.kind
    }

    pub fn snapshot(&self, records: &[Record]) -> ViewSnapshot {
        ViewSnapshot {
            kind: self.kind,
            records: project(self.kind, records),
        }
    }
}

pub fn project(kind: ViewKind, records: &[Record]) -> Vec<Record> {
    let wanted = kind.lifecycle();
    records
        .iter()
        .filter(|r| r.lifecycle == wanted)
        .cloned()
        .collect()
}

pub fn count_by_lifecycle(records: &[Record]) -> ViewCounts {
    records.iter().fold(ViewCounts::default(), |mut counts, r| {
        match r.lifecycle {
            Lifecycle::Unanalyzed => counts.unanalyzed += 1,
            Lifecycle::AnalyzedUnsaved => counts.pending_save += 1,
            Lifecycle::Saved => counts.saved += 1,
        }
        counts
    })
}
