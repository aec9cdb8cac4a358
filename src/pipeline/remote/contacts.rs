//! Browsing and maintenance of rows already saved to the hosted table.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use super::payload::build_remote_payload;
use super::{RemoteError, RemoteRow};
use crate::models::{FieldMap, FieldSchema, FieldValue};
use crate::pipeline::reconcile::traits::RemoteSink;

/// Inclusive calendar-day range. Either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        Self { from, to }
    }

    pub fn is_open(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.from.map_or(true, |from| day >= from) && self.to.map_or(true, |to| day <= to)
    }
}

/// Parse a stored date column into a calendar day. Accepts RFC 3339,
/// `YYYY-MM-DD HH:MM:SS`, and bare `YYYY-MM-DD`.
pub fn parse_row_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt.date());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

/// Row-level operations on the hosted contacts table.
pub struct RemoteContacts {
    sink: Arc<dyn RemoteSink>,
    schema: FieldSchema,
    date_column: String,
}

impl RemoteContacts {
    /// `date_key` is the schema key holding the capture date; its remote
    /// column orders and filters rows.
    pub fn new(sink: Arc<dyn RemoteSink>, schema: FieldSchema, date_key: &str) -> Self {
        let date_column = schema
            .get(date_key)
            .map(|spec| spec.remote_name().to_string())
            .unwrap_or_else(|| date_key.to_string());
        Self {
            sink,
            schema,
            date_column,
        }
    }

    pub fn date_column(&self) -> &str {
        &self.date_column
    }

    /// All rows, newest first.
    pub fn list(&self) -> Result<Vec<RemoteRow>, RemoteError> {
        let rows = self.sink.select_all(&self.date_column)?;
        tracing::debug!(rows = rows.len(), "Remote contacts listed");
        Ok(rows)
    }

    /// Rows whose date column falls in `range`. With an open range every row
    /// passes; otherwise rows with a missing or unparseable date are excluded.
    pub fn filter_by_date<'a>(&self, rows: &'a [RemoteRow], range: DateRange) -> Vec<&'a RemoteRow> {
        if range.is_open() {
            return rows.iter().collect();
        }
        rows.iter()
            .filter(|row| {
                row.get_str(&self.date_column)
                    .and_then(parse_row_date)
                    .is_some_and(|day| range.contains(day))
            })
            .collect()
    }

    /// Map a row back to schema keys.
    pub fn row_fields(&self, row: &RemoteRow) -> FieldMap {
        let mut fields = FieldMap::new();
        for spec in self.schema.fields() {
            if let Some(value) = row.get(spec.remote_name()).and_then(FieldValue::from_json) {
                fields.insert(spec.key.clone(), value);
            }
        }
        fields
    }

    /// Overwrite a row's columns with `fields`. The row id is never sent as a
    /// column.
    pub fn update(&self, remote_id: &str, fields: &FieldMap) -> Result<(), RemoteError> {
        let mut payload = build_remote_payload(fields, &self.schema);
        payload.remove("id");
        self.sink.update(remote_id, &payload)?;
        tracing::info!(remote_id, columns = payload.len(), "Remote contact updated");
        Ok(())
    }

    pub fn delete(&self, remote_id: &str) -> Result<(), RemoteError> {
        self.sink.delete(&BTreeSet::from([remote_id.to_string()]))
    }

    /// Delete every row in `rows` with one call. Returns the number of ids sent.
    pub fn delete_rows(&self, rows: &[&RemoteRow]) -> Result<usize, RemoteError> {
        let ids: BTreeSet<String> = rows.iter().map(|r| r.id.clone()).collect();
        if ids.is_empty() {
            return Ok(0);
        }
        self.sink.delete(&ids)?;
        tracing::info!(rows = ids.len(), "Filtered remote contacts deleted");
        Ok(ids.len())
    }

    /// List, filter by `range`, and delete the matches.
    pub fn delete_in_range(&self, range: DateRange) -> Result<usize, RemoteError> {
        let rows = self.list()?;
        let matched = self.filter_by_date(&rows, range);
        self.delete_rows(&matched)
    }
}
