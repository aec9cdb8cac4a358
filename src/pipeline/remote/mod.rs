//! Hosted table access.
//!
//! Finalized records leave the device as flat `RemotePayload` rows keyed by
//! remote column name. Local-only attributes (id, image, lifecycle) are never
//! part of a payload.

pub mod payload;
pub mod postgrest;
pub mod contacts;
pub mod mock;

pub use contacts::{DateRange, RemoteContacts};
pub use mock::MockRemoteSink;
pub use payload::{build_remote_payload, payload_for_record};
pub use postgrest::PostgrestSink;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Cannot reach hosted table at {0}")]
    Connection(String),

    #[error("Remote request timed out after {0}s")]
    Timeout(u64),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Hosted table returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Response parsing failed: {0}")]
    ResponseParsing(String),

    #[error("Remote write rejected: {0}")]
    Rejected(String),
}

/// One row to insert or update, keyed by remote column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemotePayload {
    columns: serde_json::Map<String, serde_json::Value>,
}

impl RemotePayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: &str, value: serde_json::Value) {
        self.columns.insert(column.to_string(), value);
    }

    pub fn remove(&mut self, column: &str) -> Option<serde_json::Value> {
        self.columns.remove(column)
    }

    pub fn get(&self, column: &str) -> Option<&serde_json::Value> {
        self.columns.get(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn as_map(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.columns
    }
}

/// A row read back from the hosted table. `id` is the table's own key,
/// unrelated to local record ids.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRow {
    pub id: String,
    pub values: serde_json::Map<String, serde_json::Value>,
}

impl RemoteRow {
    pub fn new(id: &str, values: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            id: id.to_string(),
            values,
        }
    }

    /// Split a JSON row into its id and the remaining columns.
    pub fn from_json(value: serde_json::Value) -> Result<Self, RemoteError> {
        let serde_json::Value::Object(mut values) = value else {
            return Err(RemoteError::ResponseParsing("row is not an object".into()));
        };
        let id = match values.remove("id") {
            Some(serde_json::Value::String(s)) => s,
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => return Err(RemoteError::ResponseParsing("row has no id".into())),
        };
        Ok(Self { id, values })
    }

    pub fn get(&self, column: &str) -> Option<&serde_json::Value> {
        self.values.get(column)
    }

    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.values.get(column).and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn row_from_json_splits_id() {
        let row = RemoteRow::from_json(json!({"id": 7, "name": "Ada", "date_added": "2024-06-10"})).unwrap();
        assert_eq!(row.id, "7");
        assert!(row.get("id").is_none());
        assert_eq!(row.get_str("name"), Some("Ada"));
    }

    #[test]
    fn row_without_id_is_rejected() {
        assert!(RemoteRow::from_json(json!({"name": "Ada"})).is_err());
        assert!(RemoteRow::from_json(json!(["not", "a", "row"])).is_err());
    }

    #[test]
    fn payload_serializes_flat() {
        let mut payload = RemotePayload::new();
        payload.insert("name", json!("Ada"));
        payload.insert("product_amt", json!(12.5));
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({"name": "Ada", "product_amt": 12.5})
        );
    }
}
