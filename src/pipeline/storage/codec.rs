//! Persisted blob layout.
//!
//! A JSON array of flat objects:
//! `{ id, imageSrc, analyzed, saved, createdAt, updatedAt?, extractedAt?, <field>... }`
//!
//! Older blobs omit `saved` (read as false) and `createdAt` (derived from the
//! millisecond id, falling back to load time). Field keys follow the envelope
//! keys in insertion order.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::StoreError;
use crate::models::{FieldMap, Lifecycle, Record, RESERVED_KEYS};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRecord {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    #[serde(alias = "imageRef", default)]
    image_src: String,
    #[serde(default)]
    analyzed: bool,
    #[serde(default)]
    saved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    extracted_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    fields: serde_json::Map<String, serde_json::Value>,
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(serde_json::Number),
    }
    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}

/// Serialize the full collection.
pub fn encode_records(records: &[Record]) -> Result<String, StoreError> {
    let stored: Vec<StoredRecord> = records.iter().map(to_stored).collect();
    serde_json::to_string(&stored).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Parse a persisted blob. Blank or `null` blobs are an empty collection.
pub fn decode_records(blob: &str) -> Result<Vec<Record>, StoreError> {
    if blob.trim().is_empty() {
        return Ok(Vec::new());
    }

    let stored: Option<Vec<StoredRecord>> =
        serde_json::from_str(blob).map_err(|e| StoreError::Corrupt(e.to_string()))?;

    let mut records: Vec<Record> = Vec::new();
    for item in stored.unwrap_or_default() {
        let record = from_stored(item);
        // One record per id: a later duplicate replaces the earlier one in place.
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => {
                tracing::warn!(record_id = %record.id, "Duplicate record id in stored collection");
                *existing = record;
            }
            None => records.push(record),
        }
    }
    Ok(records)
}

fn to_stored(record: &Record) -> StoredRecord {
    let (analyzed, saved) = record.lifecycle.to_flags();
    StoredRecord {
        id: record.id.clone(),
        image_src: record.image_ref().to_string(),
        analyzed,
        saved,
        created_at: Some(record.created_at),
        updated_at: record.updated_at,
        extracted_at: record.extracted_at,
        fields: record.fields.to_json_object(),
    }
}

fn from_stored(stored: StoredRecord) -> Record {
    if stored.saved && !stored.analyzed {
        tracing::warn!(
            record_id = %stored.id,
            "Stored record marked saved but not analyzed, reading as unanalyzed"
        );
    }
    let lifecycle = Lifecycle::from_flags(stored.analyzed, stored.saved);

    let mut fields = FieldMap::from_json_object(&stored.fields);
    fields.retain(|key, _| !RESERVED_KEYS.contains(&key));

    let created_at = stored
        .created_at
        .or_else(|| created_at_from_id(&stored.id))
        .unwrap_or_else(Utc::now);

    Record::restore(
        stored.id,
        stored.image_src,
        lifecycle,
        fields,
        created_at,
        stored.updated_at,
        stored.extracted_at,
    )
}

/// Ids minted at capture are millisecond timestamps.
fn created_at_from_id(id: &str) -> Option<DateTime<Utc>> {
    let millis: i64 = id.parse().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}
