use super::RemotePayload;
use crate::models::{FieldMap, FieldSchema, Record};

/// Map schema fields to remote columns. Keys outside the schema are dropped,
/// so reserved local attributes can never leak into a payload.
pub fn build_remote_payload(fields: &FieldMap, schema: &FieldSchema) -> RemotePayload {
    let mut payload = RemotePayload::new();
    for spec in schema.fields() {
        if let Some(value) = fields.get(&spec.key) {
            payload.insert(spec.remote_name(), value.to_json());
        }
    }

    let dropped = fields.keys().filter(|k| !schema.contains(k)).count();
    if dropped > 0 {
        tracing::debug!(dropped, "Fields outside the schema left out of remote payload");
    }
    payload
}

/// Payload for a record's remote insert.
pub fn payload_for_record(record: &Record, schema: &FieldSchema) -> RemotePayload {
    build_remote_payload(&record.fields, schema)
}
