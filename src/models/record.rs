//! One captured document and its extraction state.
//!
//! The lifecycle is a single forward-only enum; the persisted `(analyzed, saved)`
//! flag pair is only a wire detail handled by the storage codec.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════
// Lifecycle
// ═══════════════════════════════════════════

/// Three-state progress of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Unanalyzed,
    AnalyzedUnsaved,
    Saved,
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unanalyzed => "unanalyzed",
            Self::AnalyzedUnsaved => "analyzed_unsaved",
            Self::Saved => "saved",
        }
    }

    /// Collapse the stored flag pair. `saved` without `analyzed` is not a
    /// reachable state and reads as `Unanalyzed`.
    pub fn from_flags(analyzed: bool, saved: bool) -> Self {
        match (analyzed, saved) {
            (true, true) => Self::Saved,
            (true, false) => Self::AnalyzedUnsaved,
            (false, _) => Self::Unanalyzed,
        }
    }

    /// `(analyzed, saved)` as written to the persisted blob.
    pub fn to_flags(self) -> (bool, bool) {
        match self {
            Self::Unanalyzed => (false, false),
            Self::AnalyzedUnsaved => (true, false),
            Self::Saved => (true, true),
        }
    }

    pub fn is_analyzed(self) -> bool {
        self >= Self::AnalyzedUnsaved
    }
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ═══════════════════════════════════════════
// Field values
// ═══════════════════════════════════════════

/// Scalar value of an extracted or edited field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Number(f64),
}

impl FieldValue {
    /// Convert a JSON value into a scalar. Null, arrays and objects have no
    /// scalar form; booleans become text.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            serde_json::Value::Number(n) => n.as_f64().map(Self::Number),
            serde_json::Value::Bool(b) => Some(Self::Text(b.to_string())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
        }
    }

    /// Blank text carries no information for merge purposes.
    pub fn is_blank(&self) -> bool {
        matches!(self, Self::Text(s) if s.trim().is_empty())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Number(_) => None,
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{s}"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

// ═══════════════════════════════════════════
// FieldMap
// ═══════════════════════════════════════════

/// Insertion-ordered mapping of field key → scalar.
///
/// Writes are last-write-wins per key; overwriting a key keeps its original
/// position. Merging is additive: keys absent from the incoming map are kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap {
    entries: IndexMap<String, FieldValue>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert or overwrite. Returns the previous value, if any.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Option<FieldValue> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<FieldValue> {
        self.entries.shift_remove(key)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&str, &FieldValue) -> bool) {
        self.entries.retain(|k, v| keep(k, v));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Additive merge. Every key of `incoming` overwrites; keys not present in
    /// `incoming` are left untouched. Returns the number of keys written.
    pub fn merge_additive(&mut self, incoming: &FieldMap) -> usize {
        for (key, value) in incoming.iter() {
            self.insert(key, value.clone());
        }
        incoming.len()
    }

    /// Build from a JSON object, dropping non-scalar values.
    pub fn from_json_object(object: &serde_json::Map<String, serde_json::Value>) -> Self {
        object
            .iter()
            .filter_map(|(k, v)| FieldValue::from_json(v).map(|fv| (k.clone(), fv)))
            .collect()
    }

    pub fn to_json_object(&self) -> serde_json::Map<String, serde_json::Value> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect()
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = FieldMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

// ═══════════════════════════════════════════
// Record ids
// ═══════════════════════════════════════════

static LAST_RECORD_STAMP: AtomicI64 = AtomicI64::new(0);

/// Generate a record id from the current millisecond clock.
///
/// Ids are strictly increasing within a process: two captures in the same
/// millisecond get consecutive stamps.
pub fn new_record_id() -> String {
    let now = Utc::now().timestamp_millis();
    let mut assigned = now;
    let _ = LAST_RECORD_STAMP.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
        assigned = if now > last { now } else { last + 1 };
        Some(assigned)
    });
    assigned.to_string()
}

// ═══════════════════════════════════════════
// Record
// ═══════════════════════════════════════════

/// One captured document.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    image_ref: String,
    pub lifecycle: Lifecycle,
    pub fields: FieldMap,
    pub created_at: DateTime<Utc>,
    /// Most recent field merge (extraction or user edit).
    pub updated_at: Option<DateTime<Utc>>,
    /// When the last successful extraction landed.
    pub extracted_at: Option<DateTime<Utc>>,
}

impl Record {
    /// Create a freshly captured, unanalyzed record.
    pub fn capture(image_ref: impl Into<String>) -> Self {
        Self::new(new_record_id(), image_ref, Utc::now())
    }

    pub fn new(id: impl Into<String>, image_ref: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            image_ref: image_ref.into(),
            lifecycle: Lifecycle::Unanalyzed,
            fields: FieldMap::new(),
            created_at,
            updated_at: None,
            extracted_at: None,
        }
    }

    /// Reassemble a record from storage. Only the codec should need this.
    pub fn restore(
        id: String,
        image_ref: String,
        lifecycle: Lifecycle,
        fields: FieldMap,
        created_at: DateTime<Utc>,
        updated_at: Option<DateTime<Utc>>,
        extracted_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            image_ref,
            lifecycle,
            fields,
            created_at,
            updated_at,
            extracted_at,
        }
    }

    /// Raw image reference. Set once at capture, never rewritten.
    pub fn image_ref(&self) -> &str {
        &self.image_ref
    }

    pub fn has_image(&self) -> bool {
        !self.image_ref.trim().is_empty()
    }

    /// Merge an extraction result and advance to `AnalyzedUnsaved`.
    ///
    /// Blank values in `extracted` never clobber existing values. When
    /// `timestamp_key` is set, that field is overwritten with `now` regardless
    /// of what was there.
    pub fn apply_extraction(
        &mut self,
        extracted: &FieldMap,
        timestamp_key: Option<&str>,
        now: DateTime<Utc>,
    ) -> usize {
        let mut incoming = extracted.clone();
        incoming.retain(|_, v| !v.is_blank());
        if let Some(key) = timestamp_key {
            incoming.insert(key, now.to_rfc3339());
        }
        let written = self.fields.merge_additive(&incoming);

        if self.lifecycle == Lifecycle::Unanalyzed {
            self.lifecycle = Lifecycle::AnalyzedUnsaved;
        }
        self.extracted_at = Some(now);
        self.updated_at = Some(now);
        written
    }

    /// Apply user edits. Lifecycle is unchanged.
    pub fn apply_edits(&mut self, edits: &FieldMap, now: DateTime<Utc>) -> usize {
        let written = self.fields.merge_additive(edits);
        self.updated_at = Some(now);
        written
    }

    /// Advance to `Saved`. Returns false (and changes nothing) unless the
    /// record is `AnalyzedUnsaved` with at least one field.
    pub fn mark_saved(&mut self) -> bool {
        if self.lifecycle != Lifecycle::AnalyzedUnsaved || self.fields.is_empty() {
            return false;
        }
        self.lifecycle = Lifecycle::Saved;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn ts(h: u32) -> DateTime<Utc> {
        chrono::NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
            .and_utc()
    }

    #[test]
    fn lifecycle_flag_round_trip() {
        for lc in [Lifecycle::Unanalyzed, Lifecycle::AnalyzedUnsaved, Lifecycle::Saved] {
            let (a, s) = lc.to_flags();
            assert_eq!(Lifecycle::from_flags(a, s), lc);
        }
    }

    #[test]
    fn saved_without_analyzed_collapses_to_unanalyzed() {
        assert_eq!(Lifecycle::from_flags(false, true), Lifecycle::Unanalyzed);
    }

    #[test]
    fn lifecycle_ordering_is_forward() {
        assert!(Lifecycle::Unanalyzed < Lifecycle::AnalyzedUnsaved);
        assert!(Lifecycle::AnalyzedUnsaved < Lifecycle::Saved);
        assert!(!Lifecycle::Unanalyzed.is_analyzed());
        assert!(Lifecycle::Saved.is_analyzed());
    }

    #[test]
    fn field_map_overwrite_keeps_position() {
        let mut map: FieldMap = [("name", "A"), ("company", "X")].into_iter().collect();
        let previous = map.insert("name", "B");
        assert_eq!(previous, Some(FieldValue::from("A")));
        let keys: Vec<&str> = map.keys().collect();
        assert_eq!(keys, vec!["name", "company"]);
        assert_eq!(map.get("name"), Some(&FieldValue::from("B")));
    }

    #[test]
    fn field_map_remove_keeps_remaining_order() {
        let mut map: FieldMap = [("name", "A"), ("company", "X"), ("phone", "1")]
            .into_iter()
            .collect();
        assert_eq!(map.remove("company"), Some(FieldValue::from("X")));
        assert_eq!(map.remove("company"), None);
        let keys: Vec<&str> = map.keys().collect();
        assert_eq!(keys, vec!["name", "phone"]);
    }

    #[test]
    fn large_merge_keeps_first_seen_order() {
        let mut map = FieldMap::new();
        let incoming: FieldMap = (0..2000).map(|i| (format!("k{i}"), i as f64)).collect();
        assert_eq!(map.merge_additive(&incoming), 2000);
        assert_eq!(map.merge_additive(&incoming), 2000);
        assert_eq!(map.len(), 2000);
        assert_eq!(map.keys().next(), Some("k0"));
        assert_eq!(map.keys().last(), Some("k1999"));
        assert_eq!(map.get("k42"), Some(&FieldValue::Number(42.0)));
    }

    #[test]
    fn merge_is_additive() {
        let mut record = Record::new("r1", "data:image/png;base64,AAAA", ts(1));
        record.fields.insert("company", "X");

        let extracted: FieldMap = [("name", "Y")].into_iter().collect();
        record.apply_extraction(&extracted, None, ts(2));

        assert_eq!(record.fields.get("company"), Some(&FieldValue::from("X")));
        assert_eq!(record.fields.get("name"), Some(&FieldValue::from("Y")));
        assert_eq!(record.lifecycle, Lifecycle::AnalyzedUnsaved);
    }

    #[test]
    fn blank_extraction_values_do_not_clobber() {
        let mut record = Record::new("r1", "img", ts(1));
        record.fields.insert("phone", "555-0100");

        let extracted: FieldMap = [("phone", ""), ("name", "Ada")].into_iter().collect();
        record.apply_extraction(&extracted, None, ts(2));

        assert_eq!(record.fields.get("phone"), Some(&FieldValue::from("555-0100")));
        assert_eq!(record.fields.get("name"), Some(&FieldValue::from("Ada")));
    }

    #[test]
    fn extraction_stomps_timestamp_field() {
        let mut record = Record::new("r1", "img", ts(1));
        record.fields.insert("dateAdded", "yesterday");

        record.apply_extraction(&FieldMap::new(), Some("dateAdded"), ts(5));

        assert_eq!(
            record.fields.get("dateAdded"),
            Some(&FieldValue::from(ts(5).to_rfc3339()))
        );
        assert_eq!(record.extracted_at, Some(ts(5)));
    }

    #[test]
    fn extraction_never_moves_saved_backward() {
        let mut record = Record::new("r1", "img", ts(1));
        record.fields.insert("name", "Bob");
        record.lifecycle = Lifecycle::Saved;

        let extracted: FieldMap = [("name", "Robert")].into_iter().collect();
        record.apply_extraction(&extracted, None, ts(2));
        assert_eq!(record.lifecycle, Lifecycle::Saved);
    }

    #[test]
    fn image_ref_is_untouched_by_merges() {
        let mut record = Record::new("r1", "data:image/jpeg;base64,/9j/", ts(1));
        let extracted: FieldMap = [("imageSrc", "other")].into_iter().collect();
        record.apply_extraction(&extracted, None, ts(2));
        record.apply_edits(&extracted, ts(3));
        assert_eq!(record.image_ref(), "data:image/jpeg;base64,/9j/");
    }

    #[test]
    fn mark_saved_requires_analyzed_and_fields() {
        let mut record = Record::new("r1", "img", ts(1));
        assert!(!record.mark_saved());

        record.lifecycle = Lifecycle::AnalyzedUnsaved;
        assert!(!record.mark_saved(), "empty fields cannot be saved");

        record.fields.insert("name", "Bob");
        assert!(record.mark_saved());
        assert_eq!(record.lifecycle, Lifecycle::Saved);
    }

    #[test]
    fn record_ids_do_not_collide() {
        let ids: HashSet<String> = (0..500).map(|_| new_record_id()).collect();
        assert_eq!(ids.len(), 500);
    }

    #[test]
    fn record_ids_are_increasing() {
        let a: i64 = new_record_id().parse().unwrap();
        let b: i64 = new_record_id().parse().unwrap();
        assert!(b > a);
    }

    #[test]
    fn field_value_from_json() {
        assert_eq!(
            FieldValue::from_json(&serde_json::json!("x")),
            Some(FieldValue::Text("x".into()))
        );
        assert_eq!(
            FieldValue::from_json(&serde_json::json!(12.5)),
            Some(FieldValue::Number(12.5))
        );
        assert_eq!(FieldValue::from_json(&serde_json::json!(null)), None);
        assert_eq!(FieldValue::from_json(&serde_json::json!({"a": 1})), None);
    }
}
