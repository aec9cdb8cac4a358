//! Ordered, externally configured list of extractable fields.
//!
//! Shared read-only during a session. Drives the extraction request, the
//! editable field set, and the remote column names.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::record::FieldMap;

/// Keys that belong to the local record envelope and can never be fields.
pub const RESERVED_KEYS: &[&str] = &[
    "id",
    "imageSrc",
    "imageRef",
    "analyzed",
    "saved",
    "lifecycle",
    "createdAt",
    "updatedAt",
    "extractedAt",
];

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Schema has no fields")]
    Empty,

    #[error("Duplicate field key: {0}")]
    DuplicateKey(String),

    #[error("Field key is reserved: {0}")]
    ReservedKey(String),

    #[error("Field key must not be blank")]
    BlankKey,

    #[error("Invalid schema JSON: {0}")]
    Json(String),
}

/// One configured field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    pub key: String,
    #[serde(alias = "header")]
    pub display_label: String,
    #[serde(default = "default_visible")]
    pub visible: bool,
    /// Column name in the hosted table when it differs from `key`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_column: Option<String>,
}

fn default_visible() -> bool {
    true
}

impl FieldSpec {
    pub fn new(key: &str, display_label: &str, visible: bool) -> Self {
        Self {
            key: key.to_string(),
            display_label: display_label.to_string(),
            visible,
            remote_column: None,
        }
    }

    pub fn with_remote_column(mut self, column: &str) -> Self {
        self.remote_column = Some(column.to_string());
        self
    }

    pub fn remote_name(&self) -> &str {
        self.remote_column.as_deref().unwrap_or(&self.key)
    }
}

/// Ordered field list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldSchema {
    fields: Vec<FieldSpec>,
}

impl FieldSchema {
    pub fn new(fields: Vec<FieldSpec>) -> Result<Self, SchemaError> {
        let schema = Self { fields };
        schema.validate()?;
        Ok(schema)
    }

    /// Parse and validate a JSON array of field specs.
    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        let fields: Vec<FieldSpec> =
            serde_json::from_str(json).map_err(|e| SchemaError::Json(e.to_string()))?;
        Self::new(fields)
    }

    /// Business-card / delivery-slip schema used by the capture screens.
    pub fn default_contact() -> Self {
        Self {
            fields: vec![
                FieldSpec::new("name", "Name", true),
                FieldSpec::new("company", "Company", true),
                FieldSpec::new("phone", "Phone", true),
                FieldSpec::new("dateAdded", "Date Added", true).with_remote_column("date_added"),
                FieldSpec::new("address", "Address", false),
                FieldSpec::new("delivery_Amt", "Delivery Amount", true),
                FieldSpec::new("product_Amt", "Product Amount", true),
                FieldSpec::new("mode", "Payment Mode", true),
            ],
        }
    }

    fn validate(&self) -> Result<(), SchemaError> {
        if self.fields.is_empty() {
            return Err(SchemaError::Empty);
        }
        let mut seen = std::collections::HashSet::new();
        for field in &self.fields {
            if field.key.trim().is_empty() {
                return Err(SchemaError::BlankKey);
            }
            if RESERVED_KEYS.contains(&field.key.as_str()) {
                return Err(SchemaError::ReservedKey(field.key.clone()));
            }
            if !seen.insert(field.key.as_str()) {
                return Err(SchemaError::DuplicateKey(field.key.clone()));
            }
        }
        Ok(())
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn keys(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.key.as_str()).collect()
    }

    pub fn visible(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.visible)
    }

    pub fn get(&self, key: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.key == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Keep only schema keys, reordered to schema order.
    pub fn retain_known(&self, fields: &FieldMap) -> FieldMap {
        self.fields
            .iter()
            .filter_map(|spec| fields.get(&spec.key).map(|v| (spec.key.clone(), v.clone())))
            .collect()
    }
}

impl Default for FieldSchema {
    fn default() -> Self {
        Self::default_contact()
    }
}
