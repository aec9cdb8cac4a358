use std::sync::LazyLock;

use regex::Regex;

use super::ExtractionError;
use crate::models::{FieldMap, FieldSchema};

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*```[A-Za-z]*\s*(.*?)\s*```\s*$").unwrap()
});

/// Parse the model's reply into schema-keyed fields.
///
/// Accepts a bare JSON object, a fenced one, or an array whose first element
/// is an object. Keys outside the schema are dropped; keys the model left
/// out stay absent. Null and blank values are treated as absent.
pub fn parse_extraction_response(
    text: &str,
    schema: &FieldSchema,
) -> Result<FieldMap, ExtractionError> {
    let json_str = strip_code_fence(text);
    if json_str.is_empty() {
        return Err(ExtractionError::MalformedResponse("empty response".into()));
    }

    let value: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| ExtractionError::JsonParsing(e.to_string()))?;

    let object = match &value {
        serde_json::Value::Object(map) => map,
        serde_json::Value::Array(items) => match items.first() {
            Some(serde_json::Value::Object(map)) => map,
            Some(_) => {
                return Err(ExtractionError::MalformedResponse(
                    "array element is not an object".into(),
                ))
            }
            None => return Ok(FieldMap::new()),
        },
        other => {
            return Err(ExtractionError::MalformedResponse(format!(
                "expected a JSON object, got {}",
                json_type_name(other)
            )))
        }
    };

    let mut fields = schema.retain_known(&FieldMap::from_json_object(object));
    fields.retain(|_, value| !value.is_blank());

    let ignored = object.keys().filter(|k| !schema.contains(k)).count();
    if ignored > 0 {
        tracing::debug!(ignored, "Dropped keys outside the field schema");
    }
    Ok(fields)
}

fn strip_code_fence(text: &str) -> &str {
    match CODE_FENCE.captures(text).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => text.trim(),
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
