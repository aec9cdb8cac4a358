use serde::Deserialize;
use serde_json::json;

use super::image::DecodedImage;
use super::parser::parse_extraction_response;
use super::ExtractionError;
use crate::models::{FieldMap, FieldSchema};
use crate::pipeline::reconcile::traits::ExtractionClient;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

/// Gemini `generateContent` client for structured field extraction.
pub struct GeminiClient {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl GeminiClient {
    pub fn new(api_key: &str, model: &str, timeout_secs: u64) -> Result<Self, ExtractionError> {
        Self::with_base_url(DEFAULT_GEMINI_BASE_URL, api_key, model, timeout_secs)
    }

    /// Point at a non-default endpoint (proxy, regional host, test server).
    pub fn with_base_url(
        base_url: &str,
        api_key: &str,
        model: &str,
        timeout_secs: u64,
    ) -> Result<Self, ExtractionError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ExtractionError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            client,
            timeout_secs,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

/// Instruction text sent alongside the image.
pub fn build_prompt(schema: &FieldSchema) -> String {
    let listing: Vec<String> = schema
        .fields()
        .iter()
        .map(|f| format!("- {} ({})", f.key, f.display_label))
        .collect();
    format!(
        "Extract the following fields from this business card or document image.\n\
         Return one JSON object using exactly these keys:\n{}\n\
         Omit a key when the image does not show that information. Do not invent values.",
        listing.join("\n")
    )
}

/// Full `generateContent` request body: prompt text, inline image, and a
/// response schema whose properties follow the field order.
pub fn build_request_body(image: &DecodedImage, schema: &FieldSchema) -> serde_json::Value {
    let keys = schema.keys();
    let properties: serde_json::Map<String, serde_json::Value> = keys
        .iter()
        .map(|k| (k.to_string(), json!({ "type": "STRING" })))
        .collect();

    json!({
        "contents": [{
            "parts": [
                { "text": build_prompt(schema) },
                { "inlineData": { "mimeType": image.mime_type, "data": image.to_base64() } }
            ]
        }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": {
                "type": "OBJECT",
                "properties": properties,
                "propertyOrdering": keys,
            }
        }
    })
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

/// Concatenate the text parts of the first candidate.
fn response_text(raw: &str) -> Result<String, ExtractionError> {
    let parsed: GenerateContentResponse =
        serde_json::from_str(raw).map_err(|e| ExtractionError::JsonParsing(e.to_string()))?;

    let candidate = parsed
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ExtractionError::MalformedResponse("no candidates returned".into()))?;

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".into());
        return Err(ExtractionError::MalformedResponse(format!(
            "candidate has no text (finish reason: {reason})"
        )));
    }
    Ok(text)
}

impl ExtractionClient for GeminiClient {
    fn extract(&self, image: &DecodedImage, schema: &FieldSchema) -> Result<FieldMap, ExtractionError> {
        let body = build_request_body(image, schema);

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_connect() {
                    ExtractionError::Connection(self.base_url.clone())
                } else if e.is_timeout() {
                    ExtractionError::Timeout(self.timeout_secs)
                } else {
                    ExtractionError::HttpClient(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ExtractionError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let raw = response
            .text()
            .map_err(|e| ExtractionError::HttpClient(e.to_string()))?;
        let text = response_text(&raw)?;
        let fields = parse_extraction_response(&text, schema)?;

        tracing::debug!(
            model = %self.model,
            image_bytes = image.len(),
            fields = fields.len(),
            "Extraction response parsed"
        );
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> DecodedImage {
        DecodedImage::new(vec![0xFF, 0xD8, 0xFF], "image/jpeg")
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let client = GeminiClient::with_base_url("http://localhost:8080/", "k", "m", 5).unwrap();
        assert_eq!(client.endpoint(), "http://localhost:8080/models/m:generateContent");
    }

    #[test]
    fn default_endpoint_uses_model() {
        let client = GeminiClient::new("k", DEFAULT_GEMINI_MODEL, 5).unwrap();
        assert_eq!(client.model(), "gemini-2.5-flash");
        assert!(client.endpoint().ends_with("/models/gemini-2.5-flash:generateContent"));
    }

    #[test]
    fn request_body_carries_image_and_ordered_keys() {
        let schema = FieldSchema::default_contact();
        let body = build_request_body(&image(), &schema);

        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(parts[1]["inlineData"]["data"], "/9j/");

        let ordering: Vec<&str> = body["generationConfig"]["responseSchema"]["propertyOrdering"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert_eq!(ordering, schema.keys());
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
    }

    #[test]
    fn prompt_lists_every_key() {
        let schema = FieldSchema::default_contact();
        let prompt = build_prompt(&schema);
        for key in schema.keys() {
            assert!(prompt.contains(key), "prompt missing {key}");
        }
    }

    #[test]
    fn response_text_joins_parts() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"{\"name\":"},{"text":"\"Ada\"}"}]}}]}"#;
        assert_eq!(response_text(raw).unwrap(), r#"{"name":"Ada"}"#);
    }

    #[test]
    fn response_without_candidates_is_malformed() {
        assert!(matches!(
            response_text(r#"{"candidates":[]}"#),
            Err(ExtractionError::MalformedResponse(_))
        ));
        assert!(matches!(
            response_text(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#),
            Err(ExtractionError::MalformedResponse(msg)) if msg.contains("SAFETY")
        ));
    }

    #[test]
    fn unreachable_host_is_connection_error() {
        // Port 9 (discard) on localhost is essentially never listening.
        let client = GeminiClient::with_base_url("http://127.0.0.1:9", "k", "m", 2).unwrap();
        let err = client.extract(&image(), &FieldSchema::default_contact()).unwrap_err();
        assert!(matches!(
            err,
            ExtractionError::Connection(_) | ExtractionError::HttpClient(_) | ExtractionError::Timeout(_)
        ));
    }
}
