//! Field extraction from card images.
//!
//! `image` turns a stored image reference into bytes, `gemini` sends those
//! bytes plus the field schema to a hosted vision model, and `parser`
//! narrows the model's JSON reply down to schema keys.

pub mod image;
pub mod parser;
pub mod gemini;
pub mod mock;

pub use image::{decode_image_ref, DecodedImage};
pub use parser::parse_extraction_response;
pub use gemini::{GeminiClient, DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL};
pub use mock::MockExtractionClient;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Cannot reach extraction service at {0}")]
    Connection(String),

    #[error("Extraction request timed out after {0}s")]
    Timeout(u64),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Extraction service returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Malformed extraction response: {0}")]
    MalformedResponse(String),

    #[error("JSON parsing failed: {0}")]
    JsonParsing(String),
}

impl ExtractionError {
    pub fn is_invalid_image(&self) -> bool {
        matches!(self, Self::InvalidImage(_))
    }
}
