//! Image reference decoding.
//!
//! Accepted forms:
//! - `data:<mime>;base64,<payload>` (mime defaults to image/jpeg)
//! - `file://<path>` (mime guessed from the extension)
//! - bare base64 (mime sniffed from magic bytes)

use std::path::Path;
use std::sync::LazyLock;

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use regex::Regex;

use super::ExtractionError;

const DEFAULT_MIME: &str = "image/jpeg";

static DATA_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^data:([^;,]*)((?:;[^;,]*)*),(.*)$").unwrap()
});

/// Raw image bytes ready to send to an extraction client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl DecodedImage {
    pub fn new(bytes: Vec<u8>, mime_type: &str) -> Self {
        Self {
            bytes,
            mime_type: mime_type.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }
}

/// Decode a stored image reference. Anything that does not yield at least
/// one byte is `InvalidImage`.
pub fn decode_image_ref(image_ref: &str) -> Result<DecodedImage, ExtractionError> {
    let trimmed = image_ref.trim();
    if trimmed.is_empty() {
        return Err(ExtractionError::InvalidImage("empty image reference".into()));
    }

    let image = if let Some(caps) = DATA_URL.captures(trimmed) {
        let mime = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
        let params = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        let payload = caps.get(3).map(|m| m.as_str()).unwrap_or("");

        if !params.split(';').any(|p| p.eq_ignore_ascii_case("base64")) {
            return Err(ExtractionError::InvalidImage(
                "data URL payload is not base64".into(),
            ));
        }
        let mime = if mime.is_empty() { DEFAULT_MIME } else { mime };
        DecodedImage::new(decode_base64(payload)?, mime)
    } else if let Some(path) = trimmed.strip_prefix("file://") {
        read_image_file(Path::new(path))?
    } else {
        let bytes = decode_base64(trimmed)?;
        let mime = sniff_mime(&bytes);
        DecodedImage::new(bytes, mime)
    };

    if image.is_empty() {
        return Err(ExtractionError::InvalidImage("image decodes to zero bytes".into()));
    }
    Ok(image)
}

fn decode_base64(payload: &str) -> Result<Vec<u8>, ExtractionError> {
    let cleaned: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(&cleaned)
        .or_else(|_| STANDARD_NO_PAD.decode(&cleaned))
        .map_err(|e| ExtractionError::InvalidImage(format!("base64 decode failed: {e}")))
}

fn read_image_file(path: &Path) -> Result<DecodedImage, ExtractionError> {
    let bytes = std::fs::read(path).map_err(|e| {
        ExtractionError::InvalidImage(format!("cannot read {}: {e}", path.display()))
    })?;
    let mime = mime_guess::from_path(path)
        .first_raw()
        .unwrap_or_else(|| sniff_mime(&bytes));
    Ok(DecodedImage::new(bytes, mime))
}

fn sniff_mime(bytes: &[u8]) -> &'static str {
    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => DEFAULT_MIME,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn data_url_with_mime() {
        let image = decode_image_ref("data:image/png;base64,iVBORw0KGgo=").unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.bytes, PNG_MAGIC);
    }

    #[test]
    fn data_url_without_mime_defaults_to_jpeg() {
        let image = decode_image_ref("data:;base64,AAEC").unwrap();
        assert_eq!(image.mime_type, "image/jpeg");
        assert_eq!(image.bytes, vec![0, 1, 2]);
    }

    #[test]
    fn data_url_with_empty_payload_is_invalid() {
        let err = decode_image_ref("data:image/jpeg;base64,").unwrap_err();
        assert!(err.is_invalid_image());
    }

    #[test]
    fn data_url_must_be_base64() {
        let err = decode_image_ref("data:text/plain,hello").unwrap_err();
        assert!(err.is_invalid_image());
    }

    #[test]
    fn empty_reference_is_invalid() {
        assert!(decode_image_ref("").unwrap_err().is_invalid_image());
        assert!(decode_image_ref("   ").unwrap_err().is_invalid_image());
    }

    #[test]
    fn bare_base64_is_sniffed() {
        let encoded = STANDARD.encode(PNG_MAGIC);
        let image = decode_image_ref(&encoded).unwrap();
        assert_eq!(image.mime_type, "image/png");

        let jpeg = STANDARD.encode([0xFF, 0xD8, 0xFF, 0xE0]);
        assert_eq!(decode_image_ref(&jpeg).unwrap().mime_type, "image/jpeg");
    }

    #[test]
    fn garbage_is_invalid_image() {
        let err = decode_image_ref("not base64 at all!!").unwrap_err();
        assert!(err.is_invalid_image());
    }

    #[test]
    fn whitespace_inside_payload_is_ignored() {
        let image = decode_image_ref("data:image/png;base64,iVBO\nRw0K\nGgo=").unwrap();
        assert_eq!(image.bytes, PNG_MAGIC);
    }

    #[test]
    fn file_reference_reads_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("card.png");
        std::fs::write(&path, PNG_MAGIC).unwrap();

        let image = decode_image_ref(&format!("file://{}", path.display())).unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.len(), 8);
    }

    #[test]
    fn empty_or_missing_file_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.jpg");
        std::fs::write(&path, b"").unwrap();
        assert!(decode_image_ref(&format!("file://{}", path.display()))
            .unwrap_err()
            .is_invalid_image());

        let missing = dir.path().join("missing.jpg");
        assert!(decode_image_ref(&format!("file://{}", missing.display()))
            .unwrap_err()
            .is_invalid_image());
    }

    #[test]
    fn to_base64_round_trips_payload() {
        let image = DecodedImage::new(vec![1, 2, 3], "image/jpeg");
        assert_eq!(image.to_base64(), "AQID");
    }
}
