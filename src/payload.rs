//! Payload encoding for the publish form and decoding of inbound deliveries
//!
//! Pure functions only; encoding failures are rejected here before any
//! network call is issued.

use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Declared encoding of the text entered in the publish form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// Passed through unchanged.
    #[default]
    Plaintext,
    /// Validated as JSON, then passed as text.
    Json,
    /// Hex digits, whitespace ignored.
    Hex,
    /// Standard base64.
    Base64,
}

/// Encoding errors, rejected synchronously before any network call.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid hex payload: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Encode publish-form text into the on-the-wire payload bytes.
pub fn encode(payload: &str, format: PayloadFormat) -> Result<Vec<u8>, PayloadError> {
    match format {
        PayloadFormat::Plaintext => Ok(payload.as_bytes().to_vec()),
        PayloadFormat::Json => {
            // Validate only; the broker receives the original text.
            serde_json::from_str::<serde_json::Value>(payload)?;
            Ok(payload.as_bytes().to_vec())
        }
        PayloadFormat::Hex => {
            let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
            Ok(hex::decode(compact)?)
        }
        PayloadFormat::Base64 => Ok(base64::engine::general_purpose::STANDARD.decode(payload)?),
    }
}

/// Decode inbound payload bytes to display text (lossy for non-UTF-8).
pub fn decode_text(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload).into_owned()
}

/// Best-effort structured parse of a payload that looks like a JSON object.
///
/// Parse errors are discarded; a payload that merely resembles JSON still
/// renders as text.
pub fn parse_structured(text: &str) -> Option<serde_json::Value> {
    let trimmed = text.trim_start();
    if !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str::<serde_json::Value>(trimmed)
        .ok()
        .filter(serde_json::Value::is_object)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plaintext_passthrough() {
        let bytes = encode("hello deck", PayloadFormat::Plaintext).unwrap();
        assert_eq!(bytes, b"hello deck");
    }

    #[test]
    fn test_json_validated_then_passed_as_text() {
        let text = r#"{"a": 1, "b": [true, null]}"#;
        let bytes = encode(text, PayloadFormat::Json).unwrap();
        assert_eq!(bytes, text.as_bytes());

        assert!(matches!(
            encode("{not json", PayloadFormat::Json),
            Err(PayloadError::Json(_))
        ));
    }

    #[test]
    fn test_hex_ignores_whitespace() {
        let bytes = encode("48 65 6c\n6c 6f", PayloadFormat::Hex).unwrap();
        assert_eq!(bytes, b"Hello");
    }

    #[test]
    fn test_hex_rejects_non_digits() {
        assert!(matches!(
            encode("zz", PayloadFormat::Hex),
            Err(PayloadError::Hex(_))
        ));
        assert!(encode("abc", PayloadFormat::Hex).is_err()); // odd length
    }

    #[test]
    fn test_base64_round_trip() {
        let original = b"deck payload \x00\xff";
        let encoded = base64::engine::general_purpose::STANDARD.encode(original);
        let decoded = encode(&encoded, PayloadFormat::Base64).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_base64_rejects_garbage() {
        assert!(matches!(
            encode("!!not base64!!", PayloadFormat::Base64),
            Err(PayloadError::Base64(_))
        ));
    }

    #[test]
    fn test_hex_round_trip() {
        let original = [0u8, 1, 2, 0xde, 0xad, 0xbe, 0xef];
        let encoded = hex::encode(original);
        let decoded = encode(&encoded, PayloadFormat::Hex).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_parse_structured_objects_only() {
        assert!(parse_structured(r#"{"a":1}"#).is_some());
        assert!(parse_structured("  {\"a\":1}").is_some());
        // Arrays and scalars are left as text.
        assert!(parse_structured("[1,2,3]").is_none());
        assert!(parse_structured("42").is_none());
        // Parse errors are discarded silently.
        assert!(parse_structured("{broken").is_none());
    }

    #[test]
    fn test_decode_text_lossy() {
        assert_eq!(decode_text(b"plain"), "plain");
        let text = decode_text(&[0xff, 0xfe, b'x']);
        assert!(text.ends_with('x'));
    }
}
