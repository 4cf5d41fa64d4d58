//! Derivation of the outbound payload from an accepted message.

use crate::validator::Payload;
use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

#[cfg(test)]
#[path = "transform_tests.rs"]
mod tests;

/// Suffix appended by the default transformer
pub const DEFAULT_SUFFIX: &str = "_Modified";

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Failed to encode transformed payload: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Transformation rejected payload: {message}")]
    Rejected { message: String },
}

/// Builds the derived payload for an accepted message
pub trait Transformer: Send + Sync {
    fn transform(&self, payload: &Payload) -> Result<Bytes, TransformError>;
}

/// Appends a fixed suffix to the validated text
///
/// JSON payloads keep their other fields; only the text field is rewritten.
#[derive(Debug, Clone)]
pub struct SuffixTransformer {
    suffix: String,
}

impl SuffixTransformer {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }
}

impl Default for SuffixTransformer {
    fn default() -> Self {
        Self::new(DEFAULT_SUFFIX)
    }
}

impl Transformer for SuffixTransformer {
    fn transform(&self, payload: &Payload) -> Result<Bytes, TransformError> {
        let text = format!("{}{}", payload.text, self.suffix);

        match (&payload.document, &payload.field) {
            (Some(document), Some(field)) => {
                let mut document = document.clone();
                let object = document
                    .as_object_mut()
                    .ok_or_else(|| TransformError::Rejected {
                        message: "payload document is not a JSON object".to_string(),
                    })?;
                object.insert(field.clone(), Value::String(text));
                Ok(Bytes::from(serde_json::to_vec(&document)?))
            }
            _ => Ok(Bytes::from(text)),
        }
    }
}
