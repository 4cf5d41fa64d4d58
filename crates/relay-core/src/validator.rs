//! Classification of inbound messages before they are relayed.
//!
//! Validators are pure: no I/O, no side effects, and total over every
//! possible body. Anything that cannot be read is rejected as
//! [`MALFORMED_PAYLOAD`] rather than raising an error.

use crate::config::ValidationConfig;
use relay_runtime::ReceivedMessage;
use serde_json::Value;

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;

/// Reject reason for payloads whose text is shorter than the configured minimum
pub const VALIDATION_EXCEPTION: &str = "ValidationException";

/// Reject reason for payloads that cannot be parsed
pub const MALFORMED_PAYLOAD: &str = "MalformedPayload";

/// Text extracted from an accepted message
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    /// The validated text
    pub text: String,

    /// The parsed body when the text came from a JSON field
    pub document: Option<Value>,

    /// Name of the JSON field holding the text
    pub field: Option<String>,
}

impl Payload {
    /// Payload read from a plain-text body
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            document: None,
            field: None,
        }
    }
}

/// Result of classifying a message
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    Accept(Payload),
    Reject { reason: String, description: String },
}

impl ValidationResult {
    pub fn reject(reason: &str, description: impl Into<String>) -> Self {
        Self::Reject {
            reason: reason.to_string(),
            description: description.into(),
        }
    }

    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept(_))
    }
}

/// Classifies a message as accepted or rejected
#[cfg_attr(test, mockall::automock)]
pub trait Validator: Send + Sync {
    fn validate(&self, message: &ReceivedMessage) -> ValidationResult;
}

/// Rejects messages whose text is shorter than a minimum length
#[derive(Debug, Clone, Default)]
pub struct MinLengthValidator {
    config: ValidationConfig,
}

impl MinLengthValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn min_length(&self) -> usize {
        self.config.min_length
    }

    fn extract(&self, message: &ReceivedMessage) -> Result<Payload, String> {
        let Some(field) = &self.config.text_field else {
            return message
                .body_text()
                .map(Payload::text)
                .map_err(|e| e.to_string());
        };

        let document: Value = serde_json::from_slice(&message.body)
            .map_err(|e| format!("Message body is not valid JSON: {}", e))?;

        let text = document
            .as_object()
            .ok_or_else(|| "Message body is not a JSON object".to_string())?
            .get(field)
            .and_then(Value::as_str)
            .ok_or_else(|| format!("Field '{}' is missing or not a string", field))?
            .to_string();

        Ok(Payload {
            text,
            document: Some(document),
            field: Some(field.clone()),
        })
    }
}

impl Validator for MinLengthValidator {
    fn validate(&self, message: &ReceivedMessage) -> ValidationResult {
        let payload = match self.extract(message) {
            Ok(payload) => payload,
            Err(description) => return ValidationResult::reject(MALFORMED_PAYLOAD, description),
        };

        let length = payload.text.chars().count();
        if length < self.config.min_length {
            return ValidationResult::reject(
                VALIDATION_EXCEPTION,
                format!(
                    "Message is too short: {} characters, minimum is {}",
                    length, self.config.min_length
                ),
            );
        }

        ValidationResult::Accept(payload)
    }
}
