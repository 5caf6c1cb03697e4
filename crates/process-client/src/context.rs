// Execution context
//
// Caller identity and request-scoped attributes. Every outbound envelope
// copies the context into its metadata so the engine can authorize and
// correlate the request.

use serde::{Deserialize, Serialize};

/// Context a session operation is executed under
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    /// Encrypted identity token of the caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_token: Option<String>,

    /// Preferred locale of the caller (e.g., "en-US")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,

    /// Additional attributes forwarded verbatim
    #[serde(flatten)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl ExecutionContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context carrying an identity token
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            encrypted_token: Some(token.into()),
            ..Self::default()
        }
    }

    /// Set the locale
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    /// Add a custom attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}
