// Session configuration
//
// SessionConfig can be:
// - Created with defaults that match the engine's well-known channel
// - Loaded from environment variables via `from_env`

use std::env;

use crate::channels::DEFAULT_ENGINE_CHANNEL;

/// Configuration shared by process sessions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Channel the engine listens on for `start` / `continue` commands
    pub engine_channel: String,
}

impl SessionConfig {
    /// Create a configuration with the default engine channel
    pub fn new() -> Self {
        Self {
            engine_channel: DEFAULT_ENGINE_CHANNEL.to_string(),
        }
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `PROCESSENGINE_CHANNEL`: engine inbound channel (default: /processengine)
    pub fn from_env() -> Self {
        let engine_channel = env::var("PROCESSENGINE_CHANNEL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ENGINE_CHANNEL.to_string());

        Self { engine_channel }
    }

    /// Set the engine inbound channel
    pub fn with_engine_channel(mut self, channel: impl Into<String>) -> Self {
        self.engine_channel = channel.into();
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}
