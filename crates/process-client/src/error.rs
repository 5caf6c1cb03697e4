// Error types for process sessions and the message bus
//
// Precondition errors (no handler, no current task, no subscription) are
// raised by the session itself. Transport errors come from the MessageBus and
// are passed through unchanged. Handler errors are wrapped but not converted.

use thiserror::Error;

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors raised by a message bus implementation
#[derive(Debug, Error)]
pub enum BusError {
    /// Publishing to a channel failed
    #[error("publish to {channel} failed: {reason}")]
    Publish { channel: String, reason: String },

    /// Subscribing to a channel failed
    #[error("subscribe to {channel} failed: {reason}")]
    Subscribe { channel: String, reason: String },

    /// The subscription is not (or no longer) registered
    #[error("subscription {id} on {channel} not found")]
    SubscriptionNotFound { channel: String, id: u64 },

    /// The bus has been shut down
    #[error("message bus closed")]
    Closed,
}

impl BusError {
    /// Create a publish error
    pub fn publish(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        BusError::Publish {
            channel: channel.into(),
            reason: reason.into(),
        }
    }

    /// Create a subscribe error
    pub fn subscribe(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        BusError::Subscribe {
            channel: channel.into(),
            reason: reason.into(),
        }
    }
}

/// Errors that can occur while driving a process session
#[derive(Debug, Error)]
pub enum SessionError {
    /// A notification arrived but the session has no task handler
    #[error("unhandled processable: no task handler defined to handle activities")]
    NoHandler,

    /// A task-scoped action was requested while no task is current
    #[error("no current task: nothing to send {action} to")]
    NoCurrentTask { action: &'static str },

    /// stop() was called while no participant subscription is held
    #[error("session {participant_id} holds no participant subscription")]
    NotSubscribed { participant_id: String },

    /// Transport failure, passed through unchanged
    #[error("transport error: {0}")]
    Transport(#[from] BusError),

    /// The task handler failed
    #[error("task handler error: {0}")]
    Handler(#[source] anyhow::Error),

    /// Envelope (de)serialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SessionError {
    /// Create a no-current-task error for the given outbound action
    pub fn no_current_task(action: &'static str) -> Self {
        SessionError::NoCurrentTask { action }
    }

    /// Wrap a task handler failure
    pub fn handler(err: anyhow::Error) -> Self {
        SessionError::Handler(err)
    }

    /// Returns a short stable label (snake_case) for use in logs
    pub fn as_label(&self) -> &'static str {
        match self {
            SessionError::NoHandler => "no_handler",
            SessionError::NoCurrentTask { .. } => "no_current_task",
            SessionError::NotSubscribed { .. } => "not_subscribed",
            SessionError::Transport(_) => "transport",
            SessionError::Handler(_) => "handler",
            SessionError::Serialization(_) => "serialization",
        }
    }

    /// Whether this error is a violated precondition rather than a runtime failure
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            SessionError::NoHandler
                | SessionError::NoCurrentTask { .. }
                | SessionError::NotSubscribed { .. }
        )
    }
}
