// Core traits for pluggable collaborators
//
// The session only talks to the outside world through these seams:
// - MessageBus / Subscription: the pub/sub transport
// - MessageListener: callback the transport invokes per delivered message
// - TaskHandler: consumer business logic reacting to tasks and events

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{BusError, Result};
use crate::message::Envelope;
use crate::session::ProcessSession;

// ============================================================================
// MessageBus - Named pub/sub channels
// ============================================================================

/// Trait for the publish/subscribe transport
///
/// Implementations can:
/// - Bridge to an external broker
/// - Deliver in-process for tests and embedding (see `InMemoryMessageBus`)
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish an envelope on a channel
    async fn publish(&self, channel: &str, envelope: Envelope) -> std::result::Result<(), BusError>;

    /// Register a listener on a channel
    ///
    /// The listener stays registered until the returned subscription is cancelled.
    async fn subscribe(
        &self,
        channel: &str,
        listener: Arc<dyn MessageListener>,
    ) -> std::result::Result<Box<dyn Subscription>, BusError>;
}

/// Handle to an active channel subscription
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Channel this subscription listens on
    fn channel(&self) -> &str;

    /// Stop delivery to the listener
    async fn cancel(&self) -> std::result::Result<(), BusError>;
}

/// Callback invoked by the transport for every delivered envelope
///
/// The transport awaits the returned future before handing the listener its
/// next message; an error tells the transport the message was not handled.
#[async_trait]
pub trait MessageListener: Send + Sync {
    async fn on_message(&self, envelope: Envelope) -> Result<()>;
}

// ============================================================================
// TaskHandler - Consumer reaction to process notifications
// ============================================================================

/// Business logic plugged into a session
///
/// Every method is awaited before the session processes its next inbound
/// message. Handlers may call back into the session (e.g. `do_proceed`).
/// Errors propagate to the transport unchanged.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// The engine waits on a user task
    async fn handle_user_task(
        &self,
        session: &ProcessSession,
        ui_name: Option<&str>,
        ui_config: &Value,
        token_data: &Value,
    ) -> anyhow::Result<()>;

    /// The engine waits on a manual task
    async fn handle_manual_task(
        &self,
        session: &ProcessSession,
        task_name: Option<&str>,
        task_config: &Value,
        token_data: &Value,
    ) -> anyhow::Result<()>;

    /// The process reached an end event
    async fn handle_end_event(&self, session: &ProcessSession, token_data: &Value)
        -> anyhow::Result<()>;

    /// A non-cancel event arrived for the current task
    async fn handle_event(
        &self,
        session: &ProcessSession,
        event_type: &str,
        data: &Value,
    ) -> anyhow::Result<()>;

    /// The current task was cancelled
    async fn handle_cancel(&self, session: &ProcessSession) -> anyhow::Result<()>;
}
