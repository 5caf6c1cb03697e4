// Process Instance Client
//
// This crate provides a client-side session that drives a single remote
// process instance over a publish/subscribe message bus. The process engine
// itself is never linked in; it is reached only through messages.
//
// Key design decisions:
// - Uses traits (MessageBus, Subscription, MessageListener, TaskHandler) for pluggable collaborators
// - Session state is one mutex-guarded struct; inbound dispatch is serialized per session
// - Action tags decode into closed enums with an explicit unrecognized fallback (no-op)
// - Superseded or stopped tasks have their event subscription cancelled
// - stop() without a participant subscription is an error, not a silent no-op
// - Channel names are built in one place and must match the engine exactly

pub mod channels;
pub mod config;
pub mod context;
pub mod error;
pub mod message;
pub mod session;
pub mod traits;

// In-memory implementations for examples and testing
pub mod memory;

// Re-exports for convenience
pub use config::SessionConfig;
pub use context::ExecutionContext;
pub use error::{BusError, Result, SessionError};
pub use memory::{HandlerCall, InMemoryMessageBus, PublishedMessage, RecordingTaskHandler};
pub use message::{
    event_types, Command, EntityReference, Envelope, Metadata, Notification, TaskEntity,
    TaskEvent, TaskMessageData,
};
pub use session::{CurrentTask, ProcessSession};
pub use traits::{MessageBus, MessageListener, Subscription, TaskHandler};
