// Channel naming
//
// The engine routes by channel name, so these must match it byte for byte.

/// Well-known channel the engine listens on
pub const DEFAULT_ENGINE_CHANNEL: &str = "/processengine";

/// Private inbound channel of a session
pub fn participant_channel(participant_id: &str) -> String {
    format!("/participant/{participant_id}")
}

/// Command channel of a task (proceed / event messages go here)
pub fn task_channel(task_id: &str) -> String {
    format!("/processengine/node/{task_id}")
}

/// Event channel the engine uses to push task-scoped events
pub fn task_event_channel(task_id: &str) -> String {
    format!("/processengine_api/event/{task_id}")
}
