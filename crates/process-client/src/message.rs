// Message envelopes exchanged with the process engine
//
// Outbound commands (start, continue, event, proceed) are a tagged enum that
// serializes into the envelope's `data`. Inbound notifications are decoded
// from the raw `data` into closed enums with an explicit fallback, so an
// unrecognized action tag is a no-op instead of an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::error::Result;

/// Event types carried by `event` messages
pub mod event_types {
    /// Task cancellation
    pub const CANCEL: &str = "cancel";

    /// Participant supplied data
    pub const DATA: &str = "data";

    /// Participant reported error
    pub const ERROR: &str = "error";
}

// ============================================================================
// Envelope
// ============================================================================

/// Logical message wrapper: payload plus correlation metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Action tag and action-specific fields
    pub data: Value,

    /// Correlation metadata
    #[serde(default)]
    pub metadata: Metadata,
}

/// Correlation metadata attached to every envelope
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Message id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Session the message belongs to; the engine replies on its participant channel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<String>,

    /// Execution context of the sender
    #[serde(flatten)]
    pub context: ExecutionContext,
}

impl Envelope {
    /// Create an envelope with empty metadata
    pub fn new(data: Value) -> Self {
        Self {
            data,
            metadata: Metadata::default(),
        }
    }

    /// Build the envelope for an outbound command
    ///
    /// Assigns a fresh message id and tags the metadata with the participant id.
    pub fn data_message(
        command: &Command,
        context: &ExecutionContext,
        participant_id: &str,
    ) -> Result<Self> {
        Ok(Self {
            data: serde_json::to_value(command)?,
            metadata: Metadata {
                id: Some(Uuid::now_v7().to_string()),
                participant_id: Some(participant_id.to_string()),
                context: context.clone(),
            },
        })
    }

    /// The `data.action` tag, if present
    pub fn action(&self) -> Option<&str> {
        self.data.get("action").and_then(Value::as_str)
    }

    /// Decode `data` back into a command
    pub fn command(&self) -> Result<Command> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

// ============================================================================
// Outbound commands
// ============================================================================

/// Commands a session sends to the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Command {
    /// Start a new run of a process definition
    Start {
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<Value>,
    },

    /// Resume a run at a task the engine already knows
    Continue {
        #[serde(rename = "nodeInstanceRef")]
        node_instance_ref: EntityReference,
    },

    /// Task-scoped event (cancel, data, error)
    Event {
        #[serde(rename = "eventType")]
        event_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },

    /// Finish the current task with the given token
    Proceed {
        #[serde(default)]
        token: Value,
    },
}

impl Command {
    /// The wire action tag
    pub fn action(&self) -> &'static str {
        match self {
            Command::Start { .. } => "start",
            Command::Continue { .. } => "continue",
            Command::Event { .. } => "event",
            Command::Proceed { .. } => "proceed",
        }
    }

    /// Create a task event command
    pub fn event(event_type: impl Into<String>, data: Option<Value>) -> Self {
        Command::Event {
            event_type: event_type.into(),
            data,
        }
    }
}

/// Typed pointer to an entity the engine already holds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityReference {
    pub id: String,
    #[serde(rename = "_meta")]
    pub meta: EntityMeta,
}

/// Reference metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMeta {
    pub is_ref: bool,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub is_new: bool,
}

impl EntityReference {
    /// Reference to an existing user task
    pub fn user_task(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            meta: EntityMeta {
                is_ref: true,
                entity_type: "UserTask".to_string(),
                namespace: None,
                is_new: false,
            },
        }
    }
}

// ============================================================================
// Inbound notifications
// ============================================================================

/// Task entity as sent by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEntity {
    pub id: String,

    /// Definition of the task node
    #[serde(default)]
    pub node_def: Value,

    /// Remaining entity fields
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Payload of `userTask` / `manualTask` notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMessageData {
    pub user_task_entity: TaskEntity,

    #[serde(default)]
    pub ui_name: Option<String>,

    #[serde(default)]
    pub ui_config: Value,

    #[serde(default)]
    pub ui_data: Option<Value>,
}

impl TaskMessageData {
    /// Token data the task starts with (`uiData`, or `{}` when absent or falsy)
    pub fn initial_token(&self) -> Value {
        or_empty_object(self.ui_data.clone().unwrap_or(Value::Null))
    }
}

/// Notification received on the participant channel
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// The engine waits on a user task
    UserTask(TaskMessageData),

    /// The engine waits on a manual task
    ManualTask(TaskMessageData),

    /// The process reached an end event
    EndEvent(Value),

    /// Known action whose payload could not be decoded
    Malformed { action: String, reason: String },

    /// Missing or unrecognized action
    Unrecognized(Option<String>),
}

impl Notification {
    /// Decode a participant channel envelope
    pub fn from_envelope(envelope: &Envelope) -> Self {
        let payload = envelope.data.get("data").cloned().unwrap_or(Value::Null);

        match envelope.action() {
            Some("userTask") => Self::decode_task("userTask", payload, Notification::UserTask),
            Some("manualTask") => {
                Self::decode_task("manualTask", payload, Notification::ManualTask)
            }
            Some("endEvent") => Notification::EndEvent(or_empty_object(payload)),
            other => Notification::Unrecognized(other.map(str::to_string)),
        }
    }

    fn decode_task(
        action: &str,
        payload: Value,
        wrap: fn(TaskMessageData) -> Notification,
    ) -> Self {
        match serde_json::from_value::<TaskMessageData>(payload) {
            Ok(data) => wrap(data),
            Err(e) => Notification::Malformed {
                action: action.to_string(),
                reason: e.to_string(),
            },
        }
    }
}

/// Message received on a task's event channel
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// The task was cancelled
    Cancel,

    /// Any other event type, with its payload (`{}` when absent)
    Event { event_type: String, data: Value },

    /// Not an event, or an event without a type
    Unrecognized,
}

impl TaskEvent {
    /// Decode a task event channel envelope
    pub fn from_envelope(envelope: &Envelope) -> Self {
        if envelope.action() != Some("event") {
            return TaskEvent::Unrecognized;
        }

        match envelope.data.get("eventType").and_then(Value::as_str) {
            Some(event_types::CANCEL) => TaskEvent::Cancel,
            Some(event_type) => TaskEvent::Event {
                event_type: event_type.to_string(),
                data: or_empty_object(envelope.data.get("data").cloned().unwrap_or(Value::Null)),
            },
            None => TaskEvent::Unrecognized,
        }
    }
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// `null`, `false`, `0` and `""` count as absent payloads
fn is_absent(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

fn or_empty_object(value: Value) -> Value {
    if is_absent(&value) {
        empty_object()
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_start_envelope_shape() {
        let ctx = ExecutionContext::with_token("tok");
        let cmd = Command::Start {
            key: "P1".to_string(),
            token: Some(json!({"a": 1})),
        };

        let envelope = Envelope::data_message(&cmd, &ctx, "participant-1").unwrap();

        assert_eq!(
            envelope.data,
            json!({"action": "start", "key": "P1", "token": {"a": 1}})
        );
        assert_eq!(envelope.metadata.participant_id.as_deref(), Some("participant-1"));
        assert_eq!(envelope.metadata.context.encrypted_token.as_deref(), Some("tok"));
        assert!(envelope.metadata.id.is_some());

        let wire = serde_json::to_value(&envelope).unwrap();
        assert_eq!(wire["metadata"]["participantId"], "participant-1");
        assert_eq!(wire["metadata"]["encryptedToken"], "tok");
    }

    #[test]
    fn test_start_without_token_omits_field() {
        let cmd = Command::Start {
            key: "P1".to_string(),
            token: None,
        };
        assert_eq!(
            serde_json::to_value(&cmd).unwrap(),
            json!({"action": "start", "key": "P1"})
        );
    }

    #[test]
    fn test_continue_carries_user_task_reference() {
        let cmd = Command::Continue {
            node_instance_ref: EntityReference::user_task("task-9"),
        };
        assert_eq!(
            serde_json::to_value(&cmd).unwrap(),
            json!({
                "action": "continue",
                "nodeInstanceRef": {
                    "id": "task-9",
                    "_meta": {"isRef": true, "type": "UserTask", "isNew": false}
                }
            })
        );
    }

    #[test]
    fn test_event_and_proceed_shapes() {
        let cmd = Command::event(event_types::ERROR, Some(json!({"code": 42})));
        assert_eq!(
            serde_json::to_value(&cmd).unwrap(),
            json!({"action": "event", "eventType": "error", "data": {"code": 42}})
        );

        let cmd = Command::Proceed {
            token: json!({"x": 1}),
        };
        assert_eq!(cmd.action(), "proceed");
        assert_eq!(
            serde_json::to_value(&cmd).unwrap(),
            json!({"action": "proceed", "token": {"x": 1}})
        );
    }

    #[test]
    fn test_decode_user_task_notification() {
        let envelope = Envelope::new(json!({
            "action": "userTask",
            "data": {
                "userTaskEntity": {"id": "t-1", "nodeDef": {"key": "approve"}, "name": "Approve"},
                "uiName": "Form",
                "uiConfig": {"layout": []},
                "uiData": {"x": 1}
            }
        }));

        match Notification::from_envelope(&envelope) {
            Notification::UserTask(data) => {
                assert_eq!(data.user_task_entity.id, "t-1");
                assert_eq!(data.user_task_entity.node_def, json!({"key": "approve"}));
                assert_eq!(data.user_task_entity.extra["name"], "Approve");
                assert_eq!(data.ui_name.as_deref(), Some("Form"));
                assert_eq!(data.initial_token(), json!({"x": 1}));
            }
            other => panic!("unexpected notification: {other:?}"),
        }
    }

    #[test]
    fn test_missing_ui_data_defaults_to_empty_object() {
        let envelope = Envelope::new(json!({
            "action": "manualTask",
            "data": {"userTaskEntity": {"id": "t-2"}, "uiData": null}
        }));

        match Notification::from_envelope(&envelope) {
            Notification::ManualTask(data) => assert_eq!(data.initial_token(), json!({})),
            other => panic!("unexpected notification: {other:?}"),
        }
    }

    #[test]
    fn test_task_without_entity_is_malformed() {
        let envelope = Envelope::new(json!({"action": "userTask", "data": {"uiName": "Form"}}));
        assert!(matches!(
            Notification::from_envelope(&envelope),
            Notification::Malformed { ref action, .. } if action == "userTask"
        ));
    }

    #[test]
    fn test_end_event_and_unknown_actions() {
        let envelope = Envelope::new(json!({"action": "endEvent"}));
        assert_eq!(
            Notification::from_envelope(&envelope),
            Notification::EndEvent(json!({}))
        );

        let envelope = Envelope::new(json!({"action": "boundaryEvent"}));
        assert_eq!(
            Notification::from_envelope(&envelope),
            Notification::Unrecognized(Some("boundaryEvent".to_string()))
        );

        let envelope = Envelope::new(json!({"data": {}}));
        assert_eq!(
            Notification::from_envelope(&envelope),
            Notification::Unrecognized(None)
        );
    }

    #[test]
    fn test_decode_task_events() {
        let cancel = Envelope::new(json!({"action": "event", "eventType": "cancel"}));
        assert_eq!(TaskEvent::from_envelope(&cancel), TaskEvent::Cancel);

        let data = Envelope::new(json!({"action": "event", "eventType": "progress", "data": {"p": 50}}));
        assert_eq!(
            TaskEvent::from_envelope(&data),
            TaskEvent::Event {
                event_type: "progress".to_string(),
                data: json!({"p": 50})
            }
        );

        let no_type = Envelope::new(json!({"action": "event"}));
        assert_eq!(TaskEvent::from_envelope(&no_type), TaskEvent::Unrecognized);

        let proceed = Envelope::new(json!({"action": "proceed"}));
        assert_eq!(TaskEvent::from_envelope(&proceed), TaskEvent::Unrecognized);
    }

    #[test]
    fn test_inbound_envelope_without_metadata() {
        let envelope: Envelope =
            serde_json::from_value(json!({"data": {"action": "endEvent"}})).unwrap();
        assert_eq!(envelope.metadata, Metadata::default());
        assert_eq!(envelope.action(), Some("endEvent"));
    }

    #[test]
    fn test_falsy_payloads_become_empty_objects() {
        for falsy in [json!(false), json!(0), json!(""), Value::Null] {
            let end = Envelope::new(json!({"action": "endEvent", "data": falsy.clone()}));
            assert_eq!(Notification::from_envelope(&end), Notification::EndEvent(json!({})));

            let event = Envelope::new(json!({
                "action": "event",
                "eventType": "data",
                "data": falsy.clone()
            }));
            assert_eq!(
                TaskEvent::from_envelope(&event),
                TaskEvent::Event {
                    event_type: "data".to_string(),
                    data: json!({}),
                }
            );

            let data: TaskMessageData = serde_json::from_value(json!({
                "userTaskEntity": {"id": "t-3"},
                "uiData": falsy
            }))
            .unwrap();
            assert_eq!(data.initial_token(), json!({}));
        }

        let end = Envelope::new(json!({"action": "endEvent", "data": []}));
        assert_eq!(Notification::from_envelope(&end), Notification::EndEvent(json!([])));
        let end = Envelope::new(json!({"action": "endEvent", "data": 1}));
        assert_eq!(Notification::from_envelope(&end), Notification::EndEvent(json!(1)));
    }
}
