// End-to-end test against a scripted engine
//
// The engine is a MessageListener on the bus: it answers `start` with a user
// task and `proceed` with an end event. Messages travel through the bus
// queues, so handler callbacks run on the bus worker tasks.

use std::sync::Arc;

use async_trait::async_trait;
use process_client::{
    Envelope, ExecutionContext, HandlerCall, InMemoryMessageBus, MessageBus, MessageListener,
    ProcessSession, RecordingTaskHandler, SessionError, TaskHandler,
};
use serde_json::{json, Value};

struct ScriptedEngine {
    bus: InMemoryMessageBus,
}

impl ScriptedEngine {
    async fn reply(&self, request: &Envelope, data: Value) -> process_client::Result<()> {
        let participant_id = request
            .metadata
            .participant_id
            .clone()
            .unwrap_or_default();
        self.bus
            .publish(&format!("/participant/{participant_id}"), Envelope::new(data))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageListener for ScriptedEngine {
    async fn on_message(&self, envelope: Envelope) -> process_client::Result<()> {
        match envelope.action() {
            Some("start") => {
                let token = envelope.data["token"].clone();
                self.reply(
                    &envelope,
                    json!({
                        "action": "userTask",
                        "data": {
                            "userTaskEntity": {"id": "t-1", "nodeDef": {"key": "review"}},
                            "uiName": "ReviewForm",
                            "uiData": token
                        }
                    }),
                )
                .await
            }
            Some("proceed") => {
                let token = envelope.data["token"].clone();
                self.reply(&envelope, json!({"action": "endEvent", "data": token}))
                    .await
            }
            _ => Ok(()),
        }
    }
}

/// Approves every user task immediately
#[derive(Clone, Default)]
struct AutoProceed {
    recorder: RecordingTaskHandler,
}

#[async_trait]
impl TaskHandler for AutoProceed {
    async fn handle_user_task(
        &self,
        session: &ProcessSession,
        ui_name: Option<&str>,
        ui_config: &Value,
        token_data: &Value,
    ) -> anyhow::Result<()> {
        self.recorder
            .handle_user_task(session, ui_name, ui_config, token_data)
            .await?;
        session.do_proceed(&ExecutionContext::new()).await?;
        Ok(())
    }

    async fn handle_manual_task(
        &self,
        session: &ProcessSession,
        task_name: Option<&str>,
        task_config: &Value,
        token_data: &Value,
    ) -> anyhow::Result<()> {
        self.recorder
            .handle_manual_task(session, task_name, task_config, token_data)
            .await
    }

    async fn handle_end_event(
        &self,
        session: &ProcessSession,
        token_data: &Value,
    ) -> anyhow::Result<()> {
        self.recorder.handle_end_event(session, token_data).await
    }

    async fn handle_event(
        &self,
        session: &ProcessSession,
        event_type: &str,
        data: &Value,
    ) -> anyhow::Result<()> {
        self.recorder.handle_event(session, event_type, data).await
    }

    async fn handle_cancel(&self, session: &ProcessSession) -> anyhow::Result<()> {
        self.recorder.handle_cancel(session).await
    }
}

async fn engine_bus() -> InMemoryMessageBus {
    let bus = InMemoryMessageBus::new();
    let engine = Arc::new(ScriptedEngine { bus: bus.clone() });
    // subscriptions live as long as the bus; the handles are not needed
    let _ = bus.subscribe("/processengine", engine.clone()).await.unwrap();
    let _ = bus.subscribe("/processengine/node/t-1", engine).await.unwrap();
    bus
}

#[test_log::test(tokio::test)]
async fn test_full_run_through_scripted_engine() {
    let bus = engine_bus().await;
    let handler = AutoProceed::default();
    let session = ProcessSession::new("P1", Arc::new(bus.clone()), Arc::new(handler.clone()));

    session
        .start(&ExecutionContext::new(), Some(json!({"amount": 120})))
        .await
        .unwrap();
    bus.wait_idle().await;

    assert_eq!(
        handler.recorder.calls().await,
        vec![
            HandlerCall::UserTask {
                ui_name: Some("ReviewForm".to_string()),
                ui_config: Value::Null,
                token_data: json!({"amount": 120}),
            },
            HandlerCall::EndEvent {
                token_data: json!({"amount": 120}),
            },
        ]
    );

    assert!(!session.is_active().await);
    assert!(session.current_task().await.is_none());
    assert_eq!(bus.subscriber_count(&session.participant_channel()).await, 0);
    assert_eq!(bus.subscriber_count("/processengine_api/event/t-1").await, 0);

    let proceeds = bus.published_on("/processengine/node/t-1").await;
    assert_eq!(proceeds.len(), 1);
    assert_eq!(
        proceeds[0].data,
        json!({"action": "proceed", "token": {"amount": 120}})
    );
}

#[test_log::test(tokio::test)]
async fn test_sessions_are_isolated() {
    let bus = engine_bus().await;
    let first = RecordingTaskHandler::new();
    let second = RecordingTaskHandler::new();
    let a = ProcessSession::new("P1", Arc::new(bus.clone()), Arc::new(first.clone()));
    let b = ProcessSession::new("P1", Arc::new(bus.clone()), Arc::new(second.clone()));

    a.start(&ExecutionContext::new(), Some(json!({"who": "a"})))
        .await
        .unwrap();
    b.start(&ExecutionContext::new(), Some(json!({"who": "b"})))
        .await
        .unwrap();
    bus.wait_idle().await;

    assert_eq!(a.token_data().await, json!({"who": "a"}));
    assert_eq!(b.token_data().await, json!({"who": "b"}));
    assert_eq!(first.calls().await.len(), 1);
    assert_eq!(second.calls().await.len(), 1);

    a.stop().await.unwrap();
    assert!(b.is_active().await);
    assert!(matches!(
        a.do_proceed(&ExecutionContext::new()).await,
        Err(SessionError::NoCurrentTask { .. })
    ));
    b.do_proceed(&ExecutionContext::new()).await.unwrap();
    bus.wait_idle().await;

    assert!(!b.is_active().await);
    assert_eq!(
        second.calls().await.last(),
        Some(&HandlerCall::EndEvent {
            token_data: json!({"who": "b"}),
        })
    );
}
