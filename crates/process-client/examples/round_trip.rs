//! Round Trip Example - One process run against an in-process fake engine
//!
//! The fake engine answers `start` with a user task, echoes participant data
//! back on the task's event channel, and finishes the run when the task
//! proceeds. The handler fills in the form, then proceeds.
//!
//! Run with: RUST_LOG=process_client=debug cargo run -p process-client --example round_trip

use std::sync::Arc;

use async_trait::async_trait;
use process_client::{
    channels, Envelope, ExecutionContext, InMemoryMessageBus, MessageBus, MessageListener,
    ProcessSession, SessionConfig, TaskHandler,
};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

const TASK_ID: &str = "review-1";

/// Minimal stand-in for the process engine
struct FakeEngine {
    bus: InMemoryMessageBus,
}

#[async_trait]
impl MessageListener for FakeEngine {
    async fn on_message(&self, envelope: Envelope) -> process_client::Result<()> {
        let participant = channels::participant_channel(
            envelope.metadata.participant_id.as_deref().unwrap_or_default(),
        );

        let (channel, reply) = match (envelope.action(), envelope.data.get("eventType")) {
            (Some("start"), _) => (
                participant,
                json!({
                    "action": "userTask",
                    "data": {
                        "userTaskEntity": {"id": TASK_ID, "nodeDef": {"key": "review"}},
                        "uiName": "ReviewForm",
                        "uiConfig": {"fields": ["comment"]},
                        "uiData": envelope.data["token"].clone()
                    }
                }),
            ),
            (Some("event"), Some(event_type)) if event_type == "data" => (
                channels::task_event_channel(TASK_ID),
                json!({"action": "event", "eventType": "saved", "data": envelope.data["data"].clone()}),
            ),
            (Some("proceed"), _) => (
                participant,
                json!({"action": "endEvent", "data": envelope.data["token"].clone()}),
            ),
            _ => return Ok(()),
        };

        self.bus.publish(&channel, Envelope::new(reply)).await?;
        Ok(())
    }
}

/// Handler that comments on the review and proceeds once the engine saved it
struct Reviewer;

#[async_trait]
impl TaskHandler for Reviewer {
    async fn handle_user_task(
        &self,
        session: &ProcessSession,
        ui_name: Option<&str>,
        _ui_config: &Value,
        token_data: &Value,
    ) -> anyhow::Result<()> {
        println!("user task {:?} with token {}", ui_name, token_data);
        session
            .do_event(&ExecutionContext::new(), Some(json!({"comment": "looks good"})))
            .await?;
        Ok(())
    }

    async fn handle_manual_task(
        &self,
        _session: &ProcessSession,
        task_name: Option<&str>,
        _task_config: &Value,
        _token_data: &Value,
    ) -> anyhow::Result<()> {
        println!("manual task {:?}", task_name);
        Ok(())
    }

    async fn handle_end_event(
        &self,
        _session: &ProcessSession,
        token_data: &Value,
    ) -> anyhow::Result<()> {
        println!("process finished with {}", token_data);
        Ok(())
    }

    async fn handle_event(
        &self,
        session: &ProcessSession,
        event_type: &str,
        data: &Value,
    ) -> anyhow::Result<()> {
        println!("task event {event_type}: {data}");
        session.do_proceed(&ExecutionContext::new()).await?;
        Ok(())
    }

    async fn handle_cancel(&self, _session: &ProcessSession) -> anyhow::Result<()> {
        println!("task cancelled");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (PROCESSENGINE_CHANNEL, RUST_LOG)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Process session round trip ===\n");

    let config = SessionConfig::from_env();
    let bus = InMemoryMessageBus::new();
    let engine = Arc::new(FakeEngine { bus: bus.clone() });
    let _engine_inbound = bus.subscribe(&config.engine_channel, engine.clone()).await?;
    let _engine_task = bus
        .subscribe(&channels::task_channel(TASK_ID), engine)
        .await?;

    let session = ProcessSession::with_config(
        "invoice_review",
        Arc::new(bus.clone()),
        Some(Arc::new(Reviewer)),
        config,
    );
    println!("participant: {}\n", session.participant_id());

    session
        .start(&ExecutionContext::new(), Some(json!({"invoice": 4711})))
        .await?;
    bus.wait_idle().await;

    println!("\nsession active: {}", session.is_active().await);
    println!("messages published: {}", bus.published().await.len());
    Ok(())
}
