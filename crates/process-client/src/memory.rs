// In-memory implementations for examples and testing
//
// - InMemoryMessageBus: in-process pub/sub with one FIFO queue and worker
//   task per subscription, plus a log of everything published
// - RecordingTaskHandler: TaskHandler that records every invocation

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Notify, RwLock};
use tracing::{debug, warn};

use crate::error::{BusError, Result};
use crate::message::Envelope;
use crate::session::ProcessSession;
use crate::traits::{MessageBus, MessageListener, Subscription, TaskHandler};

// ============================================================================
// InMemoryMessageBus - In-process pub/sub
// ============================================================================

/// A message recorded by [`InMemoryMessageBus`]
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub channel: String,
    pub envelope: Envelope,
}

struct ListenerEntry {
    id: u64,
    listener: Arc<dyn MessageListener>,
    queue: mpsc::UnboundedSender<Envelope>,
}

/// Count of queued-but-unprocessed deliveries
#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn begin(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn end(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

#[derive(Default)]
struct BusState {
    channels: HashMap<String, Vec<ListenerEntry>>,
    published: Vec<PublishedMessage>,
    closed: bool,
}

/// In-memory message bus
///
/// Each subscription owns an unbounded FIFO queue drained by a dedicated
/// worker task, so `publish` never waits for listeners and a listener may
/// publish from inside its own callback. Listener errors are logged.
///
/// Must be used from within a Tokio runtime.
#[derive(Clone, Default)]
pub struct InMemoryMessageBus {
    state: Arc<RwLock<BusState>>,
    in_flight: Arc<InFlight>,
    next_id: Arc<AtomicU64>,
}

impl InMemoryMessageBus {
    /// Create a new in-memory bus
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages published so far, in publish order
    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.state.read().await.published.clone()
    }

    /// Envelopes published on a specific channel
    pub async fn published_on(&self, channel: &str) -> Vec<Envelope> {
        self.state
            .read()
            .await
            .published
            .iter()
            .filter(|m| m.channel == channel)
            .map(|m| m.envelope.clone())
            .collect()
    }

    /// Number of active subscriptions on a channel
    pub async fn subscriber_count(&self, channel: &str) -> usize {
        self.state
            .read()
            .await
            .channels
            .get(channel)
            .map(|l| l.len())
            .unwrap_or(0)
    }

    /// Clear the publish log
    pub async fn clear(&self) {
        self.state.write().await.published.clear();
    }

    /// Reject further publishes and subscriptions
    pub async fn close(&self) {
        let mut state = self.state.write().await;
        state.closed = true;
        state.channels.clear();
    }

    /// Wait until every queued delivery has been processed
    pub async fn wait_idle(&self) {
        loop {
            let idle = self.in_flight.idle.notified();
            if self.in_flight.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Deliver an envelope to a channel's listeners inline, bypassing their queues
    ///
    /// Nothing is recorded in the publish log. Returns each listener's result
    /// in subscription order, so tests can play the engine and observe
    /// handler errors.
    pub async fn deliver(&self, channel: &str, envelope: Envelope) -> Vec<Result<()>> {
        let listeners: Vec<Arc<dyn MessageListener>> = self
            .state
            .read()
            .await
            .channels
            .get(channel)
            .map(|entries| entries.iter().map(|e| e.listener.clone()).collect())
            .unwrap_or_default();

        let mut results = Vec::with_capacity(listeners.len());
        for listener in listeners {
            results.push(listener.on_message(envelope.clone()).await);
        }
        results
    }

    async fn remove(&self, channel: &str, id: u64) -> std::result::Result<(), BusError> {
        let mut state = self.state.write().await;
        let entries = state
            .channels
            .get_mut(channel)
            .ok_or_else(|| BusError::SubscriptionNotFound {
                channel: channel.to_string(),
                id,
            })?;

        let before = entries.len();
        entries.retain(|e| e.id != id);
        if entries.len() == before {
            return Err(BusError::SubscriptionNotFound {
                channel: channel.to_string(),
                id,
            });
        }
        if entries.is_empty() {
            state.channels.remove(channel);
        }

        debug!(%channel, id, "subscription cancelled");
        Ok(())
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn publish(&self, channel: &str, envelope: Envelope) -> std::result::Result<(), BusError> {
        let mut state = self.state.write().await;
        if state.closed {
            return Err(BusError::Closed);
        }

        state.published.push(PublishedMessage {
            channel: channel.to_string(),
            envelope: envelope.clone(),
        });

        if let Some(entries) = state.channels.get(channel) {
            for entry in entries {
                self.in_flight.begin();
                if entry.queue.send(envelope.clone()).is_err() {
                    self.in_flight.end();
                }
            }
        }

        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
        listener: Arc<dyn MessageListener>,
    ) -> std::result::Result<Box<dyn Subscription>, BusError> {
        let mut state = self.state.write().await;
        if state.closed {
            return Err(BusError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (queue, mut rx) = mpsc::unbounded_channel::<Envelope>();

        let worker_listener = listener.clone();
        let in_flight = self.in_flight.clone();
        let worker_channel = channel.to_string();
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                if let Err(e) = worker_listener.on_message(envelope).await {
                    warn!(
                        channel = %worker_channel,
                        error = %e,
                        label = e.as_label(),
                        "listener failed to handle message"
                    );
                }
                in_flight.end();
            }
        });

        state
            .channels
            .entry(channel.to_string())
            .or_default()
            .push(ListenerEntry {
                id,
                listener,
                queue,
            });

        debug!(%channel, id, "subscription opened");
        Ok(Box::new(InMemorySubscription {
            bus: self.clone(),
            channel: channel.to_string(),
            id,
        }))
    }
}

/// Subscription handle returned by [`InMemoryMessageBus`]
pub struct InMemorySubscription {
    bus: InMemoryMessageBus,
    channel: String,
    id: u64,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    fn channel(&self) -> &str {
        &self.channel
    }

    async fn cancel(&self) -> std::result::Result<(), BusError> {
        self.bus.remove(&self.channel, self.id).await
    }
}

// ============================================================================
// RecordingTaskHandler - Records handler invocations
// ============================================================================

/// A single recorded [`TaskHandler`] invocation
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerCall {
    UserTask {
        ui_name: Option<String>,
        ui_config: Value,
        token_data: Value,
    },
    ManualTask {
        task_name: Option<String>,
        task_config: Value,
        token_data: Value,
    },
    EndEvent {
        token_data: Value,
    },
    Event {
        event_type: String,
        data: Value,
    },
    Cancel,
}

/// Task handler that records every call
///
/// Can be told to fail, which makes every subsequent call return an error
/// after it has been recorded.
#[derive(Debug, Default, Clone)]
pub struct RecordingTaskHandler {
    calls: Arc<RwLock<Vec<HandlerCall>>>,
    failure: Arc<RwLock<Option<String>>>,
}

impl RecordingTaskHandler {
    /// Create a new recording handler
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following call fail with the given message
    pub async fn fail_with(&self, message: impl Into<String>) {
        *self.failure.write().await = Some(message.into());
    }

    /// Get the call log
    pub async fn calls(&self) -> Vec<HandlerCall> {
        self.calls.read().await.clone()
    }

    /// Clear the call log
    pub async fn clear_calls(&self) {
        self.calls.write().await.clear();
    }

    async fn record(&self, call: HandlerCall) -> anyhow::Result<()> {
        self.calls.write().await.push(call);
        match self.failure.read().await.as_ref() {
            Some(message) => Err(anyhow::anyhow!(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TaskHandler for RecordingTaskHandler {
    async fn handle_user_task(
        &self,
        _session: &ProcessSession,
        ui_name: Option<&str>,
        ui_config: &Value,
        token_data: &Value,
    ) -> anyhow::Result<()> {
        self.record(HandlerCall::UserTask {
            ui_name: ui_name.map(str::to_string),
            ui_config: ui_config.clone(),
            token_data: token_data.clone(),
        })
        .await
    }

    async fn handle_manual_task(
        &self,
        _session: &ProcessSession,
        task_name: Option<&str>,
        task_config: &Value,
        token_data: &Value,
    ) -> anyhow::Result<()> {
        self.record(HandlerCall::ManualTask {
            task_name: task_name.map(str::to_string),
            task_config: task_config.clone(),
            token_data: token_data.clone(),
        })
        .await
    }

    async fn handle_end_event(
        &self,
        _session: &ProcessSession,
        token_data: &Value,
    ) -> anyhow::Result<()> {
        self.record(HandlerCall::EndEvent {
            token_data: token_data.clone(),
        })
        .await
    }

    async fn handle_event(
        &self,
        _session: &ProcessSession,
        event_type: &str,
        data: &Value,
    ) -> anyhow::Result<()> {
        self.record(HandlerCall::Event {
            event_type: event_type.to_string(),
            data: data.clone(),
        })
        .await
    }

    async fn handle_cancel(&self, _session: &ProcessSession) -> anyhow::Result<()> {
        self.record(HandlerCall::Cancel).await
    }
}
