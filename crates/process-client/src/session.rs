// Process session
//
// A ProcessSession drives one remote process instance:
// - start / continue_process open the participant subscription and send the
//   initiating command to the engine
// - notifications on the participant channel record the current task and
//   invoke the TaskHandler
// - each recorded task gets a second subscription on its event channel
// - do_cancel / do_event / do_error / do_proceed publish on the task channel
//
// State is a single mutex-guarded struct. Inbound dispatch is serialized by a
// separate lock so that a handler can call back into the session while its
// notification is still being processed.

use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::channels;
use crate::config::SessionConfig;
use crate::context::ExecutionContext;
use crate::error::{Result, SessionError};
use crate::message::{
    event_types, Command, EntityReference, Envelope, Notification, TaskEntity, TaskEvent,
    TaskMessageData,
};
use crate::traits::{MessageBus, MessageListener, Subscription, TaskHandler};

/// The task currently awaiting participant action
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentTask {
    /// Definition of the task node (`nodeDef` of the entity)
    pub task_definition: Value,

    /// Task entity as sent by the engine
    pub task_entity: TaskEntity,

    /// Channel task commands are published to
    pub task_channel_name: String,

    /// Channel the engine publishes task events on
    pub event_channel_name: String,
}

impl CurrentTask {
    fn from_message(data: &TaskMessageData) -> Self {
        let entity = data.user_task_entity.clone();
        Self {
            task_definition: entity.node_def.clone(),
            task_channel_name: channels::task_channel(&entity.id),
            event_channel_name: channels::task_event_channel(&entity.id),
            task_entity: entity,
        }
    }

    /// Id of the task entity
    pub fn id(&self) -> &str {
        &self.task_entity.id
    }
}

/// Mutable session state
#[derive(Default)]
struct SessionState {
    participant_subscription: Option<Box<dyn Subscription>>,
    current_task: Option<CurrentTask>,
    event_subscription: Option<Box<dyn Subscription>>,
    token_data: Value,
    /// Bumped by start / continue_process / stop; listeners opened under an
    /// older epoch are stale
    epoch: u64,
}

struct SessionInner {
    process_key: String,
    participant_id: String,
    bus: Arc<dyn MessageBus>,
    handler: Option<Arc<dyn TaskHandler>>,
    config: SessionConfig,
    state: Mutex<SessionState>,
    dispatch: Mutex<()>,
}

/// Client-side session driving a single remote process instance
///
/// Cloning is cheap; clones share the same state.
///
/// # Example
///
/// ```ignore
/// let bus = Arc::new(InMemoryMessageBus::new());
/// let session = ProcessSession::new("invoice_approval", bus, Arc::new(MyHandler));
///
/// session.start(&ExecutionContext::new(), None).await?;
/// // handler.handle_user_task(...) is invoked once the engine reaches a user task
/// ```
#[derive(Clone)]
pub struct ProcessSession {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for ProcessSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessSession")
            .field("process_key", &self.inner.process_key)
            .field("participant_id", &self.inner.participant_id)
            .field("has_handler", &self.inner.handler.is_some())
            .finish()
    }
}

impl ProcessSession {
    /// Create a session with a task handler and default configuration
    pub fn new(
        process_key: impl Into<String>,
        bus: Arc<dyn MessageBus>,
        handler: Arc<dyn TaskHandler>,
    ) -> Self {
        Self::with_config(process_key, bus, Some(handler), SessionConfig::default())
    }

    /// Create a session without a task handler
    ///
    /// Such a session can send commands, but every notification it receives
    /// fails with [`SessionError::NoHandler`].
    pub fn without_handler(process_key: impl Into<String>, bus: Arc<dyn MessageBus>) -> Self {
        Self::with_config(process_key, bus, None, SessionConfig::default())
    }

    /// Create a session with custom configuration
    pub fn with_config(
        process_key: impl Into<String>,
        bus: Arc<dyn MessageBus>,
        handler: Option<Arc<dyn TaskHandler>>,
        config: SessionConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                process_key: process_key.into(),
                participant_id: Uuid::now_v7().to_string(),
                bus,
                handler,
                config,
                state: Mutex::new(SessionState::default()),
                dispatch: Mutex::new(()),
            }),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn process_key(&self) -> &str {
        &self.inner.process_key
    }

    pub fn participant_id(&self) -> &str {
        &self.inner.participant_id
    }

    /// The session's private inbound channel
    pub fn participant_channel(&self) -> String {
        channels::participant_channel(&self.inner.participant_id)
    }

    pub fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.inner.bus
    }

    pub fn handler(&self) -> Option<&Arc<dyn TaskHandler>> {
        self.inner.handler.as_ref()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Snapshot of the current task
    pub async fn current_task(&self) -> Option<CurrentTask> {
        self.inner.state.lock().await.current_task.clone()
    }

    /// Command channel of the current task
    pub async fn task_channel_name(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .await
            .current_task
            .as_ref()
            .map(|t| t.task_channel_name.clone())
    }

    /// Event channel of the current task
    pub async fn event_channel_name(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .await
            .current_task
            .as_ref()
            .map(|t| t.event_channel_name.clone())
    }

    /// Snapshot of the token data (`Null` when cleared)
    pub async fn token_data(&self) -> Value {
        self.inner.state.lock().await.token_data.clone()
    }

    /// Whether the participant subscription is held
    pub async fn is_active(&self) -> bool {
        self.inner
            .state
            .lock()
            .await
            .participant_subscription
            .is_some()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start a new run of the process definition
    ///
    /// Opens the participant subscription, then publishes a `start` command on
    /// the engine channel. Transport errors are returned unchanged.
    #[instrument(skip_all, fields(participant_id = %self.inner.participant_id, process_key = %self.inner.process_key))]
    pub async fn start(
        &self,
        context: &ExecutionContext,
        token: Option<Value>,
    ) -> Result<ProcessSession> {
        let command = Command::Start {
            key: self.inner.process_key.clone(),
            token,
        };
        let envelope = Envelope::data_message(&command, context, &self.inner.participant_id)?;

        self.listen_to_participant_channel().await?;
        self.inner
            .bus
            .publish(&self.inner.config.engine_channel, envelope)
            .await?;

        info!("process start requested");
        Ok(self.clone())
    }

    /// Resume a run at a user task the engine already knows
    #[instrument(skip_all, fields(participant_id = %self.inner.participant_id, task_id = %task_id))]
    pub async fn continue_process(
        &self,
        task_id: &str,
        context: &ExecutionContext,
    ) -> Result<ProcessSession> {
        let command = Command::Continue {
            node_instance_ref: EntityReference::user_task(task_id),
        };
        let envelope = Envelope::data_message(&command, context, &self.inner.participant_id)?;

        self.listen_to_participant_channel().await?;
        self.inner
            .bus
            .publish(&self.inner.config.engine_channel, envelope)
            .await?;

        info!("process continue requested");
        Ok(self.clone())
    }

    /// Clear task state and cancel all subscriptions
    ///
    /// Fails with [`SessionError::NotSubscribed`] when no participant
    /// subscription is held (never started, or already stopped). Task and
    /// token state are cleared in either case.
    #[instrument(skip_all, fields(participant_id = %self.inner.participant_id))]
    pub async fn stop(&self) -> Result<()> {
        let (participant, event) = {
            let mut state = self.inner.state.lock().await;
            state.epoch += 1;
            state.current_task = None;
            state.token_data = Value::Null;
            (
                state.participant_subscription.take(),
                state.event_subscription.take(),
            )
        };

        let event_result = match event {
            Some(subscription) => subscription.cancel().await,
            None => Ok(()),
        };

        let Some(participant) = participant else {
            event_result?;
            return Err(SessionError::NotSubscribed {
                participant_id: self.inner.participant_id.clone(),
            });
        };

        participant.cancel().await?;
        event_result?;

        info!("session stopped");
        Ok(())
    }

    /// Stop the session, then start a fresh run
    pub async fn restart(&self, context: &ExecutionContext, token: Option<Value>) -> Result<()> {
        self.stop().await?;
        self.start(context, token).await?;
        Ok(())
    }

    // ========================================================================
    // Task-scoped commands
    // ========================================================================

    /// Cancel the current task, handing back the token data
    pub async fn do_cancel(&self, context: &ExecutionContext) -> Result<()> {
        let (channel, token) = self.task_target("cancel").await?;
        self.publish_to_task(&channel, Command::event(event_types::CANCEL, Some(token)), context)
            .await
    }

    /// Send participant data to the current task
    pub async fn do_event(&self, context: &ExecutionContext, data: Option<Value>) -> Result<()> {
        let (channel, _) = self.task_target("event").await?;
        self.publish_to_task(&channel, Command::event(event_types::DATA, data), context)
            .await
    }

    /// Report an error to the current task
    pub async fn do_error(&self, context: &ExecutionContext, error: Value) -> Result<()> {
        let (channel, _) = self.task_target("error").await?;
        self.publish_to_task(&channel, Command::event(event_types::ERROR, Some(error)), context)
            .await
    }

    /// Complete the current task with the token data
    pub async fn do_proceed(&self, context: &ExecutionContext) -> Result<()> {
        let (channel, token) = self.task_target("proceed").await?;
        self.publish_to_task(&channel, Command::Proceed { token }, context)
            .await
    }

    async fn task_target(&self, action: &'static str) -> Result<(String, Value)> {
        let state = self.inner.state.lock().await;
        let task = state
            .current_task
            .as_ref()
            .ok_or_else(|| SessionError::no_current_task(action))?;
        Ok((task.task_channel_name.clone(), state.token_data.clone()))
    }

    #[instrument(skip_all, fields(participant_id = %self.inner.participant_id, channel = %channel, action = command.action()))]
    async fn publish_to_task(
        &self,
        channel: &str,
        command: Command,
        context: &ExecutionContext,
    ) -> Result<()> {
        let envelope = Envelope::data_message(&command, context, &self.inner.participant_id)?;
        self.inner.bus.publish(channel, envelope).await?;
        debug!("task command published");
        Ok(())
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Open a fresh participant subscription under a new epoch
    ///
    /// The previous run's task is dropped along with its event subscription.
    /// If the previous participant subscription cannot be cancelled it is kept,
    /// so a later stop() can still release it.
    async fn listen_to_participant_channel(&self) -> Result<()> {
        let (epoch, previous, event) = {
            let mut state = self.inner.state.lock().await;
            state.epoch += 1;
            state.current_task = None;
            state.token_data = Value::Null;
            (
                state.epoch,
                state.participant_subscription.take(),
                state.event_subscription.take(),
            )
        };

        if let Some(event) = event {
            if let Err(e) = event.cancel().await {
                warn!(channel = event.channel(), error = %e, "failed to cancel task event subscription");
            }
        }

        if let Some(previous) = previous {
            debug!("replacing participant subscription");
            if let Err(e) = previous.cancel().await {
                let mut state = self.inner.state.lock().await;
                if state.participant_subscription.is_none() {
                    state.participant_subscription = Some(previous);
                }
                return Err(e.into());
            }
        }

        let listener = Arc::new(ParticipantListener {
            session: Arc::downgrade(&self.inner),
            epoch,
        });
        let subscription = self
            .inner
            .bus
            .subscribe(&self.participant_channel(), listener)
            .await?;

        self.inner.state.lock().await.participant_subscription = Some(subscription);
        Ok(())
    }

    /// Record a new current task and open its event subscription
    ///
    /// Returns the task's initial token data, or `None` if the session was
    /// stopped while the subscription was being opened.
    async fn set_new_task(&self, epoch: u64, data: &TaskMessageData) -> Result<Option<Value>> {
        let task = CurrentTask::from_message(data);
        let listener = Arc::new(TaskEventListener {
            session: Arc::downgrade(&self.inner),
            epoch,
            task_id: task.id().to_string(),
        });
        let subscription = self
            .inner
            .bus
            .subscribe(&task.event_channel_name, listener)
            .await?;

        let (token, superseded) = {
            let mut state = self.inner.state.lock().await;
            if state.epoch != epoch {
                drop(state);
                subscription.cancel().await?;
                return Ok(None);
            }

            info!(task_id = %task.id(), "new current task");
            let token = data.initial_token();
            state.current_task = Some(task);
            state.token_data = token.clone();
            (token, state.event_subscription.replace(subscription))
        };

        if let Some(superseded) = superseded {
            debug!(channel = superseded.channel(), "cancelling superseded task event subscription");
            if let Err(e) = superseded.cancel().await {
                warn!(channel = superseded.channel(), error = %e, "failed to cancel superseded task event subscription");
            }
        }

        Ok(Some(token))
    }

    async fn is_current(&self, epoch: u64) -> bool {
        self.inner.state.lock().await.epoch == epoch
    }

    // ========================================================================
    // Inbound dispatch
    // ========================================================================

    async fn on_participant_message(&self, epoch: u64, envelope: Envelope) -> Result<()> {
        let handler = self.inner.handler.clone().ok_or(SessionError::NoHandler)?;
        let _dispatch = self.inner.dispatch.lock().await;

        if !self.is_current(epoch).await {
            debug!(participant_id = %self.inner.participant_id, "ignoring notification for stopped session");
            return Ok(());
        }

        match Notification::from_envelope(&envelope) {
            Notification::UserTask(data) => {
                let Some(token) = self.set_new_task(epoch, &data).await? else {
                    return Ok(());
                };
                handler
                    .handle_user_task(self, data.ui_name.as_deref(), &data.ui_config, &token)
                    .await
                    .map_err(SessionError::handler)?;
            }
            Notification::ManualTask(data) => {
                let Some(token) = self.set_new_task(epoch, &data).await? else {
                    return Ok(());
                };
                handler
                    .handle_manual_task(self, data.ui_name.as_deref(), &data.ui_config, &token)
                    .await
                    .map_err(SessionError::handler)?;
            }
            Notification::EndEvent(token) => {
                {
                    let mut state = self.inner.state.lock().await;
                    if state.epoch != epoch {
                        return Ok(());
                    }
                    state.token_data = token.clone();
                }

                info!(participant_id = %self.inner.participant_id, "process reached end event");
                handler
                    .handle_end_event(self, &token)
                    .await
                    .map_err(SessionError::handler)?;

                // the handler may already have stopped the session
                if self.is_current(epoch).await {
                    self.stop().await?;
                }
            }
            Notification::Malformed { action, reason } => {
                warn!(participant_id = %self.inner.participant_id, %action, %reason, "ignoring malformed notification");
            }
            Notification::Unrecognized(action) => {
                debug!(participant_id = %self.inner.participant_id, ?action, "ignoring notification");
            }
        }

        Ok(())
    }

    async fn on_task_event(&self, epoch: u64, task_id: &str, envelope: Envelope) -> Result<()> {
        let handler = self.inner.handler.clone().ok_or(SessionError::NoHandler)?;
        let _dispatch = self.inner.dispatch.lock().await;

        match TaskEvent::from_envelope(&envelope) {
            TaskEvent::Cancel => {
                if !self.is_current_task(epoch, task_id).await {
                    return Ok(());
                }
                handler
                    .handle_cancel(self)
                    .await
                    .map_err(SessionError::handler)?;
            }
            TaskEvent::Event { event_type, data } => {
                {
                    let mut state = self.inner.state.lock().await;
                    if !state_holds_task(&state, epoch, task_id) {
                        return Ok(());
                    }
                    set_current(&mut state.token_data, data.clone());
                }
                handler
                    .handle_event(self, &event_type, &data)
                    .await
                    .map_err(SessionError::handler)?;
            }
            TaskEvent::Unrecognized => {
                debug!(%task_id, "ignoring task channel message");
            }
        }

        Ok(())
    }

    async fn is_current_task(&self, epoch: u64, task_id: &str) -> bool {
        let state = self.inner.state.lock().await;
        state_holds_task(&state, epoch, task_id)
    }
}

fn state_holds_task(state: &SessionState, epoch: u64, task_id: &str) -> bool {
    state.epoch == epoch
        && state
            .current_task
            .as_ref()
            .is_some_and(|task| task.id() == task_id)
}

/// Store an event payload under `token_data.current`
fn set_current(token_data: &mut Value, data: Value) {
    match token_data {
        Value::Object(map) => {
            map.insert("current".to_string(), data);
        }
        other => {
            *other = serde_json::json!({ "current": data });
        }
    }
}

// ============================================================================
// Listeners
// ============================================================================

struct ParticipantListener {
    session: Weak<SessionInner>,
    epoch: u64,
}

#[async_trait]
impl MessageListener for ParticipantListener {
    async fn on_message(&self, envelope: Envelope) -> Result<()> {
        let Some(inner) = self.session.upgrade() else {
            debug!("session dropped, discarding participant message");
            return Ok(());
        };
        ProcessSession { inner }
            .on_participant_message(self.epoch, envelope)
            .await
    }
}

struct TaskEventListener {
    session: Weak<SessionInner>,
    epoch: u64,
    task_id: String,
}

#[async_trait]
impl MessageListener for TaskEventListener {
    async fn on_message(&self, envelope: Envelope) -> Result<()> {
        let Some(inner) = self.session.upgrade() else {
            debug!(task_id = %self.task_id, "session dropped, discarding task event");
            return Ok(());
        };
        ProcessSession { inner }
            .on_task_event(self.epoch, &self.task_id, envelope)
            .await
    }
}
