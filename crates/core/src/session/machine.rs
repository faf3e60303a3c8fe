// Chat session state machine
//
// Design: deterministic handlers, no I/O
//
// Every signal handler takes `&mut self`, the routing snapshot to use and the
// arrival time, and returns a SignalOutcome. Subordinate workflow starts are
// returned as StartRequest values; the runtime performs them asynchronously
// and feeds the result back through `record_start_result`.
//
// State machine:
//   ACTIVE --terminate()/expire()--> TERMINATED
//
// In TERMINATED every signal is accepted and ignored, so a timeout racing an
// in-flight message never mutates history.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::message::{InboundMessage, Message, MessageRole};
use super::state::{
    QuotaRejection, RateLimitStatus, SessionInit, SessionState, SessionStatus, StartStatus,
    UserType, WorkflowReference,
};
use super::triggers::TriggerTable;
use crate::event::Event;
use crate::routing::{Router, RoutingTable};
use crate::validation::EventValidator;

/// Messages a guest may send before being rejected
pub const DEFAULT_GUEST_QUOTA: u32 = 3;

/// Default number of messages returned by the history query
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Source attached to events synthesized from chat content
pub const CHAT_SOURCE: &str = "chat";

/// Reason recorded when the inactivity timer fires
pub const INACTIVITY_TIMEOUT_REASON: &str = "inactivity timeout";

/// Per-session tuning
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub guest_quota: u32,
    pub triggers: Arc<TriggerTable>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            guest_quota: DEFAULT_GUEST_QUOTA,
            triggers: Arc::new(TriggerTable::default_table()),
        }
    }
}

impl SessionSettings {
    pub fn with_guest_quota(mut self, guest_quota: u32) -> Self {
        self.guest_quota = guest_quota;
        self
    }

    pub fn with_triggers(mut self, triggers: TriggerTable) -> Self {
        self.triggers = Arc::new(triggers);
        self
    }
}

/// Request to start a subordinate workflow on the engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub workflow_id: String,
    pub workflow_name: String,
    pub workflow_type: String,
    pub task_queue: String,
    /// Workflow input (JSON)
    pub input: Value,
    /// Session that requested the start, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
}

/// Result of handling one signal
#[derive(Debug, Clone, PartialEq)]
pub enum SignalOutcome {
    /// State changed; `start` is set when a subordinate workflow must be started
    Applied { start: Option<StartRequest> },
    /// Guest quota reached, message not appended
    QuotaExceeded(QuotaRejection),
    /// Message id already in the history; state unchanged
    Duplicate(String),
    /// Signal payload could not be understood; state unchanged
    Invalid(Vec<String>),
    /// Session is terminated; state unchanged
    Ignored,
}

impl SignalOutcome {
    fn applied() -> Self {
        SignalOutcome::Applied { start: None }
    }

    /// Start request carried by the outcome, if any
    pub fn start_request(&self) -> Option<&StartRequest> {
        match self {
            SignalOutcome::Applied { start } => start.as_ref(),
            _ => None,
        }
    }

    pub fn into_start_request(self) -> Option<StartRequest> {
        match self {
            SignalOutcome::Applied { start } => start,
            _ => None,
        }
    }

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, SignalOutcome::QuotaExceeded(_))
    }
}

/// `update_user` signal payload
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserUpdate {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    user_type: Option<UserType>,
}

/// State machine for one chat session
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    state: SessionState,
    settings: SessionSettings,
    router: Router,
    validator: EventValidator,
}

impl SessionStateMachine {
    pub fn new(init: SessionInit, settings: SessionSettings, now: DateTime<Utc>) -> Self {
        info!(
            session_id = %init.session_id,
            user_type = %init.user_type,
            "Chat session initialized"
        );
        Self {
            state: SessionState::from_init(init, now),
            settings,
            router: Router::new(),
            validator: EventValidator::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.state.session_id
    }

    pub fn status(&self) -> SessionStatus {
        self.state.status
    }

    pub fn is_active(&self) -> bool {
        self.state.status == SessionStatus::Active
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    // =========================================================================
    // Signals
    // =========================================================================

    /// Append a message, enforcing the guest quota and scanning for triggers
    pub fn receive_message(
        &mut self,
        message_data: &Value,
        table: &RoutingTable,
        now: DateTime<Utc>,
    ) -> SignalOutcome {
        if !self.is_active() {
            debug!(session_id = %self.state.session_id, "Ignoring message for terminated session");
            return SignalOutcome::Ignored;
        }

        let inbound = match InboundMessage::from_value(message_data) {
            Ok(inbound) => inbound,
            Err(e) => return SignalOutcome::Invalid(vec![format!("invalid message: {e}")]),
        };

        self.accept_message(inbound, table, now)
    }

    /// Typed variant of [`receive_message`](Self::receive_message)
    pub fn accept_message(
        &mut self,
        inbound: InboundMessage,
        table: &RoutingTable,
        now: DateTime<Utc>,
    ) -> SignalOutcome {
        if !self.is_active() {
            return SignalOutcome::Ignored;
        }

        if let Some(id) = inbound
            .message_id
            .as_deref()
            .filter(|id| self.has_message(id))
        {
            debug!(
                session_id = %self.state.session_id,
                message_id = %id,
                "Message already received, skipping redelivery"
            );
            return SignalOutcome::Duplicate(id.to_string());
        }

        let is_user = inbound.role == MessageRole::User;
        if is_user && self.quota_reached() {
            let rejection = QuotaRejection {
                message_id: inbound.message_id.clone(),
                message_count: self.state.message_count,
                limit: self.settings.guest_quota,
                rejected_at: now,
            };
            warn!(
                session_id = %self.state.session_id,
                message_count = self.state.message_count,
                limit = self.settings.guest_quota,
                "Guest message quota reached, rejecting message"
            );
            self.state.last_rejection = Some(rejection.clone());
            self.state.rejected_count += 1;
            return SignalOutcome::QuotaExceeded(rejection);
        }

        let fallback_id = self.next_fallback_id();
        let message = inbound.into_message(fallback_id, now);
        info!(
            session_id = %self.state.session_id,
            message_id = %message.message_id,
            role = %message.role,
            "Received message"
        );

        let trigger = if message.is_user() {
            self.settings.triggers.detect(&message.content)
        } else {
            None
        };
        let trigger_event = trigger.map(|hit| {
            debug!(
                session_id = %self.state.session_id,
                keyword = %hit.keyword,
                event_type = %hit.event_type,
                "Detected workflow trigger in message"
            );
            self.chat_event(&hit.event_type, &message, now)
        });
        let message_id = message.message_id.clone();

        if is_user {
            self.state.message_count += 1;
        }
        self.state.message_history.push(message);
        self.state.last_activity_at = now;

        let start =
            trigger_event.and_then(|event| self.request_subordinate(event, Some(message_id), table, now));
        SignalOutcome::Applied { start }
    }

    /// Explicitly request a subordinate workflow for an event
    pub fn trigger_workflow(
        &mut self,
        event_data: &Value,
        table: &RoutingTable,
        now: DateTime<Utc>,
    ) -> SignalOutcome {
        if !self.is_active() {
            return SignalOutcome::Ignored;
        }

        let validation = self.validator.validate(event_data);
        let Some(event) = validation.normalized_event else {
            warn!(
                session_id = %self.state.session_id,
                errors = ?validation.errors,
                "Ignoring invalid trigger_workflow signal"
            );
            return SignalOutcome::Invalid(validation.errors);
        };

        let mut payload = event.payload().clone();
        payload.insert("sessionId".to_string(), json!(self.state.session_id));
        payload.insert("userId".to_string(), json!(self.state.user_id));
        let mut enriched = Event::new(event.event_type())
            .with_source(event.source().unwrap_or(CHAT_SOURCE))
            .with_payload(payload);
        if let Some(timestamp) = event.timestamp() {
            enriched = enriched.with_timestamp(timestamp);
        }

        self.state.last_activity_at = now;
        let start = self.request_subordinate(enriched, None, table, now);
        SignalOutcome::Applied { start }
    }

    /// Change the user bound to the session (e.g. a guest signing in)
    pub fn update_user(&mut self, user_data: &Value, now: DateTime<Utc>) -> SignalOutcome {
        if !self.is_active() {
            return SignalOutcome::Ignored;
        }

        let update = match UserUpdate::deserialize(user_data) {
            Ok(update) => update,
            Err(e) => return SignalOutcome::Invalid(vec![format!("invalid user update: {e}")]),
        };

        self.state.user_id = update.user_id;
        self.state.user_type = update.user_type.unwrap_or_default();
        self.state.last_activity_at = now;
        info!(
            session_id = %self.state.session_id,
            user_id = ?self.state.user_id,
            user_type = %self.state.user_type,
            "Updated session user"
        );
        SignalOutcome::applied()
    }

    /// Close the session
    pub fn terminate(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> SignalOutcome {
        if !self.is_active() {
            return SignalOutcome::Ignored;
        }

        let reason = reason.into();
        info!(session_id = %self.state.session_id, reason = %reason, "Chat session ended");
        self.state.status = SessionStatus::Terminated;
        self.state.is_active = false;
        self.state.termination_reason = Some(reason);
        self.state.last_activity_at = now;
        SignalOutcome::applied()
    }

    /// Close the session because the inactivity timer fired
    pub fn expire(&mut self, now: DateTime<Utc>) -> SignalOutcome {
        self.terminate(INACTIVITY_TIMEOUT_REASON, now)
    }

    /// Apply the asynchronous outcome of a subordinate start
    ///
    /// `result` is the engine run id or the start error. Only pending
    /// references are updated; returns whether one was.
    pub fn record_start_result(&mut self, workflow_id: &str, result: Result<String, String>) -> bool {
        let Some(reference) = self
            .state
            .triggered_workflows
            .iter_mut()
            .find(|r| r.workflow_id == workflow_id && r.status.is_pending())
        else {
            debug!(workflow_id = %workflow_id, "No pending workflow reference to update");
            return false;
        };

        reference.status = match result {
            Ok(run_id) => {
                info!(workflow_id = %workflow_id, run_id = %run_id, "Subordinate workflow started");
                StartStatus::Started { run_id }
            }
            Err(error) => {
                warn!(workflow_id = %workflow_id, error = %error, "Subordinate workflow failed to start");
                StartStatus::Failed { error }
            }
        };
        true
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.clone()
    }

    pub fn triggered_workflows(&self) -> &[WorkflowReference] {
        &self.state.triggered_workflows
    }

    /// Most recent `limit` messages; `0` returns the whole history
    pub fn message_history(&self, limit: usize) -> &[Message] {
        recent_messages(&self.state, limit)
    }

    pub fn rate_limit_status(&self) -> RateLimitStatus {
        rate_limit_status(&self.state, self.settings.guest_quota)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn quota_reached(&self) -> bool {
        self.state.user_type == UserType::Guest
            && self.state.message_count >= self.settings.guest_quota
    }

    fn chat_event(&self, event_type: &str, message: &Message, now: DateTime<Utc>) -> Event {
        Event::new(event_type)
            .with_source(CHAT_SOURCE)
            .with_timestamp(now.to_rfc3339())
            .with_field("message", message.content.clone())
            .with_field("messageId", message.message_id.clone())
            .with_field("sessionId", self.state.session_id.clone())
            .with_field("userId", json!(self.state.user_id))
    }

    /// Route `event` and record exactly one new workflow reference
    fn has_message(&self, message_id: &str) -> bool {
        !message_id.trim().is_empty()
            && self
                .state
                .message_history
                .iter()
                .any(|m| m.message_id == message_id)
    }

    /// `<session_id>-msg-<n>`, skipping ids a caller already used
    fn next_fallback_id(&self) -> String {
        let mut n = self.state.message_history.len() + 1;
        loop {
            let candidate = format!("{}-msg-{}", self.state.session_id, n);
            if !self.has_message(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    fn request_subordinate(
        &mut self,
        event: Event,
        message_id: Option<String>,
        table: &RoutingTable,
        now: DateTime<Utc>,
    ) -> Option<StartRequest> {
        let decision = self.router.route(&event, table);
        // created_at separates runs that reuse a session id
        let workflow_id = format!(
            "chat-triggered-{}-{}-{}-{}",
            event.event_type(),
            self.state.session_id,
            self.state.created_at.timestamp_millis(),
            self.state.triggered_workflows.len() + 1
        );

        let Some(target) = decision.target.filter(|_| decision.matched) else {
            warn!(
                session_id = %self.state.session_id,
                event_type = %event.event_type(),
                reason = %decision.reason,
                "Trigger could not be routed"
            );
            self.state.triggered_workflows.push(WorkflowReference {
                workflow_id,
                workflow_name: String::new(),
                workflow_type: String::new(),
                task_queue: String::new(),
                event_type: event.event_type().to_string(),
                message_id,
                status: StartStatus::Failed {
                    error: decision.reason,
                },
                requested_at: now,
            });
            return None;
        };

        info!(
            session_id = %self.state.session_id,
            workflow_id = %workflow_id,
            workflow = %target.workflow_name,
            "Requesting subordinate workflow"
        );

        self.state.triggered_workflows.push(WorkflowReference {
            workflow_id: workflow_id.clone(),
            workflow_name: target.workflow_name.clone(),
            workflow_type: target.workflow_type.clone(),
            task_queue: target.task_queue.clone(),
            event_type: event.event_type().to_string(),
            message_id,
            status: StartStatus::Pending,
            requested_at: now,
        });

        Some(StartRequest {
            workflow_id,
            workflow_name: target.workflow_name,
            workflow_type: target.workflow_type,
            task_queue: target.task_queue,
            input: event.to_wire(),
            parent_session_id: Some(self.state.session_id.clone()),
        })
    }
}

/// Most recent `limit` messages of a snapshot; `0` returns all of them
pub fn recent_messages(state: &SessionState, limit: usize) -> &[Message] {
    let history = &state.message_history;
    if limit == 0 || limit >= history.len() {
        history
    } else {
        &history[history.len() - limit..]
    }
}

/// Rate-limit view of a snapshot under the given guest quota
pub fn rate_limit_status(state: &SessionState, guest_quota: u32) -> RateLimitStatus {
    match state.user_type {
        UserType::Guest if state.message_count >= guest_quota => RateLimitStatus {
            limited: true,
            reason: Some("Guest user message limit reached".to_string()),
            message_count: state.message_count,
            limit: Some(guest_quota),
        },
        UserType::Guest => RateLimitStatus {
            limited: false,
            reason: None,
            message_count: state.message_count,
            limit: Some(guest_quota),
        },
        UserType::Authenticated => RateLimitStatus {
            limited: false,
            reason: None,
            message_count: state.message_count,
            limit: None,
        },
    }
}
