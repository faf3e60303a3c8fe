// Session state types
//
// SessionState is the snapshot returned by the session's queries. It is
// owned by one SessionStateMachine and only changed by its signal handlers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::message::Message;

/// Kind of user driving the session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    #[default]
    Guest,
    Authenticated,
}

impl std::fmt::Display for UserType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserType::Guest => write!(f, "guest"),
            UserType::Authenticated => write!(f, "authenticated"),
        }
    }
}

/// Lifecycle status of a session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Accepting signals
    Active,
    /// Closed by an explicit terminate signal or the inactivity timeout
    Terminated,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "ACTIVE"),
            SessionStatus::Terminated => write!(f, "TERMINATED"),
        }
    }
}

/// Outcome of a subordinate workflow start request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StartStatus {
    /// Requested, result not yet known
    Pending,
    /// The engine accepted the start
    Started {
        #[serde(rename = "runId")]
        run_id: String,
    },
    /// Routing miss or engine rejection
    Failed { error: String },
}

impl StartStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, StartStatus::Pending)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StartStatus::Failed { .. })
    }
}

/// Subordinate workflow started (or attempted) from a session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowReference {
    pub workflow_id: String,
    /// Empty when the trigger could not be routed
    pub workflow_name: String,
    pub workflow_type: String,
    pub task_queue: String,
    /// Event type the trigger was routed with
    pub event_type: String,
    /// Message whose content produced the trigger, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub status: StartStatus,
    pub requested_at: DateTime<Utc>,
}

/// Details of the most recent quota rejection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuotaRejection {
    pub message_id: Option<String>,
    pub message_count: u32,
    pub limit: u32,
    pub rejected_at: DateTime<Utc>,
}

/// Rate-limit view of a session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatus {
    pub limited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub message_count: u32,
    /// `None` when the session has no quota
    pub limit: Option<u32>,
}

/// Input used to start a session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionInit {
    pub session_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_type: UserType,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl SessionInit {
    pub fn guest(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    pub fn authenticated(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: Some(user_id.into()),
            user_type: UserType::Authenticated,
            metadata: Map::new(),
        }
    }
}

/// Snapshot of one session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub session_id: String,
    pub user_id: Option<String>,
    pub user_type: UserType,
    pub status: SessionStatus,
    pub is_active: bool,
    /// Arrival order, append-only
    pub message_history: Vec<Message>,
    /// Accepted user messages, the counter the guest quota applies to
    pub message_count: u32,
    pub triggered_workflows: Vec<WorkflowReference>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_rejection: Option<QuotaRejection>,
    #[serde(default)]
    pub rejected_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_reason: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl SessionState {
    pub(crate) fn from_init(init: SessionInit, now: DateTime<Utc>) -> Self {
        Self {
            session_id: init.session_id,
            user_id: init.user_id,
            user_type: init.user_type,
            status: SessionStatus::Active,
            is_active: true,
            message_history: Vec::new(),
            message_count: 0,
            triggered_workflows: Vec::new(),
            created_at: now,
            last_activity_at: now,
            last_rejection: None,
            rejected_count: 0,
            termination_reason: None,
            metadata: init.metadata,
        }
    }
}
