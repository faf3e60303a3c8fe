//! Long-lived chat sessions
//!
//! A session accumulates messages, enforces the guest quota, detects
//! content triggers and requests subordinate workflows. The logic lives in
//! [`SessionStateMachine`], a synchronous state machine with no I/O; the
//! worker hosts one machine per session and performs the requested starts.

mod machine;
mod message;
mod state;
mod triggers;

pub use machine::{
    rate_limit_status, recent_messages, SessionSettings, SessionStateMachine, SignalOutcome,
    StartRequest, CHAT_SOURCE, DEFAULT_GUEST_QUOTA, DEFAULT_HISTORY_LIMIT,
    INACTIVITY_TIMEOUT_REASON,
};
pub use message::{InboundMessage, Message, MessageRole};
pub use state::{
    QuotaRejection, RateLimitStatus, SessionInit, SessionState, SessionStatus, StartStatus,
    UserType, WorkflowReference,
};
pub use triggers::{TriggerConfig, TriggerMatch, TriggerRule, TriggerTable};
