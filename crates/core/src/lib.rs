// Event routing and chat session domain
//
// This crate holds the pure logic of the system: event validation, the
// configuration-driven router and the chat session state machine.
//
// Key design decisions:
// - No I/O: engine calls, timers and transports live in flowgate-worker
// - Routing tables are immutable; updates swap a whole new table
// - Validation failures, routing misses and quota rejections are values, not errors
// - Session handlers are synchronous and take the arrival time as input

pub mod error;
pub mod event;
pub mod routing;
pub mod session;
pub mod validation;

pub use error::{ConfigError, ConfigResult, SessionError};
pub use event::Event;
pub use routing::{
    RoutingConfig, RoutingDecision, RoutingService, RoutingTable, RoutingTier, SharedRoutingTable,
    WorkflowDescriptor,
};
pub use session::{
    SessionInit, SessionSettings, SessionState, SessionStateMachine, SignalOutcome, StartRequest,
    TriggerConfig, TriggerTable,
};
pub use validation::{EventValidator, ValidationResult};
