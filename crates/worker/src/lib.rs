// Flowgate worker
//
// Hosts the process side of flowgate: the engine connection bootstrap, the
// engine client, one actor per chat session, the event dispatcher and the
// HTTP surface. Domain logic lives in flowgate-core.

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod grpc_engine;
pub mod registry;
pub mod retry;
pub mod session_actor;
pub mod telemetry;

pub use api::{router, AppState};
pub use bootstrap::{
    connect, health_check, AttemptError, ConnectionError, Connector, EngineAddress,
    EXIT_CODE_CONNECTION_EXHAUSTED,
};
pub use config::{EngineMode, WorkerConfig};
pub use dispatcher::{DispatchOutcome, DispatchStatus, EventDispatcher};
pub use engine::{EngineError, InMemoryEngine, StartedWorkflow, WorkflowStarter};
pub use grpc_engine::{GrpcConnector, GrpcEngineClient};
pub use registry::{SessionRegistry, StartedSession};
pub use retry::RetryPolicy;
pub use session_actor::{
    spawn_session, ExitHook, SessionHandle, SessionRuntimeOptions, Signal, SignalAck,
};
pub use telemetry::{init_telemetry, LogFormat, TelemetryConfig};
