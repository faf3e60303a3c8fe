// Session runtime: one tokio task per chat session
// Decision: The actor owns its SessionStateMachine; nothing else can mutate it
// Decision: Queries read a watch snapshot and never wait on the actor or the engine
// Decision: Subordinate starts run in the actor's JoinSet and are applied between signals
//
// Ordering: commands from one sender are processed in send order (mpsc FIFO).
// Each command runs to completion before the next one is read.
//
// Lifecycle:
//   spawn -> ACTIVE --terminate / inactivity timeout--> TERMINATED
//   after TERMINATED the actor settles in-flight starts, publishes the final
//   snapshot, runs its exit hook and exits; later signals are acknowledged
//   as Ignored.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use flowgate_core::routing::SharedRoutingTable;
use flowgate_core::session::{
    rate_limit_status, recent_messages, Message, RateLimitStatus, SessionInit, SessionSettings,
    SessionState, SessionStateMachine, SessionStatus, SignalOutcome, StartRequest,
    WorkflowReference,
};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::engine::{start_logged, WorkflowStarter};

/// Upper bound on waiting for in-flight starts once a session has ended
const START_SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Called once when a session actor exits, with the session id and run id
pub type ExitHook = Box<dyn FnOnce(&str, Uuid) + Send + 'static>;

/// Runtime tuning shared by all sessions
#[derive(Debug, Clone)]
pub struct SessionRuntimeOptions {
    pub inactivity_timeout: Duration,
    pub channel_capacity: usize,
}

impl Default for SessionRuntimeOptions {
    fn default() -> Self {
        Self {
            inactivity_timeout: Duration::from_secs(24 * 60 * 60),
            channel_capacity: 64,
        }
    }
}

/// Signals accepted by a session
#[derive(Debug, Clone)]
pub enum Signal {
    ReceiveMessage(Value),
    TriggerWorkflow(Value),
    UpdateUser(Value),
    Terminate(String),
}

impl Signal {
    fn name(&self) -> &'static str {
        match self {
            Signal::ReceiveMessage(_) => "receive_message",
            Signal::TriggerWorkflow(_) => "trigger_workflow",
            Signal::UpdateUser(_) => "update_user",
            Signal::Terminate(_) => "terminate",
        }
    }
}

/// Immediate acknowledgement of a fire-and-forget signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAck {
    /// Queued for the session
    Accepted,
    /// The session has ended; the signal was dropped
    Ignored,
}

enum SessionCommand {
    Signal {
        signal: Signal,
        reply: Option<oneshot::Sender<SignalOutcome>>,
    },
    Barrier(oneshot::Sender<()>),
}

type StartResult = (String, Result<String, String>);

/// Cloneable handle to a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session_id: String,
    /// Distinguishes sessions that reuse an id
    run_id: Uuid,
    guest_quota: u32,
    commands: mpsc::Sender<SessionCommand>,
    state: watch::Receiver<SessionState>,
}

impl std::fmt::Debug for SessionCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionCommand::Signal { signal, .. } => write!(f, "Signal({})", signal.name()),
            SessionCommand::Barrier(_) => write!(f, "Barrier"),
        }
    }
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    // =========================================================================
    // Signals
    // =========================================================================

    /// Queue a signal without waiting for it to be processed
    pub async fn signal(&self, signal: Signal) -> SignalAck {
        let command = SessionCommand::Signal {
            signal,
            reply: None,
        };
        match self.commands.send(command).await {
            Ok(()) => SignalAck::Accepted,
            Err(_) => {
                debug!(session_id = %self.session_id, "Signal sent to ended session");
                SignalAck::Ignored
            }
        }
    }

    /// Queue a signal and wait for its outcome
    pub async fn signal_and_wait(&self, signal: Signal) -> SignalOutcome {
        let (reply, outcome) = oneshot::channel();
        let command = SessionCommand::Signal {
            signal,
            reply: Some(reply),
        };
        if self.commands.send(command).await.is_err() {
            return SignalOutcome::Ignored;
        }
        outcome.await.unwrap_or(SignalOutcome::Ignored)
    }

    pub async fn receive_message(&self, message: Value) -> SignalAck {
        self.signal(Signal::ReceiveMessage(message)).await
    }

    pub async fn trigger_workflow(&self, event: Value) -> SignalAck {
        self.signal(Signal::TriggerWorkflow(event)).await
    }

    pub async fn update_user(&self, user: Value) -> SignalAck {
        self.signal(Signal::UpdateUser(user)).await
    }

    pub async fn terminate(&self, reason: impl Into<String>) -> SignalAck {
        self.signal(Signal::Terminate(reason.into())).await
    }

    /// Resolves once every command sent before it has been processed and
    /// every subordinate start requested so far has settled
    pub async fn barrier(&self) {
        let (done, wait) = oneshot::channel();
        if self.commands.send(SessionCommand::Barrier(done)).await.is_ok() {
            let _ = wait.await;
        }
    }

    // =========================================================================
    // Queries (never block on the actor)
    // =========================================================================

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn triggered_workflows(&self) -> Vec<WorkflowReference> {
        self.state.borrow().triggered_workflows.clone()
    }

    pub fn message_history(&self, limit: usize) -> Vec<Message> {
        recent_messages(&self.state.borrow(), limit).to_vec()
    }

    pub fn rate_limit_status(&self) -> RateLimitStatus {
        rate_limit_status(&self.state.borrow(), self.guest_quota)
    }

    pub fn status(&self) -> SessionStatus {
        self.state.borrow().status
    }

    pub fn is_terminated(&self) -> bool {
        self.status() == SessionStatus::Terminated || self.commands.is_closed()
    }

    /// Wait until the actor has exited
    pub async fn closed(&self) {
        self.commands.closed().await
    }
}

/// Start a session actor on the current runtime
pub fn spawn_session(
    init: SessionInit,
    settings: SessionSettings,
    routing: SharedRoutingTable,
    engine: Arc<dyn WorkflowStarter>,
    options: &SessionRuntimeOptions,
    on_exit: Option<ExitHook>,
) -> SessionHandle {
    let session_id = init.session_id.clone();
    let run_id = Uuid::now_v7();
    let guest_quota = settings.guest_quota;
    let machine = SessionStateMachine::new(init, settings, Utc::now());
    let (state_tx, state_rx) = watch::channel(machine.snapshot());
    let (commands_tx, commands_rx) = mpsc::channel(options.channel_capacity.max(1));

    let actor = SessionActor {
        machine,
        routing,
        engine,
        commands: commands_rx,
        state: state_tx,
        starts: JoinSet::new(),
        barriers: Vec::new(),
        inactivity_timeout: options.inactivity_timeout,
        run_id,
        on_exit,
    };
    let span = tracing::info_span!("session", session_id = %session_id, run_id = %run_id);
    tokio::spawn(actor.run().instrument(span));

    SessionHandle {
        session_id,
        run_id,
        guest_quota,
        commands: commands_tx,
        state: state_rx,
    }
}

struct SessionActor {
    machine: SessionStateMachine,
    routing: SharedRoutingTable,
    engine: Arc<dyn WorkflowStarter>,
    commands: mpsc::Receiver<SessionCommand>,
    state: watch::Sender<SessionState>,
    starts: JoinSet<StartResult>,
    /// Barriers waiting for in-flight starts to settle
    barriers: Vec<oneshot::Sender<()>>,
    inactivity_timeout: Duration,
    run_id: Uuid,
    on_exit: Option<ExitHook>,
}

impl SessionActor {
    async fn run(mut self) {
        let sleep = sleep_until(Instant::now() + self.inactivity_timeout);
        tokio::pin!(sleep);

        while self.machine.is_active() {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Signal { signal, reply }) => {
                        let outcome = self.handle_signal(signal);
                        sleep.as_mut().reset(Instant::now() + self.inactivity_timeout);
                        self.publish();
                        if let Some(reply) = reply {
                            let _ = reply.send(outcome);
                        }
                    }
                    Some(SessionCommand::Barrier(done)) => self.barrier(done),
                    None => {
                        warn!("All session handles dropped, ending session");
                        self.machine.terminate("session handle dropped", Utc::now());
                        self.publish();
                    }
                },

                Some(joined) = self.starts.join_next(), if !self.starts.is_empty() => {
                    self.apply_start(joined);
                    self.publish();
                    self.release_barriers();
                }

                _ = &mut sleep => {
                    info!(timeout_secs = self.inactivity_timeout.as_secs(), "Session inactivity timeout");
                    self.machine.expire(Utc::now());
                    self.publish();
                }
            }
        }

        self.shutdown().await;
    }

    fn handle_signal(&mut self, signal: Signal) -> SignalOutcome {
        let now = Utc::now();
        let name = signal.name();
        let table = self.routing.snapshot();

        let outcome = match signal {
            Signal::ReceiveMessage(message) => self.machine.receive_message(&message, &table, now),
            Signal::TriggerWorkflow(event) => self.machine.trigger_workflow(&event, &table, now),
            Signal::UpdateUser(user) => self.machine.update_user(&user, now),
            Signal::Terminate(reason) => self.machine.terminate(reason, now),
        };

        match &outcome {
            SignalOutcome::Applied { start: Some(start) } => self.spawn_start(start.clone()),
            SignalOutcome::Invalid(errors) => {
                warn!(signal = name, errors = ?errors, "Invalid signal payload")
            }
            _ => {}
        }
        debug!(signal = name, table_version = table.version(), "Signal processed");
        outcome
    }

    fn spawn_start(&mut self, request: StartRequest) {
        let engine = Arc::clone(&self.engine);
        self.starts.spawn(
            async move {
                let workflow_id = request.workflow_id.clone();
                let result = start_logged(engine.as_ref(), request)
                    .await
                    .map(|started| started.run_id)
                    .map_err(|e| e.to_string());
                (workflow_id, result)
            }
            .in_current_span(),
        );
    }

    fn apply_start(&mut self, joined: Result<StartResult, tokio::task::JoinError>) {
        match joined {
            Ok((workflow_id, result)) => {
                self.machine.record_start_result(&workflow_id, result);
            }
            Err(e) => error!(error = %e, "Subordinate start task failed"),
        }
    }

    fn barrier(&mut self, done: oneshot::Sender<()>) {
        if self.starts.is_empty() {
            let _ = done.send(());
        } else {
            self.barriers.push(done);
        }
    }

    fn release_barriers(&mut self) {
        if self.starts.is_empty() {
            for done in self.barriers.drain(..) {
                let _ = done.send(());
            }
        }
    }

    fn publish(&self) {
        self.state.send_replace(self.machine.snapshot());
    }

    /// Settle in-flight starts, answer queued commands, then exit
    async fn shutdown(mut self) {
        let settle = async {
            while let Some(joined) = self.starts.join_next().await {
                self.apply_start(joined);
            }
        };
        if timeout(START_SETTLE_TIMEOUT, settle).await.is_err() {
            warn!(
                pending = self.starts.len(),
                timeout_secs = START_SETTLE_TIMEOUT.as_secs(),
                "Subordinate starts did not settle, abandoning them"
            );
            self.starts.abort_all();
        }
        self.publish();
        for done in self.barriers.drain(..) {
            let _ = done.send(());
        }

        // Leave the registry before closing so waiters on `closed()` see it gone
        if let Some(on_exit) = self.on_exit.take() {
            on_exit(self.machine.state().session_id.as_str(), self.run_id);
        }

        // Close first so no new commands arrive, then answer what is queued
        self.commands.close();
        while let Some(command) = self.commands.recv().await {
            match command {
                SessionCommand::Signal { reply, .. } => {
                    if let Some(reply) = reply {
                        let _ = reply.send(SignalOutcome::Ignored);
                    }
                }
                SessionCommand::Barrier(done) => {
                    let _ = done.send(());
                }
            }
        }

        info!(
            reason = ?self.machine.state().termination_reason,
            messages = self.machine.state().message_history.len(),
            "Session actor stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InMemoryEngine;
    use flowgate_core::routing::RoutingConfig;
    use flowgate_core::session::StartStatus;
    use serde_json::json;

    fn spawn(init: SessionInit, engine: &InMemoryEngine, timeout: Duration) -> SessionHandle {
        let routing = SharedRoutingTable::from_config(RoutingConfig::default_routing()).unwrap();
        let options = SessionRuntimeOptions {
            inactivity_timeout: timeout,
            channel_capacity: 8,
        };
        spawn_session(
            init,
            SessionSettings::default(),
            routing,
            Arc::new(engine.clone()),
            &options,
            None,
        )
    }

    /// Engine whose starts never complete
    struct StuckEngine;

    #[async_trait::async_trait]
    impl WorkflowStarter for StuckEngine {
        async fn start_workflow(
            &self,
            _request: StartRequest,
        ) -> Result<crate::engine::StartedWorkflow, crate::engine::EngineError> {
            std::future::pending().await
        }

        async fn ping(&self) -> bool {
            true
        }
    }

    fn spawn_stuck(session_id: &str, on_exit: Option<ExitHook>) -> SessionHandle {
        let routing = SharedRoutingTable::from_config(RoutingConfig::default_routing()).unwrap();
        spawn_session(
            SessionInit::guest(session_id),
            SessionSettings::default(),
            routing,
            Arc::new(StuckEngine),
            &SessionRuntimeOptions::default(),
            on_exit,
        )
    }

    #[tokio::test]
    async fn test_messages_processed_in_order() {
        let engine = InMemoryEngine::new();
        let handle = spawn(
            SessionInit::authenticated("s-1", "u-1"),
            &engine,
            Duration::from_secs(60),
        );

        for i in 0..20 {
            assert_eq!(
                handle.receive_message(json!({"content": format!("m{i}")})).await,
                SignalAck::Accepted
            );
        }
        handle.barrier().await;

        let contents: Vec<String> = handle
            .message_history(0)
            .into_iter()
            .map(|m| m.content)
            .collect();
        let expected: Vec<String> = (0..20).map(|i| format!("m{i}")).collect();
        assert_eq!(contents, expected);
    }

    #[tokio::test]
    async fn test_trigger_start_is_recorded() {
        let engine = InMemoryEngine::new();
        let handle = spawn(SessionInit::guest("s-2"), &engine, Duration::from_secs(60));

        handle
            .receive_message(json!({"content": "major outage in checkout"}))
            .await;
        handle.barrier().await;

        let triggered = handle.triggered_workflows();
        assert_eq!(triggered.len(), 1);
        assert!(matches!(triggered[0].status, StartStatus::Started { .. }));
        assert_eq!(engine.started_count(), 1);
        assert_eq!(engine.started()[0].parent_session_id.as_deref(), Some("s-2"));
    }

    #[tokio::test]
    async fn test_start_failure_is_recorded_not_propagated() {
        let engine = InMemoryEngine::new();
        engine.fail_workflow_type("IncidentWorkflow");
        let handle = spawn(SessionInit::guest("s-3"), &engine, Duration::from_secs(60));

        let outcome = handle
            .signal_and_wait(Signal::ReceiveMessage(json!({"content": "incident!"})))
            .await;
        assert!(matches!(outcome, SignalOutcome::Applied { start: Some(_) }));
        handle.barrier().await;

        let state = handle.state();
        assert!(state.is_active);
        assert_eq!(state.message_history.len(), 1);
        assert!(state.triggered_workflows[0].status.is_failed());
    }

    #[tokio::test]
    async fn test_quota_outcome_is_distinguishable() {
        let engine = InMemoryEngine::new();
        let handle = spawn(SessionInit::guest("s-4"), &engine, Duration::from_secs(60));

        for _ in 0..3 {
            handle.receive_message(json!({"content": "hi"})).await;
        }
        let outcome = handle
            .signal_and_wait(Signal::ReceiveMessage(json!({"content": "hi"})))
            .await;
        assert!(outcome.is_quota_exceeded());
        assert!(handle.rate_limit_status().limited);
    }

    #[tokio::test]
    async fn test_terminate_then_signals_are_ignored() {
        let engine = InMemoryEngine::new();
        let handle = spawn(SessionInit::guest("s-5"), &engine, Duration::from_secs(60));

        handle.receive_message(json!({"content": "hi"})).await;
        handle.terminate("user closed chat").await;
        handle.closed().await;

        assert!(handle.is_terminated());
        assert_eq!(
            handle.receive_message(json!({"content": "late"})).await,
            SignalAck::Ignored
        );
        assert_eq!(
            handle
                .signal_and_wait(Signal::ReceiveMessage(json!({"content": "late"})))
                .await,
            SignalOutcome::Ignored
        );

        let state = handle.state();
        assert_eq!(state.status, SessionStatus::Terminated);
        assert_eq!(state.message_history.len(), 1);
        assert_eq!(state.termination_reason.as_deref(), Some("user closed chat"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactivity_timeout_terminates() {
        let engine = InMemoryEngine::new();
        let handle = spawn(SessionInit::guest("s-6"), &engine, Duration::from_secs(3600));

        tokio::time::sleep(Duration::from_secs(1800)).await;
        handle.receive_message(json!({"content": "still here"})).await;
        handle.barrier().await;

        // Activity reset the deadline
        tokio::time::sleep(Duration::from_secs(3000)).await;
        assert_eq!(handle.status(), SessionStatus::Active);

        tokio::time::sleep(Duration::from_secs(700)).await;
        handle.closed().await;
        let state = handle.state();
        assert_eq!(state.status, SessionStatus::Terminated);
        assert_eq!(state.termination_reason.as_deref(), Some("inactivity timeout"));
        assert_eq!(state.message_history.len(), 1);
    }

    #[tokio::test]
    async fn test_queries_do_not_wait_for_slow_engine() {
        let handle = spawn_stuck("s-7", None);

        let outcome = handle
            .signal_and_wait(Signal::ReceiveMessage(json!({"content": "upload a pdf"})))
            .await;
        assert!(outcome.start_request().is_some());

        // The start never completes, yet the session keeps serving
        let triggered = handle.triggered_workflows();
        assert_eq!(triggered.len(), 1);
        assert!(triggered[0].status.is_pending());
        let outcome = handle
            .signal_and_wait(Signal::ReceiveMessage(json!({"content": "hello?"})))
            .await;
        assert!(matches!(outcome, SignalOutcome::Applied { start: None }));
        assert_eq!(handle.state().message_history.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_start_does_not_block_exit() {
        let (tx, rx) = oneshot::channel();
        let hook: ExitHook = Box::new(move |session_id, run_id| {
            let _ = tx.send((session_id.to_string(), run_id));
        });
        let handle = spawn_stuck("s-8", Some(hook));

        let outcome = handle
            .signal_and_wait(Signal::ReceiveMessage(json!({"content": "we have an outage"})))
            .await;
        assert!(outcome.start_request().is_some());

        let started = Instant::now();
        handle.terminate("user closed chat").await;
        handle.closed().await;
        assert!(started.elapsed() >= START_SETTLE_TIMEOUT);

        let (session_id, run_id) = rx.await.unwrap();
        assert_eq!(session_id, "s-8");
        assert_eq!(run_id, handle.run_id());
        assert_eq!(handle.status(), SessionStatus::Terminated);
        assert!(handle.triggered_workflows()[0].status.is_pending());
    }

    #[tokio::test]
    async fn test_join_results_are_applied_while_signals_keep_arriving() {
        let engine = InMemoryEngine::new();
        let handle = spawn(SessionInit::authenticated("s-9", "u-9"), &engine, Duration::from_secs(60));

        handle.receive_message(json!({"content": "outage in eu"})).await;
        for i in 0..40 {
            handle.receive_message(json!({"content": format!("chatter {i}")})).await;
        }
        handle.barrier().await;

        let triggered = handle.triggered_workflows();
        assert_eq!(triggered.len(), 1);
        assert!(matches!(triggered[0].status, StartStatus::Started { .. }));
        assert_eq!(handle.state().message_history.len(), 41);
    }
}
