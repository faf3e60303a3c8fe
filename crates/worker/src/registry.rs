// Live session registry
// Decision: DashMap keyed by session id; sessions share nothing else
// Decision: Starting an id that is already live returns the live session
// Decision: An exiting session removes its own entry, matched by run id

use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use flowgate_core::routing::SharedRoutingTable;
use flowgate_core::session::{SessionInit, SessionSettings};
use flowgate_core::SessionError;
use tracing::{debug, info};

use crate::engine::WorkflowStarter;
use crate::session_actor::{spawn_session, ExitHook, SessionHandle, SessionRuntimeOptions};

/// Result of [`SessionRegistry::start_session`]
#[derive(Debug, Clone)]
pub struct StartedSession {
    pub handle: SessionHandle,
    /// False when an already-running session was returned
    pub created: bool,
}

/// All sessions hosted by this worker
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, SessionHandle>>,
    routing: SharedRoutingTable,
    engine: Arc<dyn WorkflowStarter>,
    settings: SessionSettings,
    options: SessionRuntimeOptions,
}

impl SessionRegistry {
    pub fn new(
        routing: SharedRoutingTable,
        engine: Arc<dyn WorkflowStarter>,
        settings: SessionSettings,
        options: SessionRuntimeOptions,
    ) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            routing,
            engine,
            settings,
            options,
        }
    }

    /// Start a session, or return the live one with the same id
    ///
    /// A terminated session with the same id is replaced by a fresh one.
    pub fn start_session(&self, init: SessionInit) -> Result<StartedSession, SessionError> {
        let session_id = init.session_id.trim().to_string();
        if session_id.is_empty() {
            return Err(SessionError::InvalidId);
        }

        let init = SessionInit { session_id: session_id.clone(), ..init };
        match self.sessions.entry(session_id) {
            Entry::Occupied(mut entry) => {
                if !entry.get().is_terminated() {
                    debug!(session_id = %entry.key(), "Session already running");
                    return Ok(StartedSession {
                        handle: entry.get().clone(),
                        created: false,
                    });
                }
                info!(session_id = %entry.key(), "Replacing terminated session");
                let handle = self.spawn(init);
                entry.insert(handle.clone());
                Ok(StartedSession {
                    handle,
                    created: true,
                })
            }
            Entry::Vacant(entry) => {
                let handle = self.spawn(init);
                entry.insert(handle.clone());
                Ok(StartedSession {
                    handle,
                    created: true,
                })
            }
        }
    }

    fn spawn(&self, init: SessionInit) -> SessionHandle {
        spawn_session(
            init,
            self.settings.clone(),
            self.routing.clone(),
            Arc::clone(&self.engine),
            &self.options,
            Some(self.exit_hook()),
        )
    }

    fn exit_hook(&self) -> ExitHook {
        let sessions: Weak<DashMap<String, SessionHandle>> = Arc::downgrade(&self.sessions);
        Box::new(move |session_id, run_id| {
            let Some(sessions) = sessions.upgrade() else {
                return;
            };
            // A replacement under the same id stays
            if sessions
                .remove_if(session_id, |_, handle| handle.run_id() == run_id)
                .is_some()
            {
                debug!(session_id, %run_id, "Removed ended session");
            }
        })
    }

    /// Handle for a session, live or terminated
    pub fn get(&self, session_id: &str) -> Result<SessionHandle, SessionError> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SessionError::not_found(session_id))
    }

    pub fn remove(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.remove(session_id).map(|(_, handle)| handle)
    }

    /// Drop sessions that are terminated but whose actor has not exited yet;
    /// returns how many were removed
    pub fn prune_terminated(&self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, handle| !handle.is_terminated());
        let pruned = before.saturating_sub(self.sessions.len());
        if pruned > 0 {
            debug!(pruned, "Pruned terminated sessions");
        }
        pruned
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Ask every live session to terminate and wait for the actors to exit
    pub async fn terminate_all(&self, reason: &str) {
        let handles: Vec<SessionHandle> = self.sessions.iter().map(|e| e.value().clone()).collect();
        join_all(handles.iter().map(|handle| async move {
            handle.terminate(reason).await;
            handle.closed().await;
        }))
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InMemoryEngine;
    use flowgate_core::routing::RoutingConfig;
    use std::time::Duration;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(
            SharedRoutingTable::from_config(RoutingConfig::default_routing()).unwrap(),
            Arc::new(InMemoryEngine::new()),
            SessionSettings::default(),
            SessionRuntimeOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_start_session_is_idempotent() {
        let registry = registry();
        let first = registry.start_session(SessionInit::guest("chat-1")).unwrap();
        let second = registry
            .start_session(SessionInit::authenticated("chat-1", "u-1"))
            .unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(registry.len(), 1);
        // The original session keeps its user
        assert!(second.handle.state().user_id.is_none());
    }

    #[tokio::test]
    async fn test_invalid_and_missing_ids() {
        let registry = registry();
        assert_eq!(
            registry.start_session(SessionInit::guest("  ")).unwrap_err(),
            SessionError::InvalidId
        );
        assert_eq!(
            registry.get("missing").unwrap_err(),
            SessionError::not_found("missing")
        );
    }

    #[tokio::test]
    async fn test_ended_session_leaves_registry() {
        let registry = registry();
        let started = registry.start_session(SessionInit::guest("chat-2")).unwrap();
        registry.start_session(SessionInit::guest("chat-3")).unwrap();

        started.handle.terminate("done").await;
        started.handle.closed().await;

        assert_eq!(registry.get("chat-2").unwrap_err(), SessionError::not_found("chat-2"));
        assert_eq!(registry.session_ids(), vec!["chat-3".to_string()]);

        let restarted = registry.start_session(SessionInit::guest("chat-2")).unwrap();
        assert!(restarted.created);
        assert_ne!(restarted.handle.run_id(), started.handle.run_id());
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_session_leaves_registry() {
        let registry = SessionRegistry::new(
            SharedRoutingTable::from_config(RoutingConfig::default_routing()).unwrap(),
            Arc::new(InMemoryEngine::new()),
            SessionSettings::default(),
            SessionRuntimeOptions {
                inactivity_timeout: Duration::from_secs(60),
                channel_capacity: 8,
            },
        );
        let started = registry.start_session(SessionInit::guest("chat-idle")).unwrap();
        assert_eq!(registry.len(), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        started.handle.closed().await;

        assert_eq!(started.handle.state().termination_reason.as_deref(), Some("inactivity timeout"));
        assert!(registry.get("chat-idle").is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_replace_terminated_before_exit_keeps_replacement() {
        let registry = registry();
        let old = registry.start_session(SessionInit::guest("chat-4")).unwrap();

        // Replace as soon as the termination is visible, possibly before exit
        old.handle.terminate("done").await;
        while !old.handle.is_terminated() {
            tokio::task::yield_now().await;
        }
        let replaced = registry.start_session(SessionInit::guest("chat-4")).unwrap();
        assert!(replaced.created);
        old.handle.closed().await;

        // The old run's exit does not evict its replacement
        let live = registry.get("chat-4").unwrap();
        assert_eq!(live.run_id(), replaced.handle.run_id());
        assert!(!live.is_terminated());
        assert_eq!(registry.prune_terminated(), 0);
    }

    #[tokio::test]
    async fn test_terminate_all() {
        let registry = registry();
        let a = registry.start_session(SessionInit::guest("chat-a")).unwrap();
        let b = registry.start_session(SessionInit::guest("chat-b")).unwrap();

        registry.terminate_all("worker shutdown").await;

        for started in [a, b] {
            let state = started.handle.state();
            assert!(started.handle.is_terminated());
            assert_eq!(state.termination_reason.as_deref(), Some("worker shutdown"));
        }
        assert!(registry.is_empty());
        assert_eq!(registry.prune_terminated(), 0);
    }
}
