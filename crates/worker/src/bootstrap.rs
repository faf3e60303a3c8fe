// Engine connection bootstrap
// Decision: Malformed addresses and non-transient rejections fail immediately, without retry
// Decision: Retry timing comes from RetryPolicy; every sleep and attempt is cancellable
// Decision: Log severity escalates with the attempt count (info -> warn -> error)
//
// connect() is the only place in the worker that deliberately suspends. It
// has no side effects besides the connection attempts themselves, so calling
// it twice with the same inputs behaves the same way twice.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::retry::RetryPolicy;

/// Process exit code for "engine never became ready" (EX_TEMPFAIL)
pub const EXIT_CODE_CONNECTION_EXHAUSTED: i32 = 75;

/// Errors surfaced by [`connect`]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The address could not be parsed; never retried
    #[error("invalid engine address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// The engine refused the connection in a way retrying cannot fix
    #[error("engine at {address} rejected the connection: {reason}")]
    Rejected { address: String, reason: String },

    /// Every attempt failed
    #[error("could not connect to engine at {address} after {attempts} attempts: {last_error}")]
    Exhausted {
        address: String,
        attempts: u32,
        last_error: String,
    },

    /// Shutdown was requested while connecting
    #[error("connection to engine at {0} was cancelled")]
    Cancelled(String),
}

impl ConnectionError {
    pub fn invalid_address(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            reason: reason.into(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    /// Process exit code orchestration tooling can key on
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Exhausted { .. } => EXIT_CODE_CONNECTION_EXHAUSTED,
            _ => 1,
        }
    }
}

/// Outcome of one failed connection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError {
    /// Worth retrying (refused, timed out, unavailable)
    Transient(String),
    /// Retrying cannot help (bad TLS config, unsupported scheme)
    Fatal(String),
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Transient(e) => write!(f, "{e}"),
            AttemptError::Fatal(e) => write!(f, "{e}"),
        }
    }
}

/// Validated `host:port` engine endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineAddress {
    host: String,
    port: u16,
    tls: bool,
}

impl EngineAddress {
    /// Parse `host:port`, optionally prefixed with `http://` or `https://`
    pub fn parse(raw: &str) -> Result<Self, ConnectionError> {
        let trimmed = raw.trim();
        let invalid = |reason: &str| ConnectionError::invalid_address(raw, reason);

        let (tls, rest) = if let Some(rest) = trimmed.strip_prefix("https://") {
            (true, rest)
        } else if let Some(rest) = trimmed.strip_prefix("http://") {
            (false, rest)
        } else if trimmed.contains("://") {
            return Err(invalid("unsupported scheme"));
        } else {
            (false, trimmed)
        };
        let rest = rest.strip_suffix('/').unwrap_or(rest);

        if rest.is_empty() {
            return Err(invalid("address is empty"));
        }
        if rest.contains('/') || rest.chars().any(char::is_whitespace) {
            return Err(invalid("expected host:port"));
        }

        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| invalid("missing port"))?;
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| invalid("port must be a number between 1 and 65535"))?;
        if port == 0 {
            return Err(invalid("port must be a number between 1 and 65535"));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            tls,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    /// URI for HTTP/2 transports
    pub fn uri(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for EngineAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Performs a single connection attempt
#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: Send;

    async fn attempt(&self, address: &EngineAddress) -> Result<Self::Connection, AttemptError>;
}

/// Connect with bounded exponential backoff
///
/// Makes at most `policy.max_attempts` attempts (at least one). Between
/// attempts it sleeps `policy.delay_after_failure(n)`. Returns
/// [`ConnectionError::Exhausted`] after the last failed attempt and
/// [`ConnectionError::Cancelled`] as soon as `cancel` fires.
pub async fn connect<C: Connector>(
    connector: &C,
    address: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<C::Connection, ConnectionError> {
    let address = EngineAddress::parse(address)?;
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        log_attempt(&address, attempt, max_attempts);

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                info!(address = %address, attempt, "Engine connection cancelled");
                return Err(ConnectionError::Cancelled(address.to_string()));
            }
            result = connector.attempt(&address) => result,
        };

        match result {
            Ok(connection) => {
                info!(address = %address, attempt, "Connected to engine");
                return Ok(connection);
            }
            Err(AttemptError::Fatal(reason)) => {
                error!(address = %address, attempt, error = %reason, "Engine rejected connection");
                return Err(ConnectionError::Rejected {
                    address: address.to_string(),
                    reason,
                });
            }
            Err(AttemptError::Transient(reason)) => {
                last_error = reason;
            }
        }

        if attempt == max_attempts {
            break;
        }

        let delay = policy.delay_after_failure(attempt);
        log_failure(&address, attempt, max_attempts, &last_error, delay);

        tokio::select! {
            _ = cancel.cancelled() => {
                info!(address = %address, attempt, "Engine connection cancelled during backoff");
                return Err(ConnectionError::Cancelled(address.to_string()));
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }

    error!(
        address = %address,
        attempts = max_attempts,
        error = %last_error,
        "Engine connection attempts exhausted"
    );
    Err(ConnectionError::Exhausted {
        address: address.to_string(),
        attempts: max_attempts,
        last_error,
    })
}

/// Single bounded probe, no retries
///
/// Returns false for malformed addresses, failed attempts and timeouts.
pub async fn health_check<C: Connector>(connector: &C, address: &str, timeout: Duration) -> bool {
    let address = match EngineAddress::parse(address) {
        Ok(address) => address,
        Err(e) => {
            warn!(error = %e, "Health check skipped");
            return false;
        }
    };

    match tokio::time::timeout(timeout, connector.attempt(&address)).await {
        Ok(Ok(_)) => {
            debug!(address = %address, "Engine health check passed");
            true
        }
        Ok(Err(e)) => {
            warn!(address = %address, error = %e, "Engine health check failed");
            false
        }
        Err(_) => {
            warn!(address = %address, timeout_ms = timeout.as_millis() as u64, "Engine health check timed out");
            false
        }
    }
}

/// Attempts in the last quarter of the budget are logged as errors
fn in_final_stretch(attempt: u32, max_attempts: u32) -> bool {
    let stretch = (max_attempts / 4).max(1);
    attempt > max_attempts.saturating_sub(stretch)
}

fn log_attempt(address: &EngineAddress, attempt: u32, max_attempts: u32) {
    if attempt == 1 {
        info!(address = %address, attempt, max_attempts, "Connecting to engine");
    } else {
        debug!(address = %address, attempt, max_attempts, "Retrying engine connection");
    }
}

fn log_failure(
    address: &EngineAddress,
    attempt: u32,
    max_attempts: u32,
    reason: &str,
    delay: Duration,
) {
    let delay_ms = delay.as_millis() as u64;
    if in_final_stretch(attempt, max_attempts) {
        error!(address = %address, attempt, max_attempts, delay_ms, error = %reason, "Engine connection attempt failed");
    } else {
        warn!(address = %address, attempt, max_attempts, delay_ms, error = %reason, "Engine connection attempt failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Fails `failures` times, then succeeds with the attempt number
    struct FlakyConnector {
        failures: u32,
        attempts: AtomicU32,
    }

    impl FlakyConnector {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                attempts: AtomicU32::new(0),
            }
        }

        fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for FlakyConnector {
        type Connection = u32;

        async fn attempt(&self, _address: &EngineAddress) -> Result<u32, AttemptError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                Err(AttemptError::Transient(format!("refused #{n}")))
            } else {
                Ok(n)
            }
        }
    }

    struct NeverConnects;

    #[async_trait]
    impl Connector for NeverConnects {
        type Connection = ();

        async fn attempt(&self, _address: &EngineAddress) -> Result<(), AttemptError> {
            std::future::pending().await
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::exponential()
            .with_max_attempts(max_attempts)
            .with_initial_interval(Duration::from_millis(100))
            .with_max_interval(Duration::from_secs(2))
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        for failures in 0..5 {
            let connector = FlakyConnector::new(failures);
            let connection = connect(&connector, "localhost:7233", &policy(failures + 1), &CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(connection, failures + 1);
            assert_eq!(connector.attempts(), failures + 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_exactly_max_attempts() {
        for (failures, max_attempts) in [(3, 3), (5, 2), (1, 1)] {
            let connector = FlakyConnector::new(failures);
            let err = connect(&connector, "localhost:7233", &policy(max_attempts), &CancellationToken::new())
                .await
                .unwrap_err();

            assert_eq!(
                err,
                ConnectionError::Exhausted {
                    address: "localhost:7233".to_string(),
                    attempts: max_attempts,
                    last_error: format!("refused #{max_attempts}"),
                }
            );
            assert_eq!(connector.attempts(), max_attempts);
            assert_eq!(err.exit_code(), EXIT_CODE_CONNECTION_EXHAUSTED);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_schedule() {
        let connector = FlakyConnector::new(3);
        let started = tokio::time::Instant::now();
        connect(&connector, "localhost:7233", &policy(4), &CancellationToken::new())
            .await
            .unwrap();

        // 100ms + 200ms + 400ms
        assert_eq!(started.elapsed(), Duration::from_millis(700));
    }

    #[tokio::test]
    async fn test_invalid_address_fails_without_attempt() {
        let connector = FlakyConnector::new(0);
        for address in ["", "localhost", "localhost:http", "grpc://host:1", "host:1/path", ":7233", "host:0"] {
            let err = connect(&connector, address, &policy(5), &CancellationToken::new())
                .await
                .unwrap_err();
            assert!(matches!(err, ConnectionError::InvalidAddress { .. }), "{address}: {err}");
        }
        assert_eq!(connector.attempts(), 0);
    }

    #[tokio::test]
    async fn test_fatal_attempt_is_not_retried() {
        struct Rejecting(AtomicU32);

        #[async_trait]
        impl Connector for Rejecting {
            type Connection = ();

            async fn attempt(&self, _address: &EngineAddress) -> Result<(), AttemptError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Err(AttemptError::Fatal("tls handshake misconfigured".to_string()))
            }
        }

        let connector = Rejecting(AtomicU32::new(0));
        let err = connect(&connector, "localhost:7233", &policy(5), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::Rejected { .. }));
        assert_eq!(connector.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let connector = Arc::new(FlakyConnector::new(u32::MAX));
        let cancel = CancellationToken::new();

        let task = {
            let connector = Arc::clone(&connector);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                connect(connector.as_ref(), "localhost:7233", &policy(10), &cancel).await
            })
        };

        tokio::time::sleep(Duration::from_millis(250)).await;
        cancel.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err, ConnectionError::Cancelled("localhost:7233".to_string()));
        assert!(connector.attempts() < 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = connect(&NeverConnects, "localhost:7233", &policy(3), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::Cancelled(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_check_is_single_bounded_probe() {
        let connector = FlakyConnector::new(1);
        assert!(!health_check(&connector, "localhost:7233", Duration::from_secs(1)).await);
        assert_eq!(connector.attempts(), 1);
        assert!(health_check(&connector, "localhost:7233", Duration::from_secs(1)).await);

        assert!(!health_check(&NeverConnects, "localhost:7233", Duration::from_millis(50)).await);
        assert!(!health_check(&connector, "not an address", Duration::from_secs(1)).await);
    }

    #[test]
    fn test_parse_address() {
        let address = EngineAddress::parse("temporal.internal:7233").unwrap();
        assert_eq!(address.host(), "temporal.internal");
        assert_eq!(address.port(), 7233);
        assert_eq!(address.uri(), "http://temporal.internal:7233");

        let tls = EngineAddress::parse("https://engine.example.com:443/").unwrap();
        assert!(tls.is_tls());
        assert_eq!(tls.uri(), "https://engine.example.com:443");

        let v6 = EngineAddress::parse("[::1]:7233").unwrap();
        assert_eq!(v6.host(), "[::1]");
    }

    #[test]
    fn test_final_stretch() {
        // 10 attempts: last quarter is attempts 9 and 10
        assert!(!in_final_stretch(8, 10));
        assert!(in_final_stretch(9, 10));
        assert!(in_final_stretch(1, 1));
        assert!(in_final_stretch(3, 3));
        assert!(!in_final_stretch(2, 3));
    }
}
