use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

// ============================================================================
// Broker Circuit Breaker
// ============================================================================
//
// Guards the Kafka producer: after a run of publish failures the circuit
// opens and publishes fail fast instead of stacking timeouts, then a probe
// window decides whether the broker recovered.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Failing fast; the broker gets no traffic until the cooldown elapses.
    Open,
    /// Probing recovery with live traffic.
    HalfOpen,
}

impl CircuitState {
    /// Gauge encoding for the metrics registry.
    pub fn as_gauge(self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

#[derive(Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Cooldown before the first recovery probe.
    pub cooldown: Duration,
    /// Probe successes required to close again.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            success_threshold: 3,
        }
    }
}

struct Tracker {
    state: CircuitState,
    failures: u32,
    probe_successes: u32,
    opened_at: Option<Instant>,
}

#[derive(Clone)]
pub struct CircuitBreaker {
    tracker: Arc<Mutex<Tracker>>,
    config: CircuitBreakerConfig,
}

#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    /// Rejected without running the operation.
    CircuitOpen,
    OperationFailed(E),
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::CircuitOpen => write!(f, "circuit open"),
            CircuitBreakerError::OperationFailed(e) => write!(f, "operation failed: {e}"),
        }
    }
}

impl<E: std::error::Error> std::error::Error for CircuitBreakerError<E> {}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            tracker: Arc::new(Mutex::new(Tracker {
                state: CircuitState::Closed,
                failures: 0,
                probe_successes: 0,
                opened_at: None,
            })),
            config,
        }
    }

    pub async fn call<F, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        {
            let mut tracker = self.tracker.lock().await;
            if tracker.state == CircuitState::Open {
                let cooled_down = tracker
                    .opened_at
                    .map_or(true, |at| at.elapsed() >= self.config.cooldown);
                if !cooled_down {
                    return Err(CircuitBreakerError::CircuitOpen);
                }
                tracing::info!("circuit cooldown elapsed, probing broker");
                tracker.state = CircuitState::HalfOpen;
                tracker.probe_successes = 0;
            }
        }

        match operation.await {
            Ok(value) => {
                self.on_success().await;
                Ok(value)
            }
            Err(error) => {
                self.on_failure().await;
                Err(CircuitBreakerError::OperationFailed(error))
            }
        }
    }

    async fn on_success(&self) {
        let mut tracker = self.tracker.lock().await;
        match tracker.state {
            CircuitState::HalfOpen => {
                tracker.probe_successes += 1;
                if tracker.probe_successes >= self.config.success_threshold {
                    tracing::info!(
                        probes = tracker.probe_successes,
                        "broker recovered, closing circuit"
                    );
                    tracker.state = CircuitState::Closed;
                    tracker.failures = 0;
                    tracker.opened_at = None;
                }
            }
            CircuitState::Closed => tracker.failures = 0,
            CircuitState::Open => {}
        }
    }

    async fn on_failure(&self) {
        let mut tracker = self.tracker.lock().await;
        tracker.failures += 1;
        tracker.opened_at = Some(Instant::now());

        match tracker.state {
            CircuitState::Closed if tracker.failures >= self.config.failure_threshold => {
                tracing::warn!(failures = tracker.failures, "opening circuit to broker");
                tracker.state = CircuitState::Open;
            }
            CircuitState::HalfOpen => {
                tracing::warn!("probe failed, reopening circuit");
                tracker.state = CircuitState::Open;
                tracker.probe_successes = 0;
            }
            _ => {}
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.tracker.lock().await.state
    }
}
