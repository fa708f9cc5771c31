pub mod circuit_breaker;
pub mod key_lock;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
pub use key_lock::KeyLocks;
pub use retry::{retry_on_transient, IsTransient, RetryConfig, RetryResult};
