use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

/// Three-state gate wrapping any suspendable operation against one remote
/// peer: `email_provider`, `push_android_provider`, `push_ios_provider`,
/// `template_service`. One instance is owned per peer by the `DeliveryEngine`
/// that guards it and is shared by every in-flight handler.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    timeout_seconds: u64,
    state: Mutex<BreakerState>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerState {
    state: State,
    failure_count: u32,
    last_failure_time: Option<Instant>,
}

/// Lets a breaker tell transport failures (count against the breaker) apart
/// from errors the caller already knows are non-transport — validation,
/// rendering, missing configuration — which must not trip a breaker guarding
/// an unrelated remote peer. Defaults to "every error counts" so breakers
/// over plain error types keep working without an impl.
pub trait BreakerFailure {
    fn counts_as_failure(&self) -> bool {
        true
    }
}

/// Error surfaced when a breaker is OPEN and fails a call fast.
#[derive(Debug, thiserror::Error)]
#[error("circuit '{name}' is open, retry in {retry_after_secs}s")]
pub struct CircuitOpenError {
    pub name: String,
    pub retry_after_secs: u64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, timeout_seconds: u64) -> Self {
        Self {
            name: name.into(),
            failure_threshold,
            timeout_seconds,
            state: Mutex::new(BreakerState {
                state: State::Closed,
                failure_count: 0,
                last_failure_time: None,
            }),
        }
    }

    /// Run `op`, unless the breaker is OPEN, in which case it fails fast
    /// without invoking `op` at all.
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: BreakerFailure,
    {
        self.check_admit().map_err(CallError::Open)?;

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                if err.counts_as_failure() {
                    self.record_failure();
                }
                Err(CallError::Inner(err))
            }
        }
    }

    fn check_admit(&self) -> Result<(), CircuitOpenError> {
        let mut state = self.state.lock().unwrap();
        match state.state {
            State::Closed => Ok(()),
            State::HalfOpen => Ok(()),
            State::Open => {
                let elapsed = state
                    .last_failure_time
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed.as_secs() >= self.timeout_seconds {
                    info!(circuit = %self.name, "transitioning OPEN -> HALF_OPEN after timeout");
                    state.state = State::HalfOpen;
                    Ok(())
                } else {
                    let retry_after_secs = self.timeout_seconds - elapsed.as_secs();
                    Err(CircuitOpenError {
                        name: self.name.clone(),
                        retry_after_secs,
                    })
                }
            }
        }
    }

    fn record_success(&self) {
        let mut state = self.state.lock().unwrap();
        if state.state != State::Closed {
            info!(circuit = %self.name, "transitioning {:?} -> CLOSED after success", state.state);
        }
        state.state = State::Closed;
        state.failure_count = 0;
    }

    fn record_failure(&self) {
        let mut state = self.state.lock().unwrap();
        state.failure_count += 1;
        state.last_failure_time = Some(Instant::now());

        match state.state {
            State::Closed => {
                if state.failure_count >= self.failure_threshold {
                    warn!(
                        circuit = %self.name,
                        failures = state.failure_count,
                        "transitioning CLOSED -> OPEN"
                    );
                    state.state = State::Open;
                }
            }
            State::HalfOpen => {
                warn!(circuit = %self.name, "probe failed, transitioning HALF_OPEN -> OPEN");
                state.state = State::Open;
            }
            State::Open => {}
        }
    }

    /// Snapshot for the admin `/circuits` endpoint.
    pub fn snapshot(&self) -> CircuitSnapshot {
        let state = self.state.lock().unwrap();
        CircuitSnapshot {
            name: self.name.clone(),
            state: match state.state {
                State::Closed => "closed",
                State::Open => "open",
                State::HalfOpen => "half_open",
            },
            failure_count: state.failure_count,
            failure_threshold: self.failure_threshold,
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: &'static str,
    pub failure_count: u32,
    pub failure_threshold: u32,
}

/// Result of a guarded call: either the breaker short-circuited, or `op` ran
/// and (possibly) failed on its own terms.
#[derive(Debug, thiserror::Error)]
pub enum CallError<E> {
    #[error(transparent)]
    Open(CircuitOpenError),
    #[error(transparent)]
    Inner(E),
}

#[cfg(test)]
mod tests {
    use super::*;

    impl BreakerFailure for &'static str {}

    async fn ok() -> Result<(), &'static str> {
        Ok(())
    }

    async fn fail() -> Result<(), &'static str> {
        Err("boom")
    }

    #[tokio::test]
    async fn closed_then_opens_after_threshold() {
        let cb = CircuitBreaker::new("peer", 3, 60);

        for _ in 0..2 {
            let res = cb.call(fail).await;
            assert!(matches!(res, Err(CallError::Inner(_))));
        }

        // third failure trips the breaker
        let res = cb.call(fail).await;
        assert!(matches!(res, Err(CallError::Inner(_))));

        // subsequent call fails fast without invoking op
        let res = cb.call(ok).await;
        assert!(matches!(res, Err(CallError::Open(_))));
    }

    #[tokio::test]
    async fn half_open_probe_success_closes_breaker() {
        let cb = CircuitBreaker::new("peer", 1, 1);

        let _ = cb.call(fail).await;
        tokio::time::sleep(Duration::from_millis(1100)).await;
        // timeout has elapsed so this call is allowed through as a probe
        let res = cb.call(ok).await;
        assert!(res.is_ok());

        // breaker is CLOSED again; a subsequent call is served normally
        let res = cb.call(ok).await;
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn half_open_probe_failure_reopens() {
        let cb = CircuitBreaker::new("peer", 1, 1);

        let _ = cb.call(fail).await;
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let res = cb.call(fail).await;
        assert!(matches!(res, Err(CallError::Inner(_))));

        // breaker reopened and re-stamped; immediate next call is fast-failed
        let res = cb.call(ok).await;
        assert!(matches!(res, Err(CallError::Open(_))));
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let cb = CircuitBreaker::new("peer", 2, 60);

        let _ = cb.call(fail).await;
        let _ = cb.call(ok).await;
        let _ = cb.call(fail).await;

        // only one consecutive failure since the reset, breaker stays closed
        let res = cb.call(ok).await;
        assert!(res.is_ok());
    }
}
