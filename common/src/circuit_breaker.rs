//! A small `{closed, open, half-open}` circuit breaker (§9 design note: "Implement
//! as a small state machine ... do not depend on a specific library surface"),
//! generic over destination so it can front any outbound fan-out — the upload
//! service's optical-post destinations (§4.8) being the first caller.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::circuit_breaker::{ERROR_RATE_THRESHOLD_BPS, HALF_OPEN_AFTER_SECONDS, MIN_REQUESTS_TO_TRIP};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Default)]
struct Window {
    requests: u32,
    errors: u32,
}

struct Inner {
    state: CircuitState,
    opened_at: Option<Instant>,
    window: Window,
}

/// Tracks success/failure of calls to one destination and decides whether the
/// caller should even attempt the next one.
pub struct CircuitBreaker {
    half_open_after: Duration,
    min_requests: u32,
    error_rate_threshold_bps: u32,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self {
            half_open_after: Duration::from_secs(HALF_OPEN_AFTER_SECONDS),
            min_requests: MIN_REQUESTS_TO_TRIP,
            error_rate_threshold_bps: ERROR_RATE_THRESHOLD_BPS,
            inner: Mutex::new(Inner { state: CircuitState::Closed, opened_at: None, window: Window::default() }),
        }
    }

    #[cfg(test)]
    fn with_params(half_open_after: Duration, min_requests: u32, error_rate_threshold_bps: u32) -> Self {
        Self {
            half_open_after,
            min_requests,
            error_rate_threshold_bps,
            inner: Mutex::new(Inner { state: CircuitState::Closed, opened_at: None, window: Window::default() }),
        }
    }

    /// Whether a call should be attempted right now. `Open` blocks it; `HalfOpen`
    /// lets exactly the probing caller through (the breaker transitions to
    /// half-open as a side effect of this check once the cooldown has elapsed).
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if inner.opened_at.is_some_and(|t| t.elapsed() >= self.half_open_after) {
                    inner.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.window = Window::default();
                inner.opened_at = None;
            }
            CircuitState::Closed => {
                inner.window.requests += 1;
                if inner.window.requests >= self.min_requests * 4 {
                    inner.window = Window::default();
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.window = Window::default();
            }
            CircuitState::Closed => {
                inner.window.requests += 1;
                inner.window.errors += 1;
                let error_rate_bps = (inner.window.errors as u64 * 10_000) / inner.window.requests as u64;
                if inner.window.requests >= self.min_requests && error_rate_bps as u32 >= self.error_rate_threshold_bps {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    inner.window = Window::default();
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_closed_below_the_request_floor() {
        let breaker = CircuitBreaker::with_params(Duration::from_secs(30), 5, 5_000);
        for _ in 0..4 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn opens_once_error_rate_crosses_threshold_past_the_floor() {
        let breaker = CircuitBreaker::with_params(Duration::from_secs(30), 5, 5_000);
        for _ in 0..5 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn half_open_closes_on_success_and_reopens_on_failure() {
        let breaker = CircuitBreaker::with_params(Duration::from_millis(1), 1, 5_000);
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(5));
        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(5));
        assert!(breaker.allow_request());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
