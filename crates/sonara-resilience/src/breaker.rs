//! Failure-ratio circuit breaker with a half-open probe.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

/// Breaker tuning shared by every pipeline.
#[derive(Debug, Clone, Copy)]
pub struct BreakerSettings {
    /// Failure ratio at which the circuit opens.
    pub failure_ratio: f64,
    /// Sampling window for the ratio.
    pub window: Duration,
    /// Minimum calls inside the window before the ratio is considered.
    pub min_throughput: u32,
    /// How long the circuit stays open before a half-open probe.
    pub open_duration: Duration,
}

/// Externally visible circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass; outcomes are sampled.
    Closed,
    /// Calls are rejected until the cool-down elapses.
    Open,
    /// A single probe call is admitted.
    HalfOpen,
}

impl CircuitState {
    /// Gauge encoding: 0 closed, 1 open, 2 half-open.
    #[must_use]
    pub const fn as_gauge(self) -> i64 {
        match self {
            Self::Closed => 0,
            Self::Open => 1,
            Self::HalfOpen => 2,
        }
    }
}

enum Inner {
    Closed { samples: VecDeque<(Instant, bool)> },
    Open { until: Instant },
    HalfOpen { probe_in_flight: bool },
}

/// Shared circuit breaker.
pub struct Breaker {
    settings: BreakerSettings,
    inner: Mutex<Inner>,
}

impl Breaker {
    /// Construct a closed breaker.
    #[must_use]
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            inner: Mutex::new(Inner::Closed {
                samples: VecDeque::new(),
            }),
        }
    }

    /// Current state, for gauges.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex has been poisoned.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let inner = self.inner.lock().expect("breaker mutex poisoned");
        match &*inner {
            Inner::Closed { .. } => CircuitState::Closed,
            Inner::Open { .. } => CircuitState::Open,
            Inner::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    /// Ask to pass a call. `None` admits the call; `Some(retry_after)`
    /// rejects it.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex has been poisoned.
    #[must_use]
    pub fn try_pass(&self) -> Option<Duration> {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        let now = Instant::now();
        match &mut *inner {
            Inner::Closed { .. } => None,
            Inner::Open { until } => {
                if now >= *until {
                    *inner = Inner::HalfOpen {
                        probe_in_flight: true,
                    };
                    info!("circuit half-open; admitting probe");
                    None
                } else {
                    Some(*until - now)
                }
            }
            Inner::HalfOpen { probe_in_flight } => {
                if *probe_in_flight {
                    Some(self.settings.open_duration)
                } else {
                    *probe_in_flight = true;
                    None
                }
            }
        }
    }

    /// Record the outcome of an admitted call.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex has been poisoned.
    pub fn record(&self, success: bool) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        let now = Instant::now();
        match &mut *inner {
            Inner::Closed { samples } => {
                samples.push_back((now, success));
                let horizon = now - self.settings.window;
                while samples.front().is_some_and(|(at, _)| *at < horizon) {
                    samples.pop_front();
                }

                let total = samples.len() as u32;
                if total < self.settings.min_throughput {
                    return;
                }
                let failures = samples.iter().filter(|(_, ok)| !ok).count() as f64;
                if failures / f64::from(total) >= self.settings.failure_ratio {
                    warn!("circuit opened on failure ratio");
                    *inner = Inner::Open {
                        until: now + self.settings.open_duration,
                    };
                }
            }
            Inner::Open { .. } => {}
            Inner::HalfOpen { .. } => {
                if success {
                    info!("probe succeeded; circuit closed");
                    *inner = Inner::Closed {
                        samples: VecDeque::new(),
                    };
                } else {
                    warn!("probe failed; circuit re-opened");
                    *inner = Inner::Open {
                        until: now + self.settings.open_duration,
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> BreakerSettings {
        BreakerSettings {
            failure_ratio: 0.5,
            window: Duration::from_secs(30),
            min_throughput: 4,
            open_duration: Duration::from_secs(30),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stays_closed_below_min_throughput() {
        let breaker = Breaker::new(settings());
        for _ in 0..3 {
            assert!(breaker.try_pass().is_none());
            breaker.record(false);
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn opens_at_ratio_and_admits_single_probe() {
        let breaker = Breaker::new(settings());
        for _ in 0..4 {
            assert!(breaker.try_pass().is_none());
            breaker.record(false);
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.try_pass().is_some());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(breaker.try_pass().is_none(), "probe admitted");
        assert!(breaker.try_pass().is_some(), "second concurrent probe rejected");
        breaker.record(false);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn old_samples_age_out_of_the_window() {
        let breaker = Breaker::new(settings());
        for _ in 0..3 {
            breaker.record(false);
        }
        tokio::time::sleep(Duration::from_secs(31)).await;
        for _ in 0..3 {
            breaker.record(true);
        }
        // The three failures fell out of the window; ratio is 0/…
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
