//! Simulated clock for deterministic scenario orchestration.
//!
//! The clock owns a virtual time `t ≥ 0` that only ever moves forward.
//! In real-time mode `advance_to` sleeps the wall-clock delta before the
//! jump; in simulated mode the jump is instantaneous, which is what makes
//! accelerated test runs possible.
//!
//! Every layer sleep (chunk pacing, network latency, mock-tool latency,
//! barge-in reaction delay) goes through [`SimulatedClock::sleep`], so a
//! simulated run completes as fast as the scheduler can drain it while a
//! real-time run paces faithfully.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Shared handle to the run's clock. The orchestrator owns the only
/// instance and injects clones into every layer via `set_clock`.
pub type SharedClock = Arc<SimulatedClock>;

#[derive(Default)]
pub struct SimulatedClock {
    inner: Mutex<ClockInner>,
}

#[derive(Default)]
struct ClockInner {
    current: f64,
    realtime: bool,
    /// Registered `wait_until` continuations: `(target, signal)`.
    waiters: Vec<(f64, Arc<Notify>)>,
}

impl SimulatedClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time in seconds.
    pub fn now(&self) -> f64 {
        self.inner.lock().current
    }

    pub fn is_realtime(&self) -> bool {
        self.inner.lock().realtime
    }

    /// Advance the clock to `target` seconds.
    ///
    /// A no-op when `target` is not ahead of the current time. All waiters
    /// whose target is reached are released before this returns.
    pub async fn advance_to(&self, target: f64) {
        let (delta, realtime) = {
            let inner = self.inner.lock();
            if target <= inner.current {
                return;
            }
            (target - inner.current, inner.realtime)
        };

        if realtime {
            tokio::time::sleep(Duration::from_secs_f64(delta)).await;
        }

        let released = {
            let mut inner = self.inner.lock();
            // Another task may have advanced further while we slept.
            if target > inner.current {
                inner.current = target;
            }
            let now = inner.current;
            let mut released = Vec::new();
            inner.waiters.retain(|(t, notify)| {
                if *t <= now {
                    released.push(Arc::clone(notify));
                    false
                } else {
                    true
                }
            });
            released
        };

        for notify in released {
            notify.notify_one();
        }
    }

    /// Advance the clock by `delta` seconds.
    pub async fn advance_by(&self, delta: f64) {
        let target = self.now() + delta;
        self.advance_to(target).await;
    }

    /// Suspend the caller until the clock reaches `target`.
    ///
    /// Returns immediately when the target is already in the past.
    pub async fn wait_until(&self, target: f64) {
        let notify = {
            let mut inner = self.inner.lock();
            if inner.current >= target {
                return;
            }
            let notify = Arc::new(Notify::new());
            inner.waiters.push((target, Arc::clone(&notify)));
            notify
        };
        // `notify_one` stores a permit, so a signal sent between releasing
        // the lock and this await is not lost.
        notify.notified().await;
    }

    /// Pacing seam for the simulation layers.
    ///
    /// Real-time mode sleeps the wall clock; simulated mode yields once so
    /// concurrent tasks (response collector, listener) get scheduled.
    pub async fn sleep(&self, secs: f64) {
        if secs <= 0.0 {
            return;
        }
        if self.is_realtime() {
            tokio::time::sleep(Duration::from_secs_f64(secs)).await;
        } else {
            tokio::task::yield_now().await;
        }
    }

    pub fn set_realtime(&self, enabled: bool) {
        self.inner.lock().realtime = enabled;
    }

    /// Reset to t = 0 and drop all registered waiters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.current = 0.0;
        inner.waiters.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn advance_to_moves_time_forward() {
        let clock = SimulatedClock::new();
        assert_eq!(clock.now(), 0.0);
        clock.advance_to(5.0).await;
        assert_eq!(clock.now(), 5.0);
    }

    #[tokio::test]
    async fn advance_by_accumulates() {
        let clock = SimulatedClock::new();
        clock.advance_by(3.0).await;
        clock.advance_by(2.0).await;
        assert_eq!(clock.now(), 5.0);
    }

    #[tokio::test]
    async fn advance_backward_is_a_noop() {
        let clock = SimulatedClock::new();
        clock.advance_to(5.0).await;
        clock.advance_to(3.0).await;
        assert_eq!(clock.now(), 5.0);
    }

    #[tokio::test]
    async fn wait_until_releases_on_advance() {
        let clock: SharedClock = Arc::new(SimulatedClock::new());
        let waiter_clock = Arc::clone(&clock);
        let waiter = tokio::spawn(async move {
            waiter_clock.wait_until(2.0).await;
            waiter_clock.now()
        });

        // Let the waiter register before advancing.
        tokio::task::yield_now().await;
        clock.advance_to(2.5).await;

        let seen = waiter.await.expect("waiter task panicked");
        assert!(seen >= 2.0, "waiter released at t={seen}");
    }

    #[tokio::test]
    async fn wait_until_past_target_returns_immediately() {
        let clock = SimulatedClock::new();
        clock.advance_to(10.0).await;
        clock.wait_until(4.0).await;
        assert_eq!(clock.now(), 10.0);
    }

    #[tokio::test]
    async fn partial_advance_keeps_later_waiters_registered() {
        let clock: SharedClock = Arc::new(SimulatedClock::new());
        let waiter_clock = Arc::clone(&clock);
        let waiter = tokio::spawn(async move {
            waiter_clock.wait_until(10.0).await;
            waiter_clock.now()
        });

        tokio::task::yield_now().await;
        clock.advance_to(5.0).await;
        assert!(!waiter.is_finished());

        clock.advance_to(10.0).await;
        let seen = waiter.await.expect("waiter task panicked");
        assert_eq!(seen, 10.0);
    }

    #[tokio::test]
    async fn reset_returns_to_zero() {
        let clock = SimulatedClock::new();
        clock.advance_to(7.0).await;
        clock.reset();
        assert_eq!(clock.now(), 0.0);
    }
}
