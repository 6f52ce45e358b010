// src/site/rate_limit.rs
//! Minimum-interval request gates.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};

/// A process-wide pacing gate: successive callers are spaced at least
/// `min_interval` apart. The gate never rejects, it only delays.
///
/// Each call reserves the next free slot under a short lock and then sleeps
/// outside of it, so a waiting caller never blocks unrelated work.
#[derive(Debug)]
pub struct RateGate {
    name: &'static str,
    min_interval: Duration,
    last_slot: Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn new(name: &'static str, min_interval: Duration) -> Self {
        Self {
            name,
            min_interval,
            last_slot: Mutex::new(None),
        }
    }

    /// Waits until this caller's slot is reached.
    pub async fn wait(&self) {
        let slot = self.reserve(Instant::now());
        let now = Instant::now();
        if slot > now {
            tracing::debug!("{} gate: delaying request by {:?}", self.name, slot - now);
            sleep_until(slot).await;
        }
    }

    fn reserve(&self, now: Instant) -> Instant {
        // A poisoned lock only means another caller panicked mid-update; the
        // timestamp itself is still usable.
        let mut last = self.last_slot.lock().unwrap_or_else(|e| e.into_inner());
        let slot = match *last {
            Some(prev) if prev + self.min_interval > now => prev + self.min_interval,
            _ => now,
        };
        *last = Some(slot);
        slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn first_call_is_not_delayed() {
        let gate = RateGate::new("test", Duration::from_secs(5));
        let start = Instant::now();
        gate.wait().await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn back_to_back_calls_are_spaced_by_interval() {
        let gate = RateGate::new("test", Duration::from_millis(150));
        let start = Instant::now();
        gate.wait().await;
        gate.wait().await;

        // The first slot is reserved no earlier than `start`, the second one
        // a full interval after it.
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn concurrent_callers_get_successive_slots() {
        let gate = Arc::new(RateGate::new("test", Duration::from_millis(100)));
        let start = Instant::now();

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let gate = Arc::clone(&gate);
                tokio::spawn(async move {
                    gate.wait().await;
                    Instant::now()
                })
            })
            .collect();

        let mut finished = Vec::new();
        for handle in handles {
            finished.push(handle.await.unwrap());
        }
        finished.sort();

        // Three callers need two full intervals between the first and last.
        assert!(finished[2] - start >= Duration::from_millis(200));
    }

    #[test]
    fn reservation_after_idle_period_starts_now() {
        let gate = RateGate::new("test", Duration::from_millis(100));
        let t0 = Instant::now();
        assert_eq!(gate.reserve(t0), t0);
        assert_eq!(gate.reserve(t0), t0 + Duration::from_millis(100));
        let later = t0 + Duration::from_secs(10);
        assert_eq!(gate.reserve(later), later);
    }
}
