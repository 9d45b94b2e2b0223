//! Per-key minimum-interval rate limiter.
//!
//! Callers sharing a key queue on that key's slot (FIFO) and are released at
//! least `min_interval` apart. The next-available instant is stamped after
//! waking, so late wakeups push the horizon out rather than bunching callers.
//! A waiter dropped mid-sleep releases the slot without stamping it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

type Slot = Arc<tokio::sync::Mutex<Option<Instant>>>;

#[derive(Debug, Default)]
pub struct RateLimiter {
    slots: Mutex<HashMap<String, Slot>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.entry(key.to_string()).or_default().clone()
    }

    /// Suspend until `key` may proceed. Zero interval returns immediately.
    pub async fn wait(&self, key: &str, min_interval: Duration) {
        if min_interval.is_zero() {
            return;
        }
        let slot = self.slot(key);
        let mut next_available = slot.lock().await;
        if let Some(next) = *next_available {
            let delay = next.saturating_duration_since(Instant::now());
            if !delay.is_zero() {
                tracing::trace!(key, delay_ms = delay.as_millis() as u64, "throttled");
                tokio::time::sleep(delay).await;
            }
        }
        *next_available = Some(Instant::now() + min_interval);
    }

    /// Next-available instant for `key`, if anything has been released on it.
    pub fn next_available(&self, key: &str) -> Option<Instant> {
        let slot = {
            let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.get(key)?.clone()
        };
        let guard = slot.try_lock().ok()?;
        *guard
    }
}
