//! Timer registry.
//!
//! Every timeout or interval scheduled against a socket is registered under
//! that socket's generation so teardown can cancel all of them atomically.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Fires once, then the registry entry self-removes.
    Timeout,
    /// Fires repeatedly until explicitly cleared.
    Interval,
}

struct TimerEntry {
    id: u64,
    token: CancellationToken,
}

/// Tracks scheduled timers per socket generation.
#[derive(Default)]
pub struct TimerRegistry {
    next_id: AtomicU64,
    timers: Mutex<HashMap<u64, Vec<TimerEntry>>>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a timer against a socket generation. Returns its handle id.
    pub fn schedule<F>(
        self: &Arc<Self>,
        generation: u64,
        delay: Duration,
        kind: TimerKind,
        mut callback: F,
    ) -> u64
    where
        F: FnMut() + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.timers
            .lock()
            .entry(generation)
            .or_default()
            .push(TimerEntry {
                id,
                token: token.clone(),
            });

        let registry: Weak<TimerRegistry> = Arc::downgrade(self);
        tokio::spawn(async move {
            match kind {
                TimerKind::Timeout => {
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {
                            callback();
                            if let Some(registry) = registry.upgrade() {
                                registry.cancel(generation, id);
                            }
                        }
                        () = token.cancelled() => {}
                    }
                }
                TimerKind::Interval => loop {
                    tokio::select! {
                        () = tokio::time::sleep(delay) => callback(),
                        () = token.cancelled() => break,
                    }
                },
            }
        });
        id
    }

    /// Cancel one timer.
    pub fn cancel(&self, generation: u64, id: u64) {
        let mut timers = self.timers.lock();
        if let Some(entries) = timers.get_mut(&generation) {
            if let Some(pos) = entries.iter().position(|e| e.id == id) {
                entries.remove(pos).token.cancel();
            }
            if entries.is_empty() {
                timers.remove(&generation);
            }
        }
    }

    /// Cancel every timer registered for a socket generation.
    pub fn clear(&self, generation: u64) {
        if let Some(entries) = self.timers.lock().remove(&generation) {
            for entry in entries {
                entry.token.cancel();
            }
        }
    }

    /// Number of live registry entries for a generation.
    pub fn active_count(&self, generation: u64) -> usize {
        self.timers
            .lock()
            .get(&generation)
            .map_or(0, |entries| entries.len())
    }
}
