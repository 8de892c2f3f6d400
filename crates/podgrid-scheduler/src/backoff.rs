//! Per-pod retry backoff and attempt state.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy)]
struct Entry {
    backoff: Duration,
    last_update: Instant,
}

/// Exponential backoff keyed by pod, shared across repeated failures.
pub struct PodBackoff {
    initial: Duration,
    max: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl PodBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Delay for this failure; doubles the delay for the next one.
    pub fn next_delay(&self, key: &str, now: Instant) -> Duration {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.to_string()).or_insert(Entry {
            backoff: self.initial,
            last_update: now,
        });
        let delay = entry.backoff;
        entry.backoff = (entry.backoff * 2).min(self.max);
        entry.last_update = now;
        delay
    }

    /// Current delay without escalating it.
    pub fn current_delay(&self, key: &str, now: Instant) -> Duration {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.to_string()).or_insert(Entry {
            backoff: self.initial,
            last_update: now,
        });
        entry.last_update = now;
        entry.backoff
    }

    pub fn forget(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    /// Drop entries untouched for longer than the maximum backoff.
    pub fn gc(&self, now: Instant) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| now.saturating_duration_since(e.last_update) <= self.max);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Idle,
    Scheduling,
    Bound,
    Retrying,
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Scheduling => "scheduling",
            Self::Bound => "bound",
            Self::Retrying => "retrying",
        };
        f.write_str(s)
    }
}

/// Where each pod is in its scheduling lifecycle.
#[derive(Default)]
pub struct AttemptTracker {
    states: Mutex<HashMap<String, AttemptState>>,
}

impl AttemptTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &str, state: AttemptState) {
        self.states.lock().insert(key.to_string(), state);
    }

    /// Unknown pods are idle.
    pub fn get(&self, key: &str) -> AttemptState {
        self.states.lock().get(key).copied().unwrap_or(AttemptState::Idle)
    }

    pub fn forget(&self, key: &str) {
        self.states.lock().remove(key);
    }

    /// Drop bound pods; they no longer need tracking.
    pub fn prune_bound(&self) -> usize {
        let mut states = self.states.lock();
        let before = states.len();
        states.retain(|_, s| *s != AttemptState::Bound);
        before - states.len()
    }

    pub fn count(&self, state: AttemptState) -> usize {
        self.states.lock().values().filter(|s| **s == state).count()
    }
}
