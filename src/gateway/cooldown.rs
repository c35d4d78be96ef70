// Per-(machine, command) rate limiting stores
use crate::models::CommandKind;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandKey {
    pub uid: String,
    pub kind: CommandKind,
}

impl CommandKey {
    pub fn new(uid: &str, kind: CommandKind) -> Self {
        Self {
            uid: uid.to_string(),
            kind,
        }
    }
}

/// One slot per key. The outer map lock is only held long enough to find the
/// slot, so unrelated machines never wait on each other.
#[derive(Default)]
struct KeyedInstants {
    slots: Mutex<HashMap<CommandKey, Arc<Mutex<Option<Instant>>>>>,
}

impl KeyedInstants {
    fn slot(&self, key: &CommandKey) -> Arc<Mutex<Option<Instant>>> {
        let mut slots = self.slots.lock();
        slots.entry(key.clone()).or_default().clone()
    }

    fn peek(&self, key: &CommandKey) -> Option<Instant> {
        let slot = self.slots.lock().get(key).cloned();
        slot.and_then(|slot| *slot.lock())
    }
}

/// Self-imposed minimum interval between accepted calls for one key.
pub struct CooldownStore {
    window: Duration,
    entries: KeyedInstants,
}

impl CooldownStore {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: KeyedInstants::default(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Check-and-set under the key's lock: returns true and records `now`
    /// when the window has elapsed, false otherwise. Two racing callers for
    /// the same key can never both get true.
    pub fn try_acquire(&self, key: &CommandKey, now: Instant) -> bool {
        let slot = self.entries.slot(key);
        let mut last_accepted = slot.lock();

        match *last_accepted {
            Some(last) if now.saturating_duration_since(last) < self.window => false,
            _ => {
                *last_accepted = Some(now);
                true
            }
        }
    }

    pub fn last_accepted(&self, key: &CommandKey) -> Option<Instant> {
        self.entries.peek(key)
    }
}

/// Reactive suppression window entered after the bridge answers 429.
pub struct BackoffStore {
    duration: Duration,
    entries: KeyedInstants,
}

impl BackoffStore {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            entries: KeyedInstants::default(),
        }
    }

    pub fn block(&self, key: &CommandKey, now: Instant) -> Instant {
        let until = now + self.duration;
        let slot = self.entries.slot(key);
        let mut blocked_until = slot.lock();
        // Never shorten an existing window.
        let effective = match *blocked_until {
            Some(existing) if existing > until => existing,
            _ => until,
        };
        *blocked_until = Some(effective);
        effective
    }

    pub fn is_blocked(&self, key: &CommandKey, now: Instant) -> bool {
        matches!(self.entries.peek(key), Some(until) if now < until)
    }

    pub fn blocked_until(&self, key: &CommandKey) -> Option<Instant> {
        self.entries.peek(key)
    }
}
