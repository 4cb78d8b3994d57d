//! TTL-bound idempotency keys.
//!
//! `execute` runs an action at most once per key within the TTL, however
//! many duplicate triggers race for it.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

pub struct IdempotencyStore {
    entries: DashMap<String, Instant>,
    ttl: Duration,
}

impl IdempotencyStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Run `action` if the key is unseen or expired. Returns whether it ran.
    ///
    /// The key is claimed before the action runs, so a racing duplicate
    /// observes the claim even while the action is still executing.
    pub fn execute<F: FnOnce()>(&self, key: &str, action: F) -> bool {
        let now = Instant::now();
        let claimed = match self.entries.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
            Entry::Occupied(mut slot) => {
                if now.duration_since(*slot.get()) >= self.ttl {
                    slot.insert(now);
                    true
                } else {
                    false
                }
            }
        };

        if claimed {
            action();
        }
        claimed
    }

    /// Drop expired keys. Callers decide the sweep cadence.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries
            .retain(|_, claimed_at| now.duration_since(*claimed_at) < self.ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn action_runs_once_per_key() {
        let store = IdempotencyStore::new(Duration::from_secs(60));
        let count = AtomicUsize::new(0);

        assert!(store.execute("c-1:optout", || {
            count.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(!store.execute("c-1:optout", || {
            count.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn distinct_keys_are_independent() {
        let store = IdempotencyStore::new(Duration::from_secs(60));
        assert!(store.execute("c-1:optout", || {}));
        assert!(store.execute("c-2:optout", || {}));
    }

    #[test]
    fn expired_key_runs_again() {
        let store = IdempotencyStore::new(Duration::from_millis(10));
        assert!(store.execute("k", || {}));
        std::thread::sleep(Duration::from_millis(20));
        assert!(store.execute("k", || {}));
    }

    #[test]
    fn purge_drops_only_expired() {
        let store = IdempotencyStore::new(Duration::from_millis(30));
        store.execute("old", || {});
        std::thread::sleep(Duration::from_millis(40));
        store.execute("new", || {});
        store.purge_expired();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn concurrent_duplicates_run_once() {
        let store = Arc::new(IdempotencyStore::new(Duration::from_secs(60)));
        let count = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let count = count.clone();
                std::thread::spawn(move || {
                    store.execute("same-key", || {
                        count.fetch_add(1, Ordering::SeqCst);
                    });
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
