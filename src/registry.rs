//! Registry of currently registered client names.
//!
//! Membership only: an entry exists from a successful salute until the
//! matching bye or until its connection fails. A single lock guards the
//! whole set; every operation is brief and never held across I/O.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::trace;

/// Thread-safe set of registered client names.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Mutex<HashSet<String>>,
}

impl ClientRegistry {
    /// Create an empty registry, shared between connection handlers.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        // A panicked holder cannot leave a set half-updated.
        self.clients.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Check whether `name` is registered.
    pub fn exists(&self, name: &str) -> bool {
        self.lock().contains(name)
    }

    /// Register `name`. Re-adding an existing name is a no-op.
    pub fn add(&self, name: &str) {
        let inserted = self.lock().insert(name.to_string());
        trace!(name, inserted, "Registry add");
    }

    /// Register `name` unless it is already present.
    ///
    /// Returns `false` when the name was taken. Check and insert happen under
    /// one lock acquisition, so two concurrent salutes cannot both succeed.
    pub fn try_add(&self, name: &str) -> bool {
        let inserted = self.lock().insert(name.to_string());
        trace!(name, inserted, "Registry try_add");
        inserted
    }

    /// Remove `name`. Removing a non-member is a no-op.
    pub fn delete(&self, name: &str) {
        let removed = self.lock().remove(name);
        trace!(name, removed, "Registry delete");
    }

    /// Snapshot of registered names, unordered.
    pub fn keys(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    /// Number of registered names.
    pub fn size(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_add_delete() {
        let registry = ClientRegistry::new();
        let before = registry.size();

        registry.add("ana");
        assert!(registry.exists("ana"));
        assert_eq!(registry.size(), before + 1);

        registry.delete("ana");
        assert!(!registry.exists("ana"));
        assert_eq!(registry.size(), before);
    }

    #[test]
    fn test_add_is_idempotent() {
        let registry = ClientRegistry::new();
        registry.add("ana");
        registry.add("ana");
        assert_eq!(registry.size(), 1);
    }

    #[test]
    fn test_try_add() {
        let registry = ClientRegistry::new();
        assert!(registry.try_add("ana"));
        assert!(!registry.try_add("ana"));
        assert_eq!(registry.size(), 1);
    }

    #[test]
    fn test_delete_missing() {
        let registry = ClientRegistry::new();
        registry.delete("ghost");
        assert_eq!(registry.size(), 0);
    }

    #[test]
    fn test_keys_snapshot() {
        let registry = ClientRegistry::new();
        registry.add("ana");
        registry.add("bob");

        let mut keys = registry.keys();
        keys.sort();
        assert_eq!(keys, vec!["ana".to_string(), "bob".to_string()]);

        // Later mutation does not affect the snapshot
        registry.delete("ana");
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_concurrent_adds() {
        let registry = ClientRegistry::new();
        let threads = 8;
        let per_thread = 250;

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for i in 0..per_thread {
                        registry.add(&format!("client-{t}-{i}"));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.size(), threads * per_thread);
    }

    #[test]
    fn test_concurrent_try_add_single_winner() {
        let registry = ClientRegistry::new();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.try_add("same"))
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(registry.size(), 1);
    }
}
