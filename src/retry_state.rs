//! Concurrent retry-state map keyed by message identity.
//!
//! An entry exists iff a message is mid-retry. `get_or_create` and `delete`
//! are atomic with respect to each other; mutations on a single entry are
//! serialized through that entry's own lock so the map lock is never held
//! while a handler runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::retry::RetryState;

/// Builds the `"<topic>-<partition>-<offset>"` key identifying a message.
pub fn message_key(topic: &str, partition: i32, offset: i64) -> String {
    format!("{}-{}-{}", topic, partition, offset)
}

/// Concurrent map from message key to its in-flight [`RetryState`].
#[derive(Debug, Default)]
pub struct RetryStateTable {
    entries: Mutex<HashMap<String, Arc<Mutex<RetryState>>>>,
}

impl RetryStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the existing entry for `key`, or atomically creates and
    /// inserts a fresh one. Concurrent callers racing on the same `key` are
    /// guaranteed to observe the same `Arc`.
    pub fn get_or_create(&self, key: &str) -> Arc<Mutex<RetryState>> {
        let mut entries = self.entries.lock().expect("retry state map poisoned");
        entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(RetryState::new())))
            .clone()
    }

    /// Removes the entry for `key`. Called on terminal outcomes (handler
    /// success or DLQ acceptance) so no state leaks past a message's
    /// lifetime.
    pub fn delete(&self, key: &str) {
        self.entries
            .lock()
            .expect("retry state map poisoned")
            .remove(key);
    }

    /// Number of messages currently mid-retry. Exposed for tests and metrics.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("retry state map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_message_key_shape() {
        assert_eq!(message_key("orders", 2, 42), "orders-2-42");
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let table = RetryStateTable::new();
        let key = message_key("orders", 0, 1);

        let a = table.get_or_create(&key);
        let b = table.get_or_create(&key);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_delete_removes_entry() {
        let table = RetryStateTable::new();
        let key = message_key("orders", 0, 1);
        table.get_or_create(&key);
        assert_eq!(table.len(), 1);
        table.delete(&key);
        assert!(table.is_empty());
    }

    #[test]
    fn test_concurrent_get_or_create_same_instance() {
        let table = Arc::new(RetryStateTable::new());
        let key = message_key("orders", 0, 7);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                let key = key.clone();
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(1));
                    table.get_or_create(&key)
                })
            })
            .collect();

        let first = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .reduce(|a, b| {
                assert!(Arc::ptr_eq(&a, &b));
                b
            });
        assert!(first.is_some());
        assert_eq!(table.len(), 1);
    }
}
