//! Expiring key-value store.
//!
//! One `RwLock`-guarded map is the only shared mutable state in the
//! server. Readers proceed concurrently; any mutation is exclusive. Both
//! expiry mechanisms funnel through that same lock:
//!
//! 1. **Lazy expiry**: `get` checks the entry's deadline under the read
//!    lock and, for a dead entry, re-checks and removes it under the
//!    write lock. A `set` that lands between the two acquisitions wins.
//! 2. **Active sweep**: `sweep_expired` removes every dead entry under
//!    the write lock. Driven on a timer by the reaper task.
//!
//! No operation holds the lock across I/O or an await point.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// A stored value with an optional expiration deadline.
#[derive(Debug, Clone)]
pub struct Entry {
    /// The stored payload.
    pub value: Bytes,
    /// Absolute deadline after which the entry is dead. None never expires.
    pub expires_at: Option<Instant>,
}

impl Entry {
    /// Creates an entry that never expires.
    pub fn new(value: Bytes) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    /// Creates an entry that expires `ttl` from now.
    ///
    /// A deadline the monotonic clock cannot represent means the entry
    /// never expires.
    pub fn with_ttl(value: Bytes, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now().checked_add(ttl),
        }
    }

    /// True once the deadline has been reached.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }
}

/// The shared key-value map.
///
/// Constructed once at startup, wrapped in an `Arc`, and handed to every
/// connection task and to the reaper. All access goes through these
/// methods; nothing else touches the map.
///
/// # Example
///
/// ```
/// use emberkv::storage::Store;
/// use bytes::Bytes;
/// use std::time::Duration;
///
/// let store = Store::new();
///
/// store.set(Bytes::from("name"), Bytes::from("ember"));
/// assert_eq!(store.get(&Bytes::from("name")), Some(Bytes::from("ember")));
///
/// store.set_with_ttl(Bytes::from("session"), Bytes::from("tok"), Duration::from_secs(60));
/// ```
#[derive(Debug, Default)]
pub struct Store {
    map: RwLock<HashMap<Bytes, Entry>>,
}

impl Store {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }

    /// Inserts or overwrites a key with no expiration.
    ///
    /// Overwriting always installs a fresh entry, so any deadline the old
    /// entry carried is gone.
    pub fn set(&self, key: Bytes, value: Bytes) {
        let mut map = self.map.write().unwrap();
        map.insert(key, Entry::new(value));
    }

    /// Inserts or overwrites a key that expires `ttl` from now.
    pub fn set_with_ttl(&self, key: Bytes, value: Bytes, ttl: Duration) {
        let mut map = self.map.write().unwrap();
        map.insert(key, Entry::with_ttl(value, ttl));
    }

    /// Returns the live value for a key.
    ///
    /// An entry at or past its deadline is removed as a side effect and
    /// reported as absent. The removal re-checks under the write lock, so
    /// a concurrent `set` is never clobbered: whichever of the two
    /// acquisitions lands second decides.
    pub fn get(&self, key: &Bytes) -> Option<Bytes> {
        {
            let map = self.map.read().unwrap();
            match map.get(key) {
                Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Dead on the read path. Re-check under the write lock before
        // removing: the entry may have been replaced or already reaped.
        let mut map = self.map.write().unwrap();
        match map.get(key) {
            Some(entry) if entry.is_expired() => {
                map.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    /// Removes a key.
    ///
    /// Returns true only if the key held a live entry immediately before
    /// the call. A present-but-expired entry is removed too, but counts
    /// as absent.
    pub fn delete(&self, key: &Bytes) -> bool {
        let mut map = self.map.write().unwrap();
        match map.remove(key) {
            Some(entry) => !entry.is_expired(),
            None => false,
        }
    }

    /// Number of resident entries, counting expired ones not yet removed.
    pub fn len(&self) -> usize {
        self.map.read().unwrap().len()
    }

    /// True if no entries are resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every entry at or past its deadline.
    ///
    /// Returns how many were removed. Called by the reaper each tick.
    pub fn sweep_expired(&self) -> usize {
        let mut map = self.map.write().unwrap();
        let before = map.len();
        map.retain(|_, entry| !entry.is_expired());
        before - map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn test_set_and_get() {
        let store = Store::new();
        store.set(b("key"), b("value"));
        assert_eq!(store.get(&b("key")), Some(b("value")));
    }

    #[test]
    fn test_get_missing() {
        let store = Store::new();
        assert_eq!(store.get(&b("missing")), None);
    }

    #[test]
    fn test_set_overwrites() {
        let store = Store::new();
        store.set(b("key"), b("one"));
        store.set(b("key"), b("two"));
        assert_eq!(store.get(&b("key")), Some(b("two")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_delete() {
        let store = Store::new();
        store.set(b("key"), b("value"));

        assert!(store.delete(&b("key")));
        assert_eq!(store.get(&b("key")), None);
        assert!(!store.delete(&b("key")));
    }

    #[test]
    fn test_ttl_expiry_on_get() {
        let store = Store::new();
        store.set_with_ttl(b("key"), b("value"), Duration::from_millis(30));

        assert_eq!(store.get(&b("key")), Some(b("value")));

        std::thread::sleep(Duration::from_millis(80));

        // The lazy check removes the entry, not just hides it.
        assert_eq!(store.get(&b("key")), None);
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_overwrite_clears_ttl() {
        let store = Store::new();
        store.set_with_ttl(b("key"), b("old"), Duration::from_millis(30));
        store.set(b("key"), b("new"));

        std::thread::sleep(Duration::from_millis(80));

        assert_eq!(store.get(&b("key")), Some(b("new")));
    }

    #[test]
    fn test_delete_expired_counts_as_absent() {
        let store = Store::new();
        store.set_with_ttl(b("key"), b("value"), Duration::from_millis(10));

        std::thread::sleep(Duration::from_millis(50));

        assert!(!store.delete(&b("key")));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_entry_without_deadline_never_expires() {
        let entry = Entry::new(b("v"));
        assert!(!entry.is_expired());

        let expired = Entry::with_ttl(b("v"), Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(expired.is_expired());
    }

    #[test]
    fn test_ttl_beyond_clock_range_never_expires() {
        // A deadline past the end of the monotonic clock saturates to
        // "no deadline" instead of panicking in the arithmetic.
        let entry = Entry::with_ttl(b("v"), Duration::from_secs(u64::MAX));
        assert_eq!(entry.expires_at, None);
        assert!(!entry.is_expired());

        let store = Store::new();
        store.set_with_ttl(b("key"), b("value"), Duration::from_secs(u64::MAX));

        assert_eq!(store.get(&b("key")), Some(b("value")));
        assert_eq!(store.sweep_expired(), 0);
        assert!(store.delete(&b("key")));
    }

    #[test]
    fn test_sweep_expired() {
        let store = Store::new();
        store.set_with_ttl(b("a"), b("1"), Duration::from_millis(10));
        store.set_with_ttl(b("b"), b("2"), Duration::from_millis(10));
        store.set(b("c"), b("3"));

        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(store.sweep_expired(), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&b("c")), Some(b("3")));
    }

    #[test]
    fn test_sweep_empty_store() {
        let store = Store::new();
        assert_eq!(store.sweep_expired(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(Store::new());
        let mut handles = vec![];

        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for j in 0..200 {
                    let key = b(&format!("key-{}-{}", i, j));
                    store.set(key.clone(), b("value"));
                    assert_eq!(store.get(&key), Some(b("value")));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.len(), 1600);
    }

    #[test]
    fn test_concurrent_overlapping_keys() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(Store::new());
        let mut handles = vec![];

        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    let key = b(&format!("shared-{}", j % 10));
                    match (i + j) % 3 {
                        0 => store.set(key, b("x")),
                        1 => {
                            if let Some(v) = store.get(&key) {
                                assert_eq!(v, b("x"));
                            }
                        }
                        _ => {
                            store.delete(&key);
                        }
                    }
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        // Whatever interleaving happened, every resident value is one
        // that some writer actually wrote.
        for j in 0..10 {
            if let Some(v) = store.get(&b(&format!("shared-{}", j))) {
                assert_eq!(v, b("x"));
            }
        }
    }
}
