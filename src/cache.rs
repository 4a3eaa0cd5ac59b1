//! Bounded TTL cache shared by the pipeline stages.
//!
//! Entries expire lazily on read. When the entry count exceeds capacity the
//! oldest-inserted entries are evicted first; overwriting a key keeps its
//! original insertion position.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    expires_at: Instant,
    seq: u64,
}

struct Inner<K, V> {
    entries: HashMap<K, Entry<V>>,
    /// Insertion order. May hold stale `(key, seq)` pairs for removed keys.
    order: VecDeque<(K, u64)>,
    next_seq: u64,
}

/// Thread-safe key/value cache with per-entry expiry and a capacity bound.
pub struct TtlCache<K, V> {
    capacity: usize,
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                next_seq: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K, V>> {
        // A panic while holding the lock cannot leave entries half-written.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Get a live value. An expired entry is removed and reported as absent.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.lock();
        let expired = match inner.entries.get(key) {
            Some(entry) if Instant::now() < entry.expires_at => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.entries.remove(key);
        }
        None
    }

    /// Insert or overwrite a value. May evict unrelated keys: expired
    /// entries first, then the oldest inserted.
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        let now = Instant::now();
        let expires_at = now.checked_add(ttl).unwrap_or(now + Duration::from_secs(86_400 * 365));
        let mut inner = self.lock();

        if let Some(entry) = inner.entries.get_mut(&key) {
            entry.value = value;
            entry.expires_at = expires_at;
            return;
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.push_back((key.clone(), seq));
        inner.entries.insert(
            key,
            Entry {
                value,
                expires_at,
                seq,
            },
        );

        if inner.entries.len() > self.capacity {
            Self::drop_expired(&mut inner, now);
        }
        while inner.entries.len() > self.capacity {
            let Some((oldest, seq)) = inner.order.pop_front() else {
                break;
            };
            if inner.entries.get(&oldest).is_some_and(|e| e.seq == seq) {
                inner.entries.remove(&oldest);
            }
        }

        if inner.order.len() > self.capacity * 2 {
            Self::compact(&mut inner);
        }
    }

    /// Remove a key, returning its value if it was live.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.lock();
        let entry = inner.entries.remove(key)?;
        (Instant::now() < entry.expires_at).then_some(entry.value)
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn drop_expired(inner: &mut Inner<K, V>, now: Instant) {
        let before = inner.entries.len();
        inner.entries.retain(|_, e| now < e.expires_at);
        if inner.entries.len() < before {
            Self::compact(inner);
        }
    }

    fn compact(inner: &mut Inner<K, V>) {
        let Inner { entries, order, .. } = inner;
        order.retain(|(k, seq)| entries.get(k).is_some_and(|e| e.seq == *seq));
    }
}
