//! Bounded in-memory map whose entries expire after a fixed time-to-live.
//!
//! Expiry is enforced lazily on every access; [`TtlCache::purge_expired`] additionally
//! reclaims entries that are never looked at again. When the capacity is exceeded the
//! oldest *insertion* is evicted, whatever its remaining lifetime.

use std::{
    collections::{BTreeMap, HashMap},
    hash::Hash,
    time::Duration,
};

use parking_lot::Mutex;
use tokio::time::Instant;

/// What a successful `get` does to an entry's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPolicy {
    /// Every successful read restarts the entry's TTL.
    Sliding,
    /// The TTL only counts from the last `set`.
    Fixed,
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
    seq: u64,
}

#[derive(Debug)]
struct Inner<K, V> {
    entries: HashMap<K, Entry<V>>,
    // insertion sequence -> key, oldest first
    order: BTreeMap<u64, K>,
    next_seq: u64,
}

#[derive(Debug)]
pub struct TtlCache<K, V> {
    inner: Mutex<Inner<K, V>>,
    ttl: Duration,
    capacity: usize,
    policy: ReadPolicy,
}

impl<K: Hash + Eq + Clone, V: Clone> TtlCache<K, V> {
    /// A capacity of zero is treated as one.
    pub fn new(ttl: Duration, capacity: usize, policy: ReadPolicy) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                next_seq: 0,
            }),
            ttl,
            capacity: capacity.max(1),
            policy,
        }
    }

    /// Insert or overwrite `key`, restarting its TTL.
    pub fn set(&self, key: K, value: V) {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        if let Some(old) = inner.entries.remove(&key) {
            inner.order.remove(&old.seq);
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.insert(seq, key.clone());
        inner.entries.insert(
            key,
            Entry {
                value,
                expires_at: now + self.ttl,
                seq,
            },
        );

        while inner.entries.len() > self.capacity {
            let Some((_, oldest)) = inner.order.pop_first() else {
                break;
            };
            inner.entries.remove(&oldest);
        }
    }

    /// Fetch a live value. Under [`ReadPolicy::Sliding`] this also extends its lifetime.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get_mut(key) {
            None => return None,
            Some(entry) if entry.expires_at <= now => true,
            Some(entry) => {
                if self.policy == ReadPolicy::Sliding {
                    entry.expires_at = now + self.ttl;
                }
                return Some(entry.value.clone());
            }
        };

        if expired {
            if let Some(entry) = inner.entries.remove(key) {
                inner.order.remove(&entry.seq);
            }
        }
        None
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let expired: Vec<(K, u64)> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, entry)| (key.clone(), entry.seq))
            .collect();

        for (key, seq) in &expired {
            inner.entries.remove(key);
            inner.order.remove(seq);
        }
        expired.len()
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn entry_count(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn values_expire_after_ttl() {
        let cache = TtlCache::new(TTL, 10, ReadPolicy::Sliding);
        cache.set("a", 1);
        assert_eq!(cache.get(&"a"), Some(1));

        advance(TTL + Duration::from_secs(1)).await;
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.entry_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sliding_reads_extend_lifetime() {
        let cache = TtlCache::new(TTL, 10, ReadPolicy::Sliding);
        cache.set("a", 1);

        advance(Duration::from_secs(45)).await;
        assert_eq!(cache.get(&"a"), Some(1));

        // past the original expiry, but within a TTL of the last read
        advance(Duration::from_secs(45)).await;
        assert_eq!(cache.get(&"a"), Some(1));

        advance(TTL).await;
        assert_eq!(cache.get(&"a"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_reads_do_not_extend_lifetime() {
        let cache = TtlCache::new(TTL, 10, ReadPolicy::Fixed);
        cache.set("a", 1);

        advance(Duration::from_secs(45)).await;
        assert_eq!(cache.get(&"a"), Some(1));

        advance(Duration::from_secs(45)).await;
        assert_eq!(cache.get(&"a"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn set_overwrites_and_restarts_ttl() {
        let cache = TtlCache::new(TTL, 10, ReadPolicy::Fixed);
        cache.set("a", 1);
        advance(Duration::from_secs(45)).await;
        cache.set("a", 2);
        advance(Duration::from_secs(45)).await;

        assert_eq!(cache.get(&"a"), Some(2));
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn capacity_evicts_oldest_insertion() {
        let cache = TtlCache::new(TTL, 2, ReadPolicy::Sliding);
        cache.set("a", 1);
        cache.set("b", 2);
        // reading does not count as an insertion
        assert_eq!(cache.get(&"a"), Some(1));
        cache.set("c", 3);

        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.get(&"b"), Some(2));
        assert_eq!(cache.get(&"c"), Some(3));
    }

    #[test]
    fn overwriting_moves_key_to_newest() {
        let cache = TtlCache::new(TTL, 2, ReadPolicy::Sliding);
        cache.set("a", 1);
        cache.set("b", 2);
        cache.set("a", 10);
        cache.set("c", 3);

        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.get(&"a"), Some(10));
        assert_eq!(cache.entry_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_removes_only_expired_entries() {
        let cache = TtlCache::new(TTL, 10, ReadPolicy::Fixed);
        cache.set("old", 1);
        advance(Duration::from_secs(30)).await;
        cache.set("new", 2);
        advance(Duration::from_secs(31)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.entry_count(), 1);
        assert_eq!(cache.get(&"new"), Some(2));
        assert_eq!(cache.purge_expired(), 0);
    }
}
