use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::time::Instant;
use tracing::debug;

use crate::{bucket::Bucket, policy::RateConfig};

/// Buckets untouched for this long may be evicted.
pub const STALE_AFTER: Duration = Duration::from_secs(30 * 60);

pub type SharedBucket = Arc<Mutex<Bucket>>;

/// Identity key to bucket mapping, kept near `max_buckets` by evicting stale
/// entries.
///
/// The map lock only covers lookup, insertion and eviction. Each bucket sits
/// behind its own lock so callers for different keys don't serialize on the
/// refill math.
pub struct BucketStore {
    max_buckets: usize,
    stale_after: Duration,
    inner: Mutex<HashMap<String, SharedBucket>>,
}

impl BucketStore {
    pub fn new(max_buckets: usize) -> Self {
        Self {
            max_buckets,
            stale_after: STALE_AFTER,
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Returns the bucket for `key`, creating it from `cfg` on first use.
    ///
    /// A new key arriving at a full store first evicts stale buckets, oldest
    /// first, until there is room. With nothing stale the store grows past
    /// `max_buckets` by the newcomer.
    ///
    /// The returned handle outlives the map lock. If eviction drops the key
    /// while a caller still holds its handle, that caller consumes from the
    /// detached bucket and the next caller starts a fresh, full one, so a
    /// key can see `capacity + 1` admissions around an eviction. Only stale
    /// buckets are evicted, so this needs a key idle for `stale_after`.
    pub fn get_or_insert(&self, key: &str, cfg: &RateConfig, now: Instant) -> SharedBucket {
        let mut buckets = self.lock();

        if let Some(bucket) = buckets.get(key) {
            return bucket.clone();
        }

        if buckets.len() >= self.max_buckets {
            let evicted = self.evict_oldest(&mut buckets, now);
            debug!(evicted, remaining = buckets.len(), "store full, evicted stale buckets");
        }

        debug!(key, rate = cfg.rate, capacity = cfg.capacity, "new bucket");
        let bucket = Arc::new(Mutex::new(Bucket::new(cfg, now)));
        buckets.insert(key.to_string(), bucket.clone());
        bucket
    }

    /// Drops every stale bucket, whatever the store size.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut buckets = self.lock();
        let before = buckets.len();
        buckets.retain(|_, bucket| !self.is_stale(bucket, now));

        before - buckets.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub(crate) fn get(&self, key: &str) -> Option<SharedBucket> {
        self.lock().get(key).cloned()
    }

    fn evict_oldest(&self, buckets: &mut HashMap<String, SharedBucket>, now: Instant) -> usize {
        let mut stale: Vec<(Instant, String)> = buckets
            .iter()
            .filter_map(|(key, bucket)| {
                let last = last_accessed(bucket);
                (now.saturating_duration_since(last) >= self.stale_after)
                    .then(|| (last, key.clone()))
            })
            .collect();
        stale.sort();

        let mut evicted = 0;
        for (_, key) in stale {
            if buckets.len() < self.max_buckets {
                break;
            }
            buckets.remove(&key);
            evicted += 1;
        }

        evicted
    }

    fn is_stale(&self, bucket: &SharedBucket, now: Instant) -> bool {
        now.saturating_duration_since(last_accessed(bucket)) >= self.stale_after
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SharedBucket>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn last_accessed(bucket: &SharedBucket) -> Instant {
    bucket
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .last_accessed()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CFG: RateConfig = RateConfig::ANONYMOUS;

    #[test]
    fn creates_lazily_and_reuses() {
        let store = BucketStore::new(10);
        let now = Instant::now();
        assert!(store.is_empty());

        let a = store.get_or_insert("a", &CFG, now);
        let again = store.get_or_insert("a", &RateConfig::AUTHENTICATED, now);
        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn full_store_evicts_stale_to_make_room() {
        let store = BucketStore::new(2);
        let start = Instant::now();
        store.get_or_insert("user1", &CFG, start);
        store.get_or_insert("user2", &CFG, start);

        let later = start + STALE_AFTER + Duration::from_secs(60);
        store.get_or_insert("user3", &CFG, later);

        assert!(store.contains("user3"));
        assert!(store.len() <= 2);
    }

    #[test]
    fn eviction_removes_oldest_first() {
        let store = BucketStore::new(3);
        let start = Instant::now();
        store.get_or_insert("oldest", &CFG, start);
        store.get_or_insert("older", &CFG, start + Duration::from_secs(10));
        store.get_or_insert("fresh", &CFG, start + STALE_AFTER);

        store.get_or_insert("new", &CFG, start + STALE_AFTER + Duration::from_secs(20));

        assert!(!store.contains("oldest"));
        assert!(store.contains("older"));
        assert!(store.contains("fresh"));
        assert!(store.contains("new"));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn nothing_stale_allows_one_over() {
        let store = BucketStore::new(2);
        let now = Instant::now();
        store.get_or_insert("a", &CFG, now);
        store.get_or_insert("b", &CFG, now);
        store.get_or_insert("c", &CFG, now + Duration::from_secs(1));

        assert_eq!(store.len(), 3);
        assert!(store.contains("a") && store.contains("b") && store.contains("c"));
    }

    #[test]
    fn existing_key_never_triggers_eviction() {
        let store = BucketStore::new(1);
        let start = Instant::now();
        store.get_or_insert("only", &CFG, start);

        store.get_or_insert("only", &CFG, start + STALE_AFTER * 2);
        assert!(store.contains("only"));
    }

    #[test]
    fn sweep_drops_all_stale() {
        let store = BucketStore::new(100).with_stale_after(Duration::from_secs(5));
        let start = Instant::now();
        store.get_or_insert("a", &CFG, start);
        store.get_or_insert("b", &CFG, start);
        store.get_or_insert("c", &CFG, start + Duration::from_secs(4));

        assert_eq!(store.sweep(start + Duration::from_secs(6)), 2);
        assert!(store.contains("c"));
        assert_eq!(store.sweep(start + Duration::from_secs(6)), 0);
    }

    #[test]
    fn evicted_handle_is_detached_from_the_store() {
        let store = BucketStore::new(100).with_stale_after(Duration::from_secs(5));
        let start = Instant::now();
        let held = store.get_or_insert("k", &CFG, start);

        let later = start + Duration::from_secs(10);
        assert_eq!(store.sweep(later), 1);

        let fresh = store.get_or_insert("k", &CFG, later);
        assert!(!Arc::ptr_eq(&held, &fresh));

        // both the held and the fresh bucket still admit
        assert!(held.lock().unwrap().consume(later));
        assert!(fresh.lock().unwrap().consume(later));
        assert_eq!(fresh.lock().unwrap().tokens(), CFG.capacity - 1.0);
    }
}
