use std::{
    sync::{Arc, PoisonError},
    time::Duration,
};

use tokio::time::{self, Instant};
use tracing::{info, warn};

use crate::{bucket::BucketState, policy::RateConfig, store::BucketStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    /// `retry_after` is a hint; other callers on the same key may still drain
    /// the bucket first.
    Rejected { retry_after: Duration },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// Per-identity admission control for the whole process.
///
/// Each key gets its own bucket, created from the [`RateConfig`] passed on its
/// first call. Later calls with another config for the same key keep the
/// original one until the bucket is evicted.
pub struct Limiter {
    store: BucketStore,
}

impl Limiter {
    pub fn new(max_buckets: usize) -> Self {
        Self::with_store(BucketStore::new(max_buckets))
    }

    pub fn with_store(store: BucketStore) -> Self {
        Self { store }
    }

    /// Wraps `limiter` in an `Arc` and spawns a task purging stale buckets
    /// every `sweep_every`. Must be called from within a tokio runtime.
    ///
    /// A zero `sweep_every` spawns nothing; stale buckets then only go when
    /// the store fills up.
    pub fn init(limiter: Limiter, sweep_every: Duration) -> Arc<Self> {
        let shared_state = Arc::new(limiter);
        if sweep_every.is_zero() {
            warn!("zero sweep interval, background purge disabled");
            return shared_state;
        }

        let state = shared_state.clone();
        tokio::spawn(async move {
            let mut interval = time::interval(sweep_every);
            // the first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                state.purge();
            }
        });

        shared_state
    }

    pub fn allow(&self, key: &str, cfg: &RateConfig) -> bool {
        self.allow_at(key, cfg, Instant::now())
    }

    pub fn allow_at(&self, key: &str, cfg: &RateConfig, now: Instant) -> bool {
        self.check_at(key, cfg, now).is_allowed()
    }

    pub fn check(&self, key: &str, cfg: &RateConfig) -> Decision {
        self.check_at(key, cfg, Instant::now())
    }

    pub fn check_at(&self, key: &str, cfg: &RateConfig, now: Instant) -> Decision {
        // store lock is released here, before the bucket lock is taken
        let bucket = self.store.get_or_insert(key, cfg, now);
        let mut bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);

        if bucket.consume(now) {
            return Decision::Allowed;
        }

        Decision::Rejected {
            retry_after: bucket.retry_after(now),
        }
    }

    /// Drops every stale bucket. Returns how many went.
    pub fn purge(&self) -> usize {
        let purged = self.store.sweep(Instant::now());
        if purged > 0 {
            info!(purged, remaining = self.store.len(), "purged stale buckets");
        }

        purged
    }

    pub fn store(&self) -> &BucketStore {
        &self.store
    }

    /// Whether `key` is currently serving a cooldown penalty.
    pub fn is_cooling_down(&self, key: &str) -> bool {
        self.store.get(key).is_some_and(|bucket| {
            let bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
            bucket.state(Instant::now()) == BucketState::CoolingDown
        })
    }
}
