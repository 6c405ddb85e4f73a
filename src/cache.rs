//! Time-bounded response cache.
//!
//! Entries are stored in a capacity-bounded moka cache and stamped with their
//! insertion instant. Expiry is decided lazily on read against the configured
//! TTL, so an entry written at `t` is served for reads strictly before
//! `t + ttl` and dropped by the first read at or after it.

use moka::future::Cache;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of "now" for expiry checks.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Clone, Debug)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

pub struct TtlCache<V> {
    entries: Cache<String, CacheEntry<V>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        Self::with_clock(ttl, max_capacity, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, max_capacity: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Cache::builder().max_capacity(max_capacity).build(),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_fresh(&self, entry: &CacheEntry<V>) -> bool {
        self.clock.now().saturating_duration_since(entry.inserted_at) < self.ttl
    }

    /// Returns the value stored under `key` unless it is missing or expired.
    /// Expired entries are removed.
    pub async fn get(&self, key: &str) -> Option<V> {
        let entry = self.entries.get(key).await?;
        if self.is_fresh(&entry) {
            return Some(entry.value);
        }

        self.entries.invalidate(key).await;
        None
    }

    /// Inserts or replaces the entry for `key`, stamping it with the current time.
    pub async fn set(&self, key: impl Into<String>, value: V) {
        let entry = CacheEntry {
            value,
            inserted_at: self.clock.now(),
        };
        self.entries.insert(key.into(), entry).await;
    }

    pub fn clear(&self) {
        self.entries.invalidate_all();
    }

    /// Returns the fresh value for `key`, or runs `init` to produce one.
    ///
    /// Concurrent callers missing on the same key share a single `init` run and
    /// all observe its outcome. Errors are handed to every waiter and nothing is
    /// stored. If the loading caller is dropped, a remaining waiter takes over.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: &str, init: F) -> Result<V, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: Clone + Send + Sync + 'static,
    {
        loop {
            if let Some(value) = self.get(key).await {
                return Ok(value);
            }

            let clock = Arc::clone(&self.clock);
            let loaded_here = AtomicBool::new(false);
            let load = async {
                let value = init().await?;
                loaded_here.store(true, Ordering::Release);
                Ok::<_, E>(CacheEntry {
                    value,
                    inserted_at: clock.now(),
                })
            };

            let entry = self
                .entries
                .try_get_with_by_ref(key, load)
                .await
                .map_err(|e: Arc<E>| (*e).clone())?;

            // A value this call just loaded is returned even when the TTL
            // is shorter than the time since its stamp.
            if loaded_here.load(Ordering::Acquire) || self.is_fresh(&entry) {
                return Ok(entry.value);
            }
            // Raced with an entry that expired between the two lookups.
            self.entries.invalidate(key).await;
        }
    }
}

#[cfg(test)]
pub(crate) mod test_clock {
    use super::Clock;
    use parking_lot::Mutex;
    use std::time::{Duration, Instant};

    /// Clock that only moves when told to.
    pub struct ManualClock {
        base: Instant,
        offset: Mutex<Duration>,
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self {
                base: Instant::now(),
                offset: Mutex::new(Duration::ZERO),
            }
        }

        pub fn advance(&self, by: Duration) {
            *self.offset.lock() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.base + *self.offset.lock()
        }
    }
}
