//! Time-bounded memoization for analysis results
//!
//! Analyses are pure reads, so a caller may reuse a recent result instead of
//! recomputing it. The cache never computes under its lock and never stores
//! errors.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Suggested lifetime for abandoned-session listings
pub const ABANDONED_TTL: Duration = Duration::from_secs(60);

/// Memoizes values by key for a fixed time-to-live
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, (Instant, V)>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh cached value, if any
    pub fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.lock();
        entries
            .get(key)
            .filter(|(stored, _)| stored.elapsed() < self.ttl)
            .map(|(_, v)| v.clone())
    }

    /// Cached value, or the result of `compute` which is stored on success
    pub fn get_or_try_insert_with<E, F>(&self, key: K, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(hit) = self.get(&key) {
            return Ok(hit);
        }
        let value = compute()?;
        let mut entries = self.entries.lock();
        let ttl = self.ttl;
        entries.retain(|_, (stored, _)| stored.elapsed() < ttl);
        entries.insert(key, (Instant::now(), value.clone()));
        Ok(value)
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.lock().remove(key);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_hit_within_ttl() {
        let cache: TtlCache<&str, u32> = TtlCache::new(Duration::from_secs(60));
        let calls = Cell::new(0);
        let compute = || {
            calls.set(calls.get() + 1);
            Ok::<_, ()>(7)
        };
        assert_eq!(cache.get_or_try_insert_with("k", compute), Ok(7));
        assert_eq!(cache.get_or_try_insert_with("k", compute), Ok(7));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_zero_ttl_always_recomputes() {
        let cache: TtlCache<&str, u32> = TtlCache::new(Duration::ZERO);
        let calls = Cell::new(0);
        for _ in 0..3 {
            let _ = cache.get_or_try_insert_with("k", || {
                calls.set(calls.get() + 1);
                Ok::<_, ()>(1)
            });
        }
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_errors_are_not_cached() {
        let cache: TtlCache<u8, u8> = TtlCache::new(Duration::from_secs(60));
        assert_eq!(cache.get_or_try_insert_with(1, || Err("down")), Err("down"));
        assert!(cache.is_empty());
        assert_eq!(cache.get_or_try_insert_with(1, || Ok::<_, &str>(2)), Ok(2));
    }

    #[test]
    fn test_invalidate() {
        let cache: TtlCache<u8, u8> = TtlCache::new(Duration::from_secs(60));
        let _ = cache.get_or_try_insert_with(1, || Ok::<_, ()>(1));
        cache.invalidate(&1);
        assert_eq!(cache.get(&1), None);
    }
}
