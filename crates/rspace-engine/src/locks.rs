//! Per-channel-group and per-channel mutual exclusion, per `spec.md` §4.3.

use std::sync::Arc;

use dashmap::DashMap;
use rspace_types::CausalDigest;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Striped lock keyed by the per-channel digest of a single channel.
///
/// A produce on channel `c` always locks `digest(c)`. A consume on channel
/// sequence `[c0, .., cn]` locks `digest(c0), .., digest(cn)` (one stripe
/// per member channel, via [`LockManager::acquire_many`]), so a produce on
/// `c` and a consume whose sequence contains `c` both take the stripe for
/// `digest(c)` and serialize against each other. Unrelated channels each
/// get their own stripe and never contend.
pub struct LockManager {
    stripes: DashMap<CausalDigest, Arc<Mutex<()>>>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    /// Create an empty lock manager.
    pub fn new() -> Self {
        Self { stripes: DashMap::new() }
    }

    /// Acquire the lock for `key`, returning an owned RAII guard that
    /// releases on drop regardless of the exit path (including a panic
    /// unwinding through a matcher callback), satisfying `spec.md` §5's
    /// scoped-acquisition requirement.
    pub async fn acquire(&self, key: CausalDigest) -> OwnedMutexGuard<()> {
        let mutex = self
            .stripes
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    /// Acquire the lock for every key in `keys`, deduplicated and sorted
    /// into a canonical order before acquisition so that two calls racing
    /// over overlapping key sets always take their shared stripes in the
    /// same order, avoiding a lock-order-inversion deadlock. The returned
    /// guards must be held for the whole critical section; dropping them
    /// releases every stripe.
    pub async fn acquire_many(&self, keys: &[CausalDigest]) -> Vec<OwnedMutexGuard<()>> {
        let mut sorted = keys.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let mut guards = Vec::with_capacity(sorted.len());
        for key in sorted {
            guards.push(self.acquire(key).await);
        }
        guards
    }

    /// Number of distinct keys ever locked, mainly for tests/metrics. Keys
    /// are never evicted; a long-running instance with unbounded distinct
    /// channel sets will grow this table unboundedly (see `DESIGN.md`).
    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_key_serializes() {
        let locks = LockManager::new();
        let key = [1u8; 32];
        let guard = locks.acquire(key).await;
        assert_eq!(locks.stripe_count(), 1);
        drop(guard);
        let _guard2 = locks.acquire(key).await;
        assert_eq!(locks.stripe_count(), 1);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_share_a_stripe() {
        let locks = LockManager::new();
        let _g1 = locks.acquire([1u8; 32]).await;
        let _g2 = locks.acquire([2u8; 32]).await;
        assert_eq!(locks.stripe_count(), 2);
    }

    #[tokio::test]
    async fn acquire_many_dedups_and_shares_stripes_with_acquire() {
        let locks = LockManager::new();
        let guards = locks.acquire_many(&[[1u8; 32], [2u8; 32], [1u8; 32]]).await;
        assert_eq!(guards.len(), 2);
        assert_eq!(locks.stripe_count(), 2);
        drop(guards);

        // A single acquire() on a key already covered by a prior
        // acquire_many() call contends for the same stripe, not a new one.
        let _g = locks.acquire([1u8; 32]).await;
        assert_eq!(locks.stripe_count(), 2);
    }
}
