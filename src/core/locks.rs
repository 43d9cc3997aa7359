//! Per-wallet mutual exclusion
//!
//! Every balance-mutating operation holds the latch of each wallet it touches
//! from validation through commit. Latches live in a `DashMap` keyed by
//! wallet id, so contention is scoped to the wallets involved and unrelated
//! wallets proceed in parallel.
//!
//! Multi-wallet operations acquire their latches in ascending wallet-id order.
//! Two transfers X→Y and Y→X therefore both try X first, and one simply waits
//! for the other instead of deadlocking.
//!
//! A latch only stays in the map while some operation holds or waits on it.
//! The last holder to let go removes it, so requests for wallets that never
//! existed leave nothing behind.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use crate::types::{LedgerError, WalletId};

#[derive(Debug, Default)]
struct WalletLatch {
    held: Mutex<bool>,
    released: Condvar,
}

impl WalletLatch {
    /// Wait until the latch is free or `deadline` passes
    ///
    /// `None` waits without a deadline.
    fn acquire(&self, deadline: Option<Instant>) -> bool {
        let mut held = self.held.lock();
        while *held {
            match deadline {
                Some(deadline) => {
                    if self.released.wait_until(&mut held, deadline).timed_out() && *held {
                        return false;
                    }
                }
                None => self.released.wait(&mut held),
            }
        }
        *held = true;
        true
    }

    fn release(&self) {
        *self.held.lock() = false;
        self.released.notify_all();
    }
}

type LatchMap = DashMap<WalletId, Arc<WalletLatch>>;

/// Registry of wallet latches
#[derive(Debug, Default)]
pub struct LockManager {
    latches: Arc<LatchMap>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the latches of `wallets` in global order
    ///
    /// Duplicates are ignored. If any latch cannot be taken before `timeout`
    /// elapses, the ones already taken are released and `OperationTimeout`
    /// is returned naming the contended wallet.
    pub fn acquire(
        &self,
        wallets: &[WalletId],
        timeout: Duration,
    ) -> Result<WalletLocks, LedgerError> {
        let mut ordered = wallets.to_vec();
        ordered.sort();
        ordered.dedup();

        let started = Instant::now();
        // Timeouts too large to represent wait indefinitely
        let deadline = started.checked_add(timeout);
        let mut locks = WalletLocks {
            latches: Arc::clone(&self.latches),
            held: Vec::with_capacity(ordered.len()),
        };

        for wallet_id in ordered {
            // Clone the Arc out so no map shard stays locked while waiting
            let latch = Arc::clone(
                self.latches
                    .entry(wallet_id.clone())
                    .or_insert_with(|| Arc::new(WalletLatch::default()))
                    .value(),
            );

            if !latch.acquire(deadline) {
                drop(latch);
                evict_idle(&self.latches, &wallet_id);
                return Err(LedgerError::OperationTimeout {
                    wallet: wallet_id,
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            locks.held.push((wallet_id, latch));
        }

        Ok(locks)
    }

    /// Number of wallets with a live latch
    pub fn tracked(&self) -> usize {
        self.latches.len()
    }
}

/// Drop the map's latch for `wallet_id` when nobody else references it
///
/// `remove_if` runs under the shard lock that `entry` also takes, so a latch
/// cannot be cloned out between the count check and the removal.
fn evict_idle(latches: &LatchMap, wallet_id: &WalletId) {
    latches.remove_if(wallet_id, |_, latch| Arc::strong_count(latch) == 1);
}

/// Latches held by one operation; released on drop
#[derive(Debug)]
pub struct WalletLocks {
    latches: Arc<LatchMap>,
    held: Vec<(WalletId, Arc<WalletLatch>)>,
}

impl WalletLocks {
    /// Locked wallets in acquisition order
    pub fn wallets(&self) -> impl Iterator<Item = &WalletId> {
        self.held.iter().map(|(id, _)| id)
    }

    pub fn holds(&self, wallet_id: &WalletId) -> bool {
        self.held.iter().any(|(id, _)| id == wallet_id)
    }
}

impl Drop for WalletLocks {
    fn drop(&mut self) {
        for (wallet_id, latch) in self.held.drain(..).rev() {
            latch.release();
            drop(latch);
            evict_idle(&self.latches, &wallet_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn ids(ids: &[&str]) -> Vec<WalletId> {
        ids.iter().map(|id| WalletId::new(*id)).collect()
    }

    #[test]
    fn test_acquire_sorts_and_dedups() {
        let manager = LockManager::new();

        let locks = manager
            .acquire(&ids(&["w-b", "w-a", "w-b"]), Duration::from_millis(10))
            .unwrap();

        let held: Vec<&WalletId> = locks.wallets().collect();
        assert_eq!(held, vec![&WalletId::new("w-a"), &WalletId::new("w-b")]);
        assert!(locks.holds(&WalletId::new("w-a")));
        assert!(!locks.holds(&WalletId::new("w-c")));
    }

    #[test]
    fn test_contended_lock_times_out() {
        let manager = LockManager::new();
        let _held = manager.acquire(&ids(&["w-1"]), Duration::from_millis(10)).unwrap();

        let error = manager
            .acquire(&ids(&["w-0", "w-1"]), Duration::from_millis(20))
            .unwrap_err();

        assert_eq!(error.kind(), crate::types::ErrorKind::OperationTimeout);
        assert!(error.is_retryable());
        // w-0 was released when the acquisition gave up
        assert!(manager.acquire(&ids(&["w-0"]), Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn test_drop_releases() {
        let manager = LockManager::new();
        let locks = manager.acquire(&ids(&["w-1"]), Duration::from_millis(10)).unwrap();
        drop(locks);

        assert!(manager.acquire(&ids(&["w-1"]), Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn test_mutual_exclusion_across_threads() {
        let manager = Arc::new(LockManager::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let _locks = manager
                            .acquire(&ids(&["w-1"]), Duration::from_secs(10))
                            .unwrap();
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_opposite_order_requests_do_not_deadlock() {
        let manager = Arc::new(LockManager::new());

        let forward = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                for _ in 0..200 {
                    manager.acquire(&ids(&["x", "y"]), Duration::from_secs(10)).unwrap();
                }
            })
        };
        let backward = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                for _ in 0..200 {
                    manager.acquire(&ids(&["y", "x"]), Duration::from_secs(10)).unwrap();
                }
            })
        };

        forward.join().unwrap();
        backward.join().unwrap();
        assert_eq!(manager.tracked(), 0);
    }

    #[test]
    fn test_unbounded_timeout_waits_without_deadline() {
        let manager = Arc::new(LockManager::new());
        let held = manager.acquire(&ids(&["w-1"]), Duration::from_millis(10)).unwrap();

        let waiter = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.acquire(&ids(&["w-1"]), Duration::MAX).is_ok())
        };
        thread::sleep(Duration::from_millis(20));
        drop(held);

        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_uncontended_max_timeout() {
        let manager = LockManager::new();

        let locks = manager.acquire(&ids(&["w-1", "w-2"]), Duration::MAX).unwrap();

        assert!(locks.holds(&WalletId::new("w-2")));
    }

    #[test]
    fn test_released_latches_are_evicted() {
        let manager = LockManager::new();

        for i in 0..100 {
            let id = format!("w-{}", i);
            manager.acquire(&ids(&[id.as_str()]), Duration::from_millis(10)).unwrap();
        }

        assert_eq!(manager.tracked(), 0);
    }

    #[test]
    fn test_latch_kept_while_held() {
        let manager = LockManager::new();
        let held = manager.acquire(&ids(&["w-1"]), Duration::from_millis(10)).unwrap();

        manager
            .acquire(&ids(&["w-0", "w-1"]), Duration::from_millis(10))
            .unwrap_err();

        // w-0 evicted on timeout, w-1 still held
        assert_eq!(manager.tracked(), 1);
        drop(held);
        assert_eq!(manager.tracked(), 0);
    }
}
