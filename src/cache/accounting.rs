//! Pending size accounting.
//!
//! Entries report size deltas here instead of touching the store total
//! directly, so a request that refreshed an entry never waits on the store
//! lock or on the eviction it may cause. Deltas commute, so the queue folds
//! them into a single pending sum; it can never grow without bound.
//!
//! The store total converges once the pending sum is applied, either by the
//! background accountant ([`CacheStore::spawn_accountant`]) or by an explicit
//! [`CacheStore::settle`] in tests and maintenance paths.
//!
//! [`CacheStore::spawn_accountant`]: super::CacheStore::spawn_accountant
//! [`CacheStore::settle`]: super::CacheStore::settle

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use tokio::sync::Notify;

pub struct SizeAccounting {
    pending: AtomicI64,
    reports: AtomicU64,
    notify: Notify,
}

impl SizeAccounting {
    pub fn new() -> Self {
        Self {
            pending: AtomicI64::new(0),
            reports: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    /// Queue a size delta and wake the accountant.
    pub fn report(&self, delta: i64) {
        if delta == 0 {
            return;
        }
        self.pending.fetch_add(delta, Ordering::AcqRel);
        self.reports.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
    }

    /// Take the pending sum, leaving zero behind.
    pub fn take(&self) -> i64 {
        self.pending.swap(0, Ordering::AcqRel)
    }

    /// Pending sum not yet applied to the store total.
    pub fn pending(&self) -> i64 {
        self.pending.load(Ordering::Acquire)
    }

    /// Number of non-zero deltas reported since creation.
    pub fn reports(&self) -> u64 {
        self.reports.load(Ordering::Relaxed)
    }

    /// Wait until at least one delta was reported since the last wake-up.
    pub async fn reported(&self) {
        self.notify.notified().await;
    }
}

impl Default for SizeAccounting {
    fn default() -> Self {
        Self::new()
    }
}
