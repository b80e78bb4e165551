//! Per-organization serialization and invalidation.
//!
//! Every transition for an organization runs while holding its
//! [`OrgGuard`].  Each organization also has an [`Epoch`].  Explicit
//! teardown (`disconnect`, `clear_auth_state`, `shutdown`) advances it, and
//! deferred work (reconnect timers, a close handler resuming after an
//! await) only goes ahead while the epoch it started under is still the
//! current one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Monotonic across the whole map, so a re-created slot never reuses an
/// epoch some stale task is still holding.
pub type Epoch = u64;

struct OrgSlot {
    gate: Arc<Semaphore>,
    epoch: AtomicU64,
}

#[derive(Debug, thiserror::Error)]
#[error("lock for organization {org_id} is closed")]
pub struct OrgLockClosed {
    pub org_id: String,
}

/// Exclusive access to one organization until dropped.
pub struct OrgGuard {
    slot: Arc<OrgSlot>,
    entered: Epoch,
    _permit: OwnedSemaphorePermit,
}

impl OrgGuard {
    /// Epoch observed when the guard was taken.
    pub fn epoch(&self) -> Epoch {
        self.entered
    }

    /// Whether `epoch` is still the organization's current one.
    pub fn admits(&self, epoch: Epoch) -> bool {
        self.slot.epoch.load(Ordering::Acquire) == epoch
    }
}

#[derive(Default)]
pub struct OrgLocks {
    slots: Mutex<HashMap<String, Arc<OrgSlot>>>,
    next_epoch: AtomicU64,
}

impl OrgLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, org_id: &str) -> Arc<OrgSlot> {
        self.slots
            .lock()
            .entry(org_id.to_owned())
            .or_insert_with(|| {
                Arc::new(OrgSlot {
                    gate: Arc::new(Semaphore::new(1)),
                    epoch: AtomicU64::new(self.next_epoch.fetch_add(1, Ordering::AcqRel)),
                })
            })
            .clone()
    }

    pub async fn acquire(&self, org_id: &str) -> Result<OrgGuard, OrgLockClosed> {
        let slot = self.slot(org_id);
        let permit = slot
            .gate
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| OrgLockClosed {
                org_id: org_id.to_owned(),
            })?;
        let entered = slot.epoch.load(Ordering::Acquire);
        Ok(OrgGuard {
            slot,
            entered,
            _permit: permit,
        })
    }

    /// `false` once the organization was torn down after `epoch` was taken,
    /// or when it has no slot at all.
    pub fn is_current(&self, org_id: &str, epoch: Epoch) -> bool {
        self.slots
            .lock()
            .get(org_id)
            .is_some_and(|slot| slot.epoch.load(Ordering::Acquire) == epoch)
    }

    /// Invalidate everything started under the organization's current epoch.
    pub fn advance(&self, org_id: &str) -> Epoch {
        let slot = self.slot(org_id);
        let next = self.next_epoch.fetch_add(1, Ordering::AcqRel);
        slot.epoch.store(next, Ordering::Release);
        next
    }

    /// Advance every known organization.  Returns how many there were.
    pub fn advance_all(&self) -> usize {
        let slots: Vec<Arc<OrgSlot>> = self.slots.lock().values().cloned().collect();
        for slot in &slots {
            let next = self.next_epoch.fetch_add(1, Ordering::AcqRel);
            slot.epoch.store(next, Ordering::Release);
        }
        slots.len()
    }

    /// Wait until no organization has a transition in flight.  Work queued
    /// behind the current holders is waited for too.
    pub async fn quiesce(&self) {
        let gates: Vec<Arc<Semaphore>> =
            self.slots.lock().values().map(|s| s.gate.clone()).collect();
        for gate in gates {
            if let Ok(permit) = gate.acquire_owned().await {
                drop(permit);
            }
        }
    }

    pub fn is_held(&self, org_id: &str) -> bool {
        self.slots
            .lock()
            .get(org_id)
            .is_some_and(|slot| slot.gate.available_permits() == 0)
    }

    /// Drop the organization's slot unless someone holds or awaits it.
    pub fn forget(&self, org_id: &str) -> bool {
        let mut slots = self.slots.lock();
        let idle = slots
            .get(org_id)
            .is_some_and(|slot| Arc::strong_count(slot) == 1 && slot.gate.available_permits() == 1);
        if idle {
            slots.remove(org_id);
        }
        idle
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
