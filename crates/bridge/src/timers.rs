//! Cancellable delayed tasks keyed by organization.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

struct Pending {
    seq: u64,
    handle: JoinHandle<()>,
}

/// At most one pending timer per organization.  Scheduling a new one
/// aborts the previous timer.
#[derive(Default)]
pub struct ReconnectTimers {
    pending: Arc<Mutex<HashMap<String, Pending>>>,
    seq: AtomicU64,
}

impl ReconnectTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay` unless cancelled first.  The timer removes
    /// its own entry before `task` starts, so `task` may schedule or cancel
    /// timers for the same organization.
    pub fn schedule<F>(&self, org_id: &str, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let pending = self.pending.clone();
        let org = org_id.to_owned();

        // Hold the map lock across spawn so the task cannot look itself up
        // before it is inserted.
        let mut map = self.pending.lock();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut map = pending.lock();
                if map.get(&org).is_some_and(|p| p.seq == seq) {
                    map.remove(&org);
                }
            }
            task.await;
        });
        if let Some(previous) = map.insert(org_id.to_owned(), Pending { seq, handle }) {
            previous.handle.abort();
        }
    }

    /// Cancel the organization's pending timer.  Returns whether one existed.
    pub fn cancel(&self, org_id: &str) -> bool {
        match self.pending.lock().remove(org_id) {
            Some(p) => {
                p.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel every pending timer.  Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Pending> = self.pending.lock().drain().map(|(_, p)| p).collect();
        for p in &drained {
            p.handle.abort();
        }
        drained.len()
    }

    pub fn is_pending(&self, org_id: &str) -> bool {
        self.pending.lock().contains_key(org_id)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter_task(counter: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay_and_clears_itself() {
        let timers = ReconnectTimers::new();
        let fired = Arc::new(AtomicUsize::new(0));
        timers.schedule("org1", Duration::from_secs(3), counter_task(&fired));
        assert!(timers.is_pending("org1"));

        tokio::time::sleep(Duration::from_millis(2999)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(timers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_previous_timer() {
        let timers = ReconnectTimers::new();
        let fired = Arc::new(AtomicUsize::new(0));
        timers.schedule("org1", Duration::from_secs(1), counter_task(&fired));
        timers.schedule("org1", Duration::from_secs(5), counter_task(&fired));
        assert_eq!(timers.len(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_firing() {
        let timers = ReconnectTimers::new();
        let fired = Arc::new(AtomicUsize::new(0));
        timers.schedule("a", Duration::from_secs(1), counter_task(&fired));
        timers.schedule("b", Duration::from_secs(1), counter_task(&fired));

        assert!(timers.cancel("a"));
        assert!(!timers.cancel("a"));
        assert_eq!(timers.cancel_all(), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(timers.is_empty());
    }
}
