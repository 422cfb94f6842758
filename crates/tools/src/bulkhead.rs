//! Per-tool bulkheads: a bounded number of concurrent executions, with
//! callers queueing for a slot up to an acquisition timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use toolwright_config::BulkheadPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct BulkheadStats {
    pub max_concurrent: usize,
    pub in_flight: usize,
    /// Callers currently waiting for a slot.
    pub queued: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkheadFull {
    pub waited: Duration,
    pub queued: usize,
}

/// A held slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct BulkheadPermit {
    _permit: OwnedSemaphorePermit,
}

pub struct Bulkhead {
    name: String,
    policy: BulkheadPolicy,
    semaphore: Arc<Semaphore>,
    waiting: AtomicUsize,
}

struct WaitGuard<'a>(&'a AtomicUsize);

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Bulkhead {
    pub fn new(name: impl Into<String>, policy: BulkheadPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            semaphore: Arc::new(Semaphore::new(policy.max_concurrent)),
            waiting: AtomicUsize::new(0),
        }
    }

    /// Wait for a slot, giving up after the policy's acquisition timeout.
    pub async fn acquire(&self) -> Result<BulkheadPermit, BulkheadFull> {
        if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
            return Ok(BulkheadPermit { _permit: permit });
        }

        let waited = Duration::from_secs(self.policy.acquire_timeout_secs);
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let _guard = WaitGuard(&self.waiting);

        match tokio::time::timeout(waited, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(BulkheadPermit { _permit: permit }),
            // The semaphore is never closed; treat it like a timeout anyway.
            Ok(Err(_)) | Err(_) => {
                let queued = self.queue_depth().saturating_sub(1);
                tracing::warn!(
                    tool = %self.name,
                    queued,
                    "Bulkhead slot not acquired in {}s",
                    waited.as_secs()
                );
                Err(BulkheadFull { waited, queued })
            }
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> BulkheadStats {
        BulkheadStats {
            max_concurrent: self.policy.max_concurrent,
            in_flight: self
                .policy
                .max_concurrent
                .saturating_sub(self.semaphore.available_permits()),
            queued: self.queue_depth(),
        }
    }
}

/// Lazily-created bulkheads keyed by tool name.
#[derive(Default)]
pub struct Bulkheads {
    bulkheads: Mutex<HashMap<String, Arc<Bulkhead>>>,
}

impl Bulkheads {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, tool_name: &str, policy: BulkheadPolicy) -> Arc<Bulkhead> {
        self.bulkheads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(tool_name.to_string())
            .or_insert_with(|| Arc::new(Bulkhead::new(tool_name, policy)))
            .clone()
    }

    pub fn get(&self, tool_name: &str) -> Option<Arc<Bulkhead>> {
        self.bulkheads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(tool_name)
            .cloned()
    }

    pub fn remove(&self, tool_name: &str) {
        self.bulkheads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(tool_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_concurrent: usize) -> BulkheadPolicy {
        BulkheadPolicy {
            max_concurrent,
            acquire_timeout_secs: 5,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn limits_concurrency_and_times_out() {
        let bulkhead = Bulkhead::new("create_payment", policy(1));
        let held = bulkhead.acquire().await.unwrap();
        assert_eq!(bulkhead.stats().in_flight, 1);

        let err = bulkhead.acquire().await.unwrap_err();
        assert_eq!(err.waited, Duration::from_secs(5));
        assert_eq!(bulkhead.queue_depth(), 0);

        drop(held);
        assert_eq!(bulkhead.stats().in_flight, 0);
        assert!(bulkhead.acquire().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_gets_slot_when_released() {
        let bulkhead = Arc::new(Bulkhead::new("t", policy(1)));
        let held = bulkhead.acquire().await.unwrap();

        let waiter = {
            let bulkhead = bulkhead.clone();
            tokio::spawn(async move { bulkhead.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(bulkhead.queue_depth(), 1);

        drop(held);
        assert!(waiter.await.unwrap().is_ok());
        assert_eq!(bulkhead.queue_depth(), 0);
    }

    #[tokio::test]
    async fn permits_released_on_drop() {
        let bulkhead = Bulkhead::new("t", policy(2));
        {
            let _a = bulkhead.acquire().await.unwrap();
            let _b = bulkhead.acquire().await.unwrap();
            assert_eq!(bulkhead.stats().in_flight, 2);
        }
        assert_eq!(bulkhead.stats().in_flight, 0);
    }
}
