//! Bounded pool of local execution slots.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, info};

use super::tools;
use crate::error::WorkError;
use crate::task::{Output, WorkItem};

/// Fixed set of local execution slots.
///
/// Each submitted item holds one slot for its whole run, so at most `slots`
/// items execute at once. Closing the pool (explicitly or on drop) releases
/// it; later submissions fail as unavailable and queued ones never start.
pub struct LocalPool {
    name: String,
    slots: usize,
    semaphore: Arc<Semaphore>,
}

impl LocalPool {
    /// Acquire a pool of `slots` slots; zero is raised to one
    pub fn new(name: impl Into<String>, slots: usize) -> Self {
        let slots = slots.max(1);
        let name = name.into();
        debug!(pool = %name, slots, "local pool acquired");
        Self {
            name,
            slots,
            semaphore: Arc::new(Semaphore::new(slots)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total slots, busy or idle
    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Slots not currently running an item
    pub fn idle(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    /// Release the pool; idempotent
    pub fn close(&self) {
        if !self.semaphore.is_closed() {
            self.semaphore.close();
            info!(pool = %self.name, "local pool released");
        }
    }

    /// Wait for a free slot, then run `item` on it
    pub async fn submit(&self, item: WorkItem) -> Result<Output, WorkError> {
        let _slot = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| WorkError::unavailable(&self.name, "pool is closed"))?;
        debug!(pool = %self.name, item = %item.id, action = item.action.name(), "slot acquired");
        tools::run(&item.action, &self.name).await
    }
}

impl Drop for LocalPool {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use futures_util::future::join_all;

    use super::*;

    #[tokio::test]
    async fn test_slots_bound_concurrency() {
        let pool = LocalPool::new("pool", 2);
        let items: Vec<WorkItem> = (0..4).map(|_| WorkItem::md_sim(100)).collect();

        let started = Instant::now();
        let results = join_all(items.into_iter().map(|item| pool.submit(item))).await;

        // 4 items over 2 slots take two rounds
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(pool.idle(), 2);
    }

    #[tokio::test]
    async fn test_closed_pool_is_unavailable() {
        let pool = LocalPool::new("pool", 1);
        pool.close();
        assert!(pool.is_closed());

        let err = pool.submit(WorkItem::md_sim(1)).await.unwrap_err();
        assert_eq!(err, WorkError::unavailable("pool", "pool is closed"));
    }

    #[tokio::test]
    async fn test_close_rejects_queued_items() {
        let pool = Arc::new(LocalPool::new("pool", 1));
        let busy = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move { pool.submit(WorkItem::md_sim(100)).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let queued = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move { pool.submit(WorkItem::md_sim(1)).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.close();

        assert!(busy.await.unwrap().is_ok());
        assert!(matches!(
            queued.await.unwrap(),
            Err(WorkError::Unavailable { .. })
        ));
    }

    #[test]
    fn test_zero_slots_rounds_up() {
        assert_eq!(LocalPool::new("pool", 0).slots(), 1);
    }
}
