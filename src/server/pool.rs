use std::{future::Future, io, sync::Arc, time::Duration};
use tokio::{
    runtime::{self, Handle, Runtime},
    sync::{OwnedSemaphorePermit, Semaphore},
    time::timeout,
};
use tracing::debug;

/// A fixed number of execution slots backed by a dedicated runtime.
///
/// Each job holds one slot for as long as it runs, so at most `size` jobs are
/// ever in flight.
pub(crate) struct WorkerPool {
    runtime: Option<Runtime>,
    handle: Handle,
    slots: Arc<Semaphore>,
    size: usize,
}

/// A reserved slot, released when dropped.
pub(crate) struct Slot(OwnedSemaphorePermit);

impl WorkerPool {
    pub(crate) fn new(size: usize) -> io::Result<Self> {
        let runtime = runtime::Builder::new_multi_thread()
            .worker_threads(size)
            .thread_name("rmi-worker")
            .enable_all()
            .build()?;
        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            slots: Arc::new(Semaphore::new(size)),
            size,
        })
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Waits until a slot is free. `None` once the slots are closed.
    pub(crate) async fn reserve(&self) -> Option<Slot> {
        self.slots.clone().acquire_owned().await.ok().map(Slot)
    }

    /// Runs `job` on the pool, holding `slot` until it completes.
    pub(crate) fn run<F>(&self, slot: Slot, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(async move {
            job.await;
            drop(slot);
        });
    }

    /// Waits up to `grace` for every slot to be released. Returns whether the
    /// pool went idle in time.
    pub(crate) async fn quiesce(&self, grace: Duration) -> bool {
        let Ok(size) = u32::try_from(self.size) else {
            return false;
        };
        matches!(timeout(grace, self.slots.acquire_many(size)).await, Ok(Ok(_)))
    }

    /// Shuts the runtime down, abandoning jobs still running after `wait`.
    pub(crate) fn shutdown(mut self, wait: Duration) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(wait);
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            debug!("worker pool dropped without shutdown");
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn never_runs_more_jobs_than_slots() {
        let pool = WorkerPool::new(2).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        pool.handle().clone().block_on(async {
            for _ in 0..8 {
                let slot = pool.reserve().await.unwrap();
                let (running, peak) = (running.clone(), peak.clone());
                pool.run(slot, async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                });
            }
            assert!(pool.quiesce(Duration::from_secs(5)).await);
        });

        assert_eq!(running.load(Ordering::SeqCst), 0);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        pool.shutdown(Duration::from_millis(100));
    }

    #[test]
    fn quiesce_gives_up_after_the_grace_period() {
        let pool = WorkerPool::new(1).unwrap();
        pool.handle().clone().block_on(async {
            let slot = pool.reserve().await.unwrap();
            pool.run(slot, tokio::time::sleep(Duration::from_secs(30)));
            assert!(!pool.quiesce(Duration::from_millis(50)).await);
        });
        pool.shutdown(Duration::from_millis(10));
    }
}
