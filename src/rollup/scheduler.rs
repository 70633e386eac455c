//! Interval scheduling for the rollup sweep, in blocking and non-blocking
//! flavors, and the factory matching a flavor to a counter surface.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::counter::factory::CounterHandle;
use crate::rollup::sweep::{DeltaSweep, DEFAULT_PAGE_SIZE};
use crate::store::StoreManager;

/// Non-blocking rollup scheduler: a spawned task sweeping on an interval.
///
/// Shutdown cancels the next tick without interrupting an in-flight sweep.
pub struct RollupScheduler {
    shutdown: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl RollupScheduler {
    /// Start sweeping `sweep`'s namespace every `interval`.
    pub fn start(sweep: DeltaSweep, interval: Duration) -> Self {
        let shutdown = Arc::new(Notify::new());
        let notify = Arc::clone(&shutdown);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick of a tokio interval fires immediately; the
            // schedule starts one interval out.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = sweep.run_once().await {
                            tracing::warn!(
                                namespace = %sweep.namespace(),
                                error = %err,
                                "rollup tick failed, skipping until next interval"
                            );
                        }
                    }
                    _ = notify.notified() => break,
                }
            }
        });
        Self {
            shutdown,
            task: Some(task),
        }
    }

    /// Stop the schedule and wait for any in-flight sweep to finish.
    pub async fn shutdown(mut self) {
        self.shutdown.notify_one();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for RollupScheduler {
    fn drop(&mut self) {
        // Cancels the next tick; an in-flight sweep still completes.
        self.shutdown.notify_one();
    }
}

/// Blocking rollup scheduler: a dedicated thread sweeping on an interval.
pub struct BlockingRollupScheduler {
    shutdown_tx: mpsc::Sender<()>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl BlockingRollupScheduler {
    /// Start a scheduler thread sweeping every `interval`.
    pub fn start(sweep: DeltaSweep, interval: Duration, runtime: tokio::runtime::Handle) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel();
        let thread = std::thread::Builder::new()
            .name("dcounter-rollup".to_string())
            .spawn(move || loop {
                match shutdown_rx.recv_timeout(interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        if let Err(err) = runtime.block_on(sweep.run_once()) {
                            tracing::warn!(
                                namespace = %sweep.namespace(),
                                error = %err,
                                "rollup tick failed, skipping until next interval"
                            );
                        }
                    }
                }
            })
            .expect("failed to spawn rollup scheduler thread");
        Self {
            shutdown_tx,
            thread: Some(thread),
        }
    }

    /// Stop the schedule and join the scheduler thread.
    pub fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for BlockingRollupScheduler {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// A running rollup of either flavor.
pub enum RollupHandle {
    /// Spawned-task scheduler
    Async(RollupScheduler),
    /// Dedicated-thread scheduler
    Blocking(BlockingRollupScheduler),
}

impl RollupHandle {
    /// Stop the schedule; in-flight work completes.
    pub async fn shutdown(self) {
        match self {
            RollupHandle::Async(scheduler) => scheduler.shutdown().await,
            RollupHandle::Blocking(scheduler) => scheduler.shutdown(),
        }
    }
}

/// Builds rollup schedulers matched to the counter surface in use.
pub struct RollupFactory {
    manager: Arc<StoreManager>,
    page_size: usize,
}

impl RollupFactory {
    /// Create a factory over one store manager.
    pub fn new(manager: Arc<StoreManager>) -> Self {
        Self {
            manager,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Scan page size for the sweeps this factory builds.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Non-blocking scheduler for a namespace.
    pub fn scheduler(&self, namespace: impl Into<String>, interval: Duration) -> RollupScheduler {
        RollupScheduler::start(self.sweep(namespace), interval)
    }

    /// Blocking scheduler for a namespace.
    pub fn blocking_scheduler(
        &self,
        namespace: impl Into<String>,
        interval: Duration,
        runtime: tokio::runtime::Handle,
    ) -> BlockingRollupScheduler {
        BlockingRollupScheduler::start(self.sweep(namespace), interval, runtime)
    }

    /// Pick the scheduler flavor matching the counter's surface.
    pub fn for_counter(
        &self,
        counter: &CounterHandle,
        namespace: impl Into<String>,
        interval: Duration,
        runtime: tokio::runtime::Handle,
    ) -> RollupHandle {
        match counter {
            CounterHandle::Async(_) => RollupHandle::Async(self.scheduler(namespace, interval)),
            CounterHandle::Blocking(_) => {
                RollupHandle::Blocking(self.blocking_scheduler(namespace, interval, runtime))
            }
        }
    }

    fn sweep(&self, namespace: impl Into<String>) -> DeltaSweep {
        DeltaSweep::with_page_size(Arc::clone(&self.manager), namespace, self.page_size)
    }
}
