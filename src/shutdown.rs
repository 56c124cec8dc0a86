//! Shutdown supervision for batch runs.
//!
//! One coordinator is constructed per process (or per independent run)
//! and injected into the batch driver - no module-level registries or
//! global signal state. A cheap [`ShutdownSignal`] token travels down
//! the call chain and is checked at every submission point: a triggered
//! signal stops new tasks from dispatching while already-dispatched
//! tasks finish or error naturally. In-flight HTTP calls are never
//! aborted; each carries its own bounded timeout, so a hung socket
//! cannot block shutdown indefinitely.

use std::process::Child;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

/// Cancellation token checked before dispatching new work.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Returns true only for the caller that flipped the flag.
    fn trigger(&self) -> bool {
        !self.flag.swap(true, Ordering::SeqCst)
    }
}

/// Gauge for one registered worker pool.
#[derive(Debug, Clone)]
pub struct PoolHandle {
    active: Arc<AtomicUsize>,
}

impl PoolHandle {
    /// Mark a task as dispatched; the guard decrements on drop so the
    /// gauge stays accurate on both completion and panic unwind.
    pub fn task_started(&self) -> TaskGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        TaskGuard {
            active: self.active.clone(),
        }
    }

    pub fn active_tasks(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

pub struct TaskGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

struct PoolRegistration {
    name: String,
    active: Arc<AtomicUsize>,
}

/// Process-wide supervisor: tracks live worker pools and spawned child
/// processes, and guarantees clean, idempotent termination on interrupt.
pub struct ShutdownCoordinator {
    signal: ShutdownSignal,
    pools: Mutex<Vec<PoolRegistration>>,
    children: Mutex<Vec<Child>>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            signal: ShutdownSignal::new(),
            pools: Mutex::new(Vec::new()),
            children: Mutex::new(Vec::new()),
        }
    }

    /// The signal token to pass into drivers and orchestrators.
    pub fn signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }

    /// Register a worker pool; the returned handle gauges its in-flight
    /// tasks.
    pub fn register_pool(&self, name: impl Into<String>) -> PoolHandle {
        let active = Arc::new(AtomicUsize::new(0));
        self.pools
            .lock()
            .expect("pool registry poisoned")
            .push(PoolRegistration {
                name: name.into(),
                active: active.clone(),
            });
        PoolHandle { active }
    }

    /// Track a child OS process to terminate on shutdown.
    pub fn register_child(&self, child: Child) {
        self.children
            .lock()
            .expect("child registry poisoned")
            .push(child);
    }

    /// Stop accepting new submissions on all registered pools.
    /// Idempotent: a second trigger (e.g. signal handler plus explicit
    /// shutdown) is a no-op.
    pub fn trigger(&self) {
        if self.signal.trigger() {
            info!("shutdown triggered, no new tasks will be dispatched");
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.signal.is_triggered()
    }

    fn total_active(&self) -> usize {
        self.pools
            .lock()
            .expect("pool registry poisoned")
            .iter()
            .map(|p| p.active.load(Ordering::SeqCst))
            .sum()
    }

    /// Wait for already-dispatched tasks across all pools to finish or
    /// error naturally.
    pub async fn drain(&self) {
        loop {
            let active = self.total_active();
            if active == 0 {
                return;
            }
            {
                let pools = self.pools.lock().expect("pool registry poisoned");
                for pool in pools.iter() {
                    let n = pool.active.load(Ordering::SeqCst);
                    if n > 0 {
                        info!(pool = %pool.name, in_flight = n, "waiting for tasks to drain");
                    }
                }
            }
            sleep(Duration::from_millis(100)).await;
        }
    }

    /// Terminate registered child processes. Idempotent: the registry is
    /// drained, so a second call finds nothing to kill.
    pub fn kill_children(&self) {
        let mut children = self.children.lock().expect("child registry poisoned");
        for mut child in children.drain(..) {
            match child.kill() {
                Ok(()) => {
                    let _ = child.wait();
                }
                Err(e) => warn!(error = %e, "failed to kill child process"),
            }
        }
    }

    /// Full shutdown sequence: stop submissions, drain dispatched tasks,
    /// terminate children. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.trigger();
        self.drain().await;
        self.kill_children();
    }

    /// Listen for SIGINT/SIGTERM and trigger this coordinator. The driver
    /// observes the signal at its next submission point and winds down.
    pub fn install_signal_handler(self: Arc<Self>) {
        let coordinator = self;
        tokio::spawn(async move {
            let ctrl_c = tokio::signal::ctrl_c();
            #[cfg(unix)]
            {
                let mut sigterm = match tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate(),
                ) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(error = %e, "failed to install SIGTERM handler");
                        return;
                    }
                };
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = ctrl_c.await;
            }
            coordinator.trigger();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_is_idempotent() {
        let coordinator = ShutdownCoordinator::new();
        assert!(!coordinator.is_triggered());
        coordinator.trigger();
        coordinator.trigger();
        assert!(coordinator.is_triggered());
        assert!(coordinator.signal().is_triggered());
    }

    #[test]
    fn task_guards_keep_the_gauge_accurate() {
        let coordinator = ShutdownCoordinator::new();
        let pool = coordinator.register_pool("cases");
        assert_eq!(pool.active_tasks(), 0);
        {
            let _a = pool.task_started();
            let _b = pool.task_started();
            assert_eq!(pool.active_tasks(), 2);
        }
        assert_eq!(pool.active_tasks(), 0);
    }

    #[tokio::test]
    async fn drain_returns_once_tasks_finish() {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let pool = coordinator.register_pool("questions");
        let guard = pool.task_started();

        let c = Arc::clone(&coordinator);
        let drainer = tokio::spawn(async move { c.drain().await });

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!drainer.is_finished());

        drop(guard);
        drainer.await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kill_children_is_idempotent() {
        let coordinator = ShutdownCoordinator::new();
        let child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("spawn sleep");
        coordinator.register_child(child);
        coordinator.kill_children();
        coordinator.kill_children();
    }
}
