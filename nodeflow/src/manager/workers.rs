//! Registry of live worker tasks.

use crate::tasks::Task;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub(crate) struct Worker {
    pub(crate) task: Arc<dyn Task>,
    pub(crate) handle: JoinHandle<()>,
}

impl Worker {
    fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    workers: HashMap<u64, Worker>,
    closed: bool,
}

/// The tasks a manager has launched and not yet reaped.
#[derive(Default)]
pub struct WorkerRegistry {
    inner: Mutex<Registry>,
}

/// Result of one reaping pass.
#[derive(Default)]
pub(crate) struct Reaped {
    pub(crate) removed: usize,
    /// Tasks whose worker ended while still holding nodes.
    pub(crate) leftovers: Vec<Arc<dyn Task>>,
}

impl WorkerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a launched worker. A closed registry aborts it instead.
    pub(crate) fn insert(&self, task: Arc<dyn Task>, handle: JoinHandle<()>) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed {
            handle.abort();
            return false;
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.workers.insert(id, Worker { task, handle });
        true
    }

    /// Removes every worker that has finished.
    pub(crate) fn reap(&self) -> Reaped {
        let mut inner = self.inner.lock();
        let finished: Vec<u64> = inner
            .workers
            .iter()
            .filter(|(_, w)| w.is_finished())
            .map(|(id, _)| *id)
            .collect();

        let mut reaped = Reaped::default();
        for id in finished {
            if let Some(worker) = inner.workers.remove(&id) {
                reaped.removed += 1;
                if !worker.task.core().outputs().is_drained() {
                    reaped.leftovers.push(worker.task);
                }
            }
        }
        reaped
    }

    /// Closes the registry and hands back every registered worker.
    pub(crate) fn close(&self) -> Vec<Worker> {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.workers.drain().map(|(_, w)| w).collect()
    }

    /// Returns the number of registered workers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().workers.len()
    }

    /// Returns true if no worker is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of workers still running.
    #[must_use]
    pub fn live(&self) -> usize {
        self.inner
            .lock()
            .workers
            .values()
            .filter(|w| !w.is_finished())
            .count()
    }
}

impl fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("WorkerRegistry")
            .field("workers", &inner.workers.len())
            .field("closed", &inner.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTask;
    use std::time::Duration;

    #[tokio::test]
    async fn test_reap_separates_leftovers() {
        let registry = WorkerRegistry::new();

        let drained = ScriptedTask::for_hosts("format", &["n1"]);
        drained.core().outputs().lock().assigned.clear();
        assert!(registry.insert(drained, tokio::spawn(async {})));

        let leftover = ScriptedTask::for_hosts("format", &["n2"]);
        assert!(registry.insert(leftover, tokio::spawn(async {})));

        let running = ScriptedTask::for_hosts("format", &["n3"]);
        let handle = tokio::spawn(tokio::time::sleep(Duration::from_secs(60)));
        assert!(registry.insert(running, handle));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(registry.live(), 1);

        let reaped = registry.reap();
        assert_eq!(reaped.removed, 2);
        assert_eq!(reaped.leftovers.len(), 1);
        assert_eq!(reaped.leftovers[0].core().nodes().hostnames(), vec!["n2"]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.live(), 1);
    }

    #[tokio::test]
    async fn test_closed_registry_rejects_workers() {
        let registry = WorkerRegistry::new();
        let handle = tokio::spawn(tokio::time::sleep(Duration::from_secs(60)));
        assert!(registry.insert(ScriptedTask::for_hosts("reboot", &["n1"]), handle));

        let workers = registry.close();
        assert_eq!(workers.len(), 1);
        for worker in workers {
            worker.handle.abort();
        }
        assert!(registry.is_empty());

        let handle = tokio::spawn(tokio::time::sleep(Duration::from_secs(60)));
        assert!(!registry.insert(ScriptedTask::for_hosts("reboot", &["n2"]), handle));
        assert!(registry.is_empty());
    }
}
