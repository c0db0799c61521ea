//! Run phases of a manager.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Closing,
    Finished,
}

/// Guards the transitions Idle -> Running -> Closing -> Finished.
///
/// Exactly one party wins [`Lifecycle::begin_close`]: the coordinator when
/// the pipeline completes or aborts, or a caller of kill. The loser waits
/// for [`Lifecycle::wait_finished`].
#[derive(Debug)]
pub(crate) struct Lifecycle {
    phase: Mutex<Phase>,
    killed: AtomicBool,
    finished: watch::Sender<bool>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        let (finished, _) = watch::channel(false);
        Self {
            phase: Mutex::new(Phase::Idle),
            killed: AtomicBool::new(false),
            finished,
        }
    }

    pub(crate) fn try_start(&self) -> bool {
        let mut phase = self.phase.lock();
        if *phase == Phase::Idle {
            *phase = Phase::Running;
            true
        } else {
            false
        }
    }

    pub(crate) fn begin_close(&self, kill: bool) -> bool {
        let mut phase = self.phase.lock();
        match *phase {
            Phase::Idle | Phase::Running => {
                *phase = Phase::Closing;
                if kill {
                    self.killed.store(true, Ordering::SeqCst);
                }
                true
            }
            Phase::Closing | Phase::Finished => false,
        }
    }

    pub(crate) fn mark_finished(&self) {
        *self.phase.lock() = Phase::Finished;
        self.finished.send_replace(true);
    }

    pub(crate) async fn wait_finished(&self) {
        let mut rx = self.finished.subscribe();
        if rx.wait_for(|finished| *finished).await.is_err() {
            tracing::debug!("lifecycle dropped before finishing");
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        *self.phase.lock() == Phase::Finished
    }

    pub(crate) fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_single_closer() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.try_start());
        assert!(!lifecycle.try_start());

        assert!(lifecycle.begin_close(true));
        assert!(!lifecycle.begin_close(false));
        assert!(lifecycle.is_killed());
        assert!(!lifecycle.is_finished());

        lifecycle.mark_finished();
        assert!(lifecycle.is_finished());
        assert!(!lifecycle.begin_close(true));
    }

    #[test]
    fn test_close_before_start() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.begin_close(false));
        assert!(!lifecycle.try_start());
        assert!(!lifecycle.is_killed());
    }

    #[tokio::test]
    async fn test_wait_finished() {
        let lifecycle = Arc::new(Lifecycle::new());
        let waiter = {
            let lifecycle = Arc::clone(&lifecycle);
            tokio::spawn(async move { lifecycle.wait_finished().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        lifecycle.mark_finished();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();

        lifecycle.wait_finished().await;
    }
}
