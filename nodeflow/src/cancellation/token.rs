//! Cancellation shared by a manager, its tasks and its nested managers.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;

/// Run once when a token is cancelled, with the reason.
pub type CancelCallback = Box<dyn FnOnce(&str) + Send>;

#[derive(Default)]
struct Links {
    reason: Option<String>,
    children: Vec<Weak<CancellationToken>>,
    callbacks: Vec<CancelCallback>,
}

/// A token stages poll to learn that their manager is shutting down.
///
/// The first reason wins. Stage logic either checks
/// [`CancellationToken::is_cancelled`] between steps or awaits
/// [`CancellationToken::cancelled`] next to its work. Stages wrapping an
/// external command register an [`CancellationToken::on_cancel`] callback to
/// stop it.
#[derive(Default)]
pub struct CancellationToken {
    cancelled: AtomicBool,
    links: Mutex<Links>,
    notify: Notify,
}

impl CancellationToken {
    /// Creates a new shared cancellation token.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates a token that is cancelled whenever `self` is.
    ///
    /// Cancelling the child leaves the parent untouched.
    #[must_use]
    pub fn child(self: &Arc<Self>) -> Arc<Self> {
        let child = Self::new();
        let mut links = self.links.lock();
        match &links.reason {
            Some(reason) => {
                let reason = format!("parent cancelled: {reason}");
                drop(links);
                child.cancel(reason);
            }
            None => {
                links.children.retain(|c| c.strong_count() > 0);
                links.children.push(Arc::downgrade(&child));
            }
        }
        child
    }

    /// Requests cancellation, then cancels every live child.
    pub fn cancel(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let (children, callbacks) = {
            let mut links = self.links.lock();
            if links.reason.is_some() {
                return;
            }
            links.reason = Some(reason.clone());
            self.cancelled.store(true, Ordering::SeqCst);
            (
                std::mem::take(&mut links.children),
                std::mem::take(&mut links.callbacks),
            )
        };

        self.notify.notify_waiters();
        for callback in callbacks {
            callback(&reason);
        }
        let inherited = format!("parent cancelled: {reason}");
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel(inherited.clone());
        }
    }

    /// Registers a callback run once on cancellation, right away if the
    /// token is already cancelled.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: FnOnce(&str) + Send + 'static,
    {
        let mut links = self.links.lock();
        match links.reason.clone() {
            Some(reason) => {
                drop(links);
                callback(&reason);
            }
            None => links.callbacks.push(Box::new(callback)),
        }
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.links.lock().reason.clone()
    }

    /// Completes once cancellation has been requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let links = self.links.lock();
        f.debug_struct("CancellationToken")
            .field("reason", &links.reason)
            .field("children", &links.children.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_first_reason_wins() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());

        token.cancel("operator kill");
        token.cancel("second kill");

        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some("operator kill".to_string()));
    }

    #[test]
    fn test_callbacks_run_once() {
        let token = CancellationToken::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let before = counter.clone();
        token.on_cancel(move |_| {
            before.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        token.cancel("ipmi power off");
        token.cancel("again");
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let after = counter.clone();
        token.on_cancel(move |reason| {
            assert_eq!(reason, "ipmi power off");
            after.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_child_follows_parent_only() {
        let parent = CancellationToken::new();
        let child = parent.child();

        child.cancel("inner only");
        assert!(!parent.is_cancelled());

        let parent = CancellationToken::new();
        let child = parent.child();
        let grandchild = child.child();
        parent.cancel("outer kill");
        assert!(child.is_cancelled());
        assert!(grandchild.reason().unwrap().contains("outer kill"));

        let late = parent.child();
        assert!(late.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiters() {
        let token = CancellationToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel("wake up");

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
