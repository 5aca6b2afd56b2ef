use std::fmt;
use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Completion signal of a closing service group.
///
/// Completes at most once. Waiters may `await` it from any task, and
/// callbacks run on whichever thread completes it.
#[derive(Clone)]
pub struct CloseSignal {
    inner: Arc<Inner>,
}

struct Inner {
    done: watch::Sender<bool>,
    callbacks: Mutex<Vec<Callback>>,
}

impl CloseSignal {
    pub(crate) fn new() -> Self {
        let (done, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                done,
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Whether the group has finished closing.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        *self.inner.done.borrow()
    }

    /// Waits until the group has finished closing.
    pub async fn wait(&self) {
        let mut done = self.inner.done.subscribe();
        // The sender lives as long as self, so this cannot fail.
        let _ = done.wait_for(|done| *done).await;
    }

    /// Runs `callback` once the signal completes, immediately if it already has.
    pub(crate) fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut callbacks = self.inner.callbacks.lock();
            if !self.is_complete() {
                callbacks.push(Box::new(callback));
                return;
            }
        }

        callback();
    }

    /// Completes the signal. Returns false if it was already complete.
    pub(crate) fn complete(&self) -> bool {
        let callbacks = {
            let mut callbacks = self.inner.callbacks.lock();
            if self.inner.done.send_replace(true) {
                return false;
            }
            mem::take(&mut *callbacks)
        };

        for callback in callbacks {
            callback();
        }
        true
    }
}

impl fmt::Debug for CloseSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseSignal")
            .field("complete", &self.is_complete())
            .finish()
    }
}
