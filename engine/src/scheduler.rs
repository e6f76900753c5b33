//! Bounded-concurrency request scheduler.
//!
//! All backend calls from every collection store of a context go through one
//! [`RequestScheduler`]. Tasks wait in a FIFO queue and are started in
//! enqueue order, at most `max_concurrent` at a time. Completion order is
//! unspecified.
//!
//! A slot is released by a drop guard owned by the running task, so a task
//! that fails or panics still frees its slot and admits the next one.

use crate::error::{Error, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::sync::oneshot;

/// Default concurrency bound.
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

#[derive(Default)]
struct QueueState {
    queue: VecDeque<BoxFuture<'static, ()>>,
    active: usize,
}

struct Inner {
    max_concurrent: usize,
    state: Mutex<QueueState>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// FIFO scheduler admitting a bounded number of concurrent tasks.
///
/// Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct RequestScheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RequestScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("RequestScheduler")
            .field("max_concurrent", &self.inner.max_concurrent)
            .field("active", &state.active)
            .field("pending", &state.queue.len())
            .finish()
    }
}

impl Default for RequestScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT)
    }
}

impl RequestScheduler {
    /// Create a scheduler admitting at most `max_concurrent` tasks (minimum 1).
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                max_concurrent: max_concurrent.max(1),
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    /// The concurrency bound.
    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }

    /// Number of tasks currently running.
    pub fn active(&self) -> usize {
        self.inner.lock().active
    }

    /// Number of tasks waiting for a slot.
    pub fn pending(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Queue a task without waiting for it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn enqueue<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.lock().queue.push_back(task.boxed());
        pump(&self.inner);
    }

    /// Queue a task and wait for its output.
    ///
    /// Returns [`Error::TaskAborted`] if the task panicked.
    pub async fn run<F, T>(&self, task: F) -> Result<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.enqueue(async move {
            let _ = tx.send(task.await);
        });
        rx.await.map_err(|_| Error::TaskAborted)
    }
}

/// Releases a slot when the task holding it finishes, fails or unwinds.
struct SlotGuard {
    inner: Arc<Inner>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.inner.lock().active -= 1;
        pump(&self.inner);
    }
}

/// Start queued tasks while slots are free.
fn pump(inner: &Arc<Inner>) {
    let Ok(handle) = Handle::try_current() else {
        return;
    };

    loop {
        let task = {
            let mut state = inner.lock();
            if state.active >= inner.max_concurrent {
                return;
            }
            match state.queue.pop_front() {
                Some(task) => {
                    state.active += 1;
                    task
                }
                None => return,
            }
        };

        let guard = SlotGuard {
            inner: Arc::clone(inner),
        };
        handle.spawn(async move {
            let _guard = guard;
            task.await;
        });
    }
}
