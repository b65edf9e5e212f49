//! Completion handles for asynchronously settled results.

use crate::error::{CoreError, CoreResult};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// A handle to a result that another thread settles later.
///
/// This is the blocking analog of a one-shot promise: the runner thread
/// settles the handle when the underlying work resolves, and the caller
/// blocks in [`wait`](Completion::wait) until it does. Settling is
/// first-wins; the result is consumed by the first waiter.
pub struct Completion<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    result: Mutex<Option<CoreResult<T>>>,
    ready: Condvar,
}

impl<T> Completion<T> {
    /// Creates an unsettled completion handle.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                result: Mutex::new(None),
                ready: Condvar::new(),
            }),
        }
    }

    /// Settles the handle. Later settlements are ignored.
    pub fn settle(&self, result: CoreResult<T>) {
        let mut slot = self.shared.result.lock();
        if slot.is_none() {
            *slot = Some(result);
            self.shared.ready.notify_all();
        }
    }

    /// Settles the handle with an error.
    pub fn fail(&self, error: CoreError) {
        self.settle(Err(error));
    }

    /// Blocks until the handle is settled and takes the result.
    pub fn wait(&self) -> CoreResult<T> {
        let mut slot = self.shared.result.lock();
        loop {
            if let Some(result) = slot.take() {
                return result;
            }
            self.shared.ready.wait(&mut slot);
        }
    }
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for Completion<T> {
    fn default() -> Self {
        Self::new()
    }
}
