//! Cooperative cancellation signal for I/O operations.

use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

use crate::error::PersistenceError;

/// Cloneable cancellation signal.
///
/// Every clone observes the same state; once cancelled it stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            let mut notified = pin!(self.inner.notify.notified());
            // Register before checking the flag so a concurrent cancel is not missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Fail fast when already cancelled.
    pub fn check(&self) -> Result<(), PersistenceError> {
        if self.is_cancelled() {
            return Err(PersistenceError::Cancelled);
        }
        Ok(())
    }

    /// Run `fut` unless the signal fires first.
    ///
    /// Nothing is polled when the signal is already set. A future dropped
    /// mid-flight leaves atomicity to the store.
    pub async fn guard<T, F>(&self, fut: F) -> Result<T, PersistenceError>
    where
        F: Future<Output = Result<T, PersistenceError>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(PersistenceError::Cancelled),
            result = fut => result,
        }
    }
}
