//! Reference-counted closing of shared stream endpoints.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A stream endpoint that can be shut down from any task.
pub trait Close: Send + Sync {
    /// Close the endpoint. Must be idempotent.
    fn close(&self) -> io::Result<()>;
}

/// Closes one endpoint exactly once, after every owner has released it.
///
/// The count starts at the number of holders known at creation time.
/// [`retain`](RefCloser::retain) adds a holder and must happen while the
/// caller still holds its own reference, so the count cannot reach zero
/// before every consumer is known. Releases past zero are ignored.
pub struct RefCloser {
    endpoint: Arc<dyn Close>,
    refs: AtomicUsize,
}

impl RefCloser {
    /// A closer with a single holder (the creator).
    pub fn new(endpoint: Arc<dyn Close>) -> Self {
        Self::with_count(endpoint, 1)
    }

    /// A closer expecting `refs` releases.
    pub fn with_count(endpoint: Arc<dyn Close>, refs: usize) -> Self {
        Self {
            endpoint,
            refs: AtomicUsize::new(refs),
        }
    }

    /// Register one more holder.
    pub fn retain(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one holder, closing the endpoint when it was the last one.
    pub fn release(&self) -> io::Result<()> {
        let previous = self
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match previous {
            Ok(1) => {
                tracing::trace!("closing shared stream endpoint");
                self.endpoint.close()
            }
            Ok(_) => Ok(()),
            Err(_) => {
                tracing::trace!("release on an already closed endpoint ignored");
                Ok(())
            }
        }
    }

    /// Holders that have not released yet.
    pub fn refs(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }
}

impl fmt::Debug for RefCloser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefCloser")
            .field("refs", &self.refs())
            .finish()
    }
}
