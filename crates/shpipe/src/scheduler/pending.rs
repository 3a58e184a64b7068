//! Registry entries binding a flusher to what it needs at flush time.

use std::fmt;
use std::io;
use std::sync::Arc;

use crate::flusher::Flusher;
use crate::state::FlushContext;

use super::closer::RefCloser;

/// A registered flusher waiting for [`State::flush_all`](crate::State::flush_all).
///
/// Holds the context captured at registration, the shared endpoints to
/// release once the flush completes, and the registry indices of earlier
/// entries that must complete before this one may start.
pub struct PendingFlush {
    pub(crate) flusher: Arc<dyn Flusher>,
    ctx: FlushContext,
    closers: Vec<Arc<RefCloser>>,
    waits_for: Vec<usize>,
}

impl PendingFlush {
    pub(crate) fn new(flusher: Arc<dyn Flusher>, ctx: FlushContext) -> Self {
        Self {
            flusher,
            ctx,
            closers: Vec::new(),
            waits_for: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.flusher.name()
    }

    pub fn context(&self) -> &FlushContext {
        &self.ctx
    }

    /// Registry indices this entry waits for.
    pub fn waits_for(&self) -> &[usize] {
        &self.waits_for
    }

    /// Number of shared endpoints released when this entry completes.
    pub fn closer_count(&self) -> usize {
        self.closers.len()
    }

    /// Release `closer` once this entry completes. The caller must already
    /// have counted this entry as a holder.
    pub(crate) fn close_when_done(&mut self, closer: Arc<RefCloser>) {
        self.closers.push(closer);
    }

    /// Do not start before the entry at registry index `index` has completed.
    pub(crate) fn wait_for(&mut self, index: usize) {
        if !self.waits_for.contains(&index) {
            self.waits_for.push(index);
        }
    }

    /// Release every held endpoint, returning the first release error.
    pub(crate) fn release(&self) -> io::Result<()> {
        let mut result = Ok(());
        for closer in &self.closers {
            let released = closer.release();
            if result.is_ok() {
                result = released;
            }
        }
        result
    }
}

impl fmt::Debug for PendingFlush {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingFlush")
            .field("flusher", &self.flusher.name())
            .field("closers", &self.closers.len())
            .field("waits_for", &self.waits_for)
            .finish()
    }
}
