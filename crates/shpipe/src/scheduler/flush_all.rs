//! Concurrent execution of a pipeline's registered flushers.
//!
//! ```text
//!   registry ──▶ one task per entry ──▶ wait for predecessors (counter + Notify)
//!                                   ──▶ flush
//!                                   ──▶ record error (first wins → kill all)
//!                                   ──▶ release closers
//!                                   ──▶ count down dependents
//! ```
//!
//! An error is recorded before the failing entry releases its endpoints, so
//! failures caused by that release (a writer seeing its reader vanish) can
//! never be reported ahead of the one that triggered it.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::PipeConfig;
use crate::error::{PipeError, Result};
use crate::flusher::Flusher;

use super::pending::PendingFlush;

#[derive(Default)]
struct Node {
    /// Predecessors that have not completed yet.
    waiting_on: AtomicUsize,
    ready: Notify,
    dependents: Vec<usize>,
}

struct Run {
    nodes: Vec<Node>,
    flushers: Vec<Arc<dyn Flusher>>,
    first_error: Mutex<Option<PipeError>>,
    cancel: CancellationToken,
    run_after_failure: bool,
}

impl Run {
    /// Record `err`; the first recorded error kills every flusher once.
    fn fail(&self, err: PipeError) {
        {
            let mut slot = self.first_error.lock().unwrap_or_else(|e| e.into_inner());
            if slot.is_some() {
                tracing::debug!(error = %err, "later flush error dropped");
                return;
            }
            tracing::warn!(error = %err, "flush failed, killing all flushers");
            *slot = Some(err);
        }
        self.cancel.cancel();
        for flusher in &self.flushers {
            flusher.kill();
        }
    }

    async fn wait_ready(&self, index: usize) {
        let node = &self.nodes[index];
        while node.waiting_on.load(Ordering::Acquire) > 0 {
            node.ready.notified().await;
        }
    }

    fn complete(&self, index: usize) {
        for &dependent in &self.nodes[index].dependents {
            let node = &self.nodes[dependent];
            if node.waiting_on.fetch_sub(1, Ordering::AcqRel) == 1 {
                node.ready.notify_one();
            }
        }
    }

    fn take_error(&self) -> Option<PipeError> {
        self.first_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}

/// Flush every entry of `pending` and wait until all of them terminated.
#[tracing::instrument(level = "debug", skip_all, fields(flushers = pending.len()))]
pub(crate) async fn flush_all(pending: Vec<PendingFlush>, config: &PipeConfig) -> Result<()> {
    if pending.is_empty() {
        return Ok(());
    }

    let mut nodes: Vec<Node> = pending.iter().map(|_| Node::default()).collect();
    for (index, pf) in pending.iter().enumerate() {
        for &dep in pf.waits_for() {
            // Entries only ever wait on earlier ones, which keeps the graph acyclic.
            debug_assert!(dep < index, "entry {index} waits on later entry {dep}");
            if dep >= index {
                continue;
            }
            nodes[dep].dependents.push(index);
            *nodes[index].waiting_on.get_mut() += 1;
        }
    }

    let run = Arc::new(Run {
        nodes,
        flushers: pending.iter().map(|pf| pf.flusher.clone()).collect(),
        first_error: Mutex::new(None),
        cancel: CancellationToken::new(),
        run_after_failure: config.run_after_failure,
    });

    let mut tasks = JoinSet::new();
    for (index, pf) in pending.into_iter().enumerate() {
        let span = tracing::debug_span!("flush", index, flusher = %pf.name());
        tasks.spawn(run_entry(run.clone(), index, pf).instrument(span));
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            run.fail(PipeError::Panicked(err.to_string()));
        }
    }

    match run.take_error() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

async fn run_entry(run: Arc<Run>, index: usize, pf: PendingFlush) {
    run.wait_ready(index).await;

    if run.cancel.is_cancelled() && !run.run_after_failure {
        tracing::debug!("skipped, run already failed");
    } else {
        tracing::trace!("started");
        let result = AssertUnwindSafe(pf.flusher.flush(pf.context()))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(PipeError::Panicked(panic_message(panic.as_ref()))));
        match result {
            Ok(()) => tracing::trace!("finished"),
            Err(err) => run.fail(err),
        }
    }

    if let Err(err) = pf.release() {
        run.fail(err.into());
    }
    run.complete(index);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
