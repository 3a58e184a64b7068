//! Pipeline composition.

use std::fmt;
use std::sync::Arc;

use crate::error::{first_err, Result};
use crate::scheduler::{Close, PendingFlush, RefCloser};
use crate::stage::{BoxedStage, Stage};
use crate::state::State;
use crate::stream::{pipe_stream, InputStream, OutputStream, PipeReader};

/// Connects stages like a shell pipeline.
///
/// Stage *i*'s stdout feeds stage *i + 1*'s stdin through an in-memory
/// junction; the last stage writes to the line's stdout. Every stage starts
/// with the line's stderr. Directory, environment and streams are restored
/// when the line's configuration returns.
///
/// ```text
///   stdin ──▶ [stage 0] ──junction──▶ [stage 1] ──junction──▶ [stage 2] ──▶ stdout
///                 │                       │                       │
///                 └──────────── stderr ───┴───────────────────────┘
/// ```
///
/// Each junction end is shut down by a [`RefCloser`] shared by every flusher
/// that captured it, so a writer's data is never cut short while a reader
/// still consumes it, and a reader that stops early makes the writer fail
/// with a broken pipe instead of blocking forever.
pub struct Line {
    stages: Vec<BoxedStage>,
}

/// One end of a junction together with its closer.
struct End<T> {
    endpoint: Arc<T>,
    closer: Arc<RefCloser>,
}

impl<T: Close + 'static> End<T> {
    fn new(endpoint: T) -> Self {
        let endpoint = Arc::new(endpoint);
        let closer = Arc::new(RefCloser::new(endpoint.clone()));
        Self { endpoint, closer }
    }

    /// Make `pf` a holder of this end.
    fn attach(&self, pf: &mut PendingFlush) {
        self.closer.retain();
        pf.close_when_done(self.closer.clone());
    }

    /// Drop the composer's own hold.
    fn release(&self) -> Result<()> {
        Ok(self.closer.release()?)
    }
}

impl Line {
    pub fn new(stages: Vec<BoxedStage>) -> Self {
        Self { stages }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    fn configure_stages(&self, state: &mut State) -> Result<()> {
        let end = state.stdout.clone();
        let stderr = state.stderr.clone();
        let capacity = state.config().junction_capacity;
        let last = self.stages.len().saturating_sub(1);

        let mut upstream: Option<End<PipeReader>> = None;
        for (position, stage) in self.stages.iter().enumerate() {
            let downstream = if position < last {
                let (writer, reader) = pipe_stream(capacity);
                let writer = End::new(writer);
                state.stdout = OutputStream::pipe(writer.endpoint.clone());
                Some((writer, reader))
            } else {
                state.stdout = end.clone();
                None
            };
            state.stderr = stderr.clone();

            let before = state.pending_len();
            if let Err(err) = stage.configure(state) {
                tracing::debug!(position, error = %err, "line stage failed to configure");
                let mut result = Err(err);
                if let Some(reader) = &upstream {
                    result = first_err(result, reader.release());
                }
                if let Some((writer, _)) = &downstream {
                    result = first_err(result, writer.release());
                }
                return result;
            }
            let after = state.pending_len();
            tracing::trace!(position, registered = after - before, "line stage configured");

            for pf in state.pending_range_mut(before..after) {
                let ctx = pf.context();
                let reads_upstream = upstream
                    .as_ref()
                    .is_some_and(|r| ctx.stdin.is_reader(&r.endpoint));
                let (writes_out, writes_err) = match &downstream {
                    Some((w, _)) => (
                        ctx.stdout.is_writer(&w.endpoint),
                        ctx.stderr.is_writer(&w.endpoint),
                    ),
                    None => (false, false),
                };

                if let Some(reader) = upstream.as_ref().filter(|_| reads_upstream) {
                    reader.attach(pf);
                }
                if let Some((writer, _)) = &downstream {
                    if writes_out {
                        writer.attach(pf);
                    }
                    if writes_err {
                        writer.attach(pf);
                    }
                }
            }

            let mut result = Ok(());
            if let Some(reader) = upstream.take() {
                result = first_err(result, reader.release());
            }
            if let Some((writer, reader)) = downstream {
                result = first_err(result, writer.release());
                let reader = End::new(reader);
                state.stdin = InputStream::Pipe(reader.endpoint.clone());
                upstream = Some(reader);
            }
            result?;
        }
        Ok(())
    }
}

impl Stage for Line {
    fn configure(&self, state: &mut State) -> Result<()> {
        let saved = state.enter_stream_scope();
        let result = self.configure_stages(state);
        state.leave_scope(saved);
        result
    }
}

impl fmt::Debug for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Line")
            .field("stages", &self.stages.len())
            .finish()
    }
}
