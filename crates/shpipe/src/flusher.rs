//! The deferred-work half of the stage/flusher contract.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::stage::Stage;
use crate::state::{FlushContext, State};

/// A unit of deferred work registered by a stage and run by
/// [`State::flush_all`] concurrently with every other registered flusher.
///
/// `flush` moves data between the captured streams (or waits on whatever
/// external work it started) and must only return once that work has
/// completely finished. `kill` asks an in-flight `flush` to stop early. It
/// may be called before `flush` starts, while it runs, after it returned, or
/// more than once, and must never block. Flushers that only read and write
/// their streams can keep the default no-op `kill`: closing the junctions
/// they use unblocks them.
#[async_trait]
pub trait Flusher: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str {
        "flusher"
    }

    async fn flush(&self, ctx: &FlushContext) -> Result<()>;

    fn kill(&self) {}
}

#[async_trait]
impl<T: Flusher + ?Sized> Flusher for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn flush(&self, ctx: &FlushContext) -> Result<()> {
        (**self).flush(ctx).await
    }

    fn kill(&self) {
        (**self).kill()
    }
}

/// Flusher running an async closure over an owned copy of its context.
pub struct FlushFn<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Flusher for FlushFn<F>
where
    F: Fn(FlushContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn name(&self) -> &str {
        "flush_fn"
    }

    async fn flush(&self, ctx: &FlushContext) -> Result<()> {
        (self.f)(ctx.clone()).await
    }
}

/// Stage registering `f` as a flusher each time it is configured.
///
/// ```no_run
/// use shpipe::{flush_fn, output};
/// use tokio::io::AsyncWriteExt;
///
/// # async fn demo() -> shpipe::Result<()> {
/// let stage = flush_fn(|mut ctx| async move {
///     ctx.stdout.write_all(b"hi").await?;
///     Ok::<_, shpipe::PipeError>(())
/// });
/// assert_eq!(output(&stage).await?, b"hi");
/// # Ok(())
/// # }
/// ```
pub fn flush_fn<F, Fut>(f: F) -> FlushFnStage<F>
where
    F: Fn(FlushContext) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    FlushFnStage { f }
}

/// Stage returned by [`flush_fn`].
#[derive(Clone)]
pub struct FlushFnStage<F> {
    f: F,
}

impl<F, Fut> Stage for FlushFnStage<F>
where
    F: Fn(FlushContext) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn configure(&self, state: &mut State) -> Result<()> {
        state.add_flusher(FlushFn { f: self.f.clone() });
        Ok(())
    }
}
