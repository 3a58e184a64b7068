//! The configuration half of the stage/flusher contract.

use crate::error::Result;
use crate::state::State;

/// A pipeline configuration step.
///
/// `configure` runs synchronously while the pipeline is being built. It may
/// change the state's directory, environment or streams, and it may register
/// flushers that do the real work later. It must not read or write the
/// streams itself. A stage keeps no hidden state between calls, so the same
/// stage value can be configured into several pipelines.
pub trait Stage: Send + Sync {
    fn configure(&self, state: &mut State) -> Result<()>;
}

/// Owned, type-erased stage as taken by [`Script`](crate::Script) and
/// [`Line`](crate::Line).
pub type BoxedStage = Box<dyn Stage>;

impl<S: Stage + ?Sized> Stage for Box<S> {
    fn configure(&self, state: &mut State) -> Result<()> {
        (**self).configure(state)
    }
}

impl<S: Stage + ?Sized> Stage for &S {
    fn configure(&self, state: &mut State) -> Result<()> {
        (**self).configure(state)
    }
}

/// Stage built from a configuration closure.
pub struct StageFn<F> {
    f: F,
}

/// Wrap a closure as a [`Stage`].
pub fn stage_fn<F>(f: F) -> StageFn<F>
where
    F: Fn(&mut State) -> Result<()> + Send + Sync,
{
    StageFn { f }
}

impl<F> Stage for StageFn<F>
where
    F: Fn(&mut State) -> Result<()> + Send + Sync,
{
    fn configure(&self, state: &mut State) -> Result<()> {
        (self.f)(state)
    }
}

/// Build a [`Line`](crate::Line) from stages of different types.
///
/// ```no_run
/// use shpipe::{echo, exec, pipeline};
/// let stage = pipeline![echo("hello"), exec("sed", ["s/l/k/g"])];
/// ```
#[macro_export]
macro_rules! pipeline {
    ($($stage:expr),* $(,)?) => {
        $crate::Line::new(::std::vec![$(::std::boxed::Box::new($stage) as $crate::BoxedStage),*])
    };
}

/// Build a [`Script`](crate::Script) from stages of different types.
///
/// ```no_run
/// use shpipe::{chdir, script, system};
/// let stage = script![chdir("/tmp"), system("pwd")];
/// ```
#[macro_export]
macro_rules! script {
    ($($stage:expr),* $(,)?) => {
        $crate::Script::new(::std::vec![$(::std::boxed::Box::new($stage) as $crate::BoxedStage),*])
    };
}
