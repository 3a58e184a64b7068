//! Configure-and-flush helpers.

use crate::error::{first_err, Result};
use crate::stage::Stage;
use crate::state::State;
use crate::stream::{OutputBuffer, OutputStream};

/// Configure `stage` into `state` and flush everything registered.
///
/// When configuration fails nothing is flushed: the registered flushers are
/// dropped, releasing their endpoints, and the configuration error returned.
pub async fn run_in<S: Stage + ?Sized>(stage: &S, state: &mut State) -> Result<()> {
    if let Err(err) = stage.configure(state) {
        tracing::debug!(error = %err, "configuration failed");
        return first_err(Err(err), state.discard_pending());
    }
    state.flush_all().await
}

/// Run `stage`, discarding its output.
pub async fn run<S: Stage + ?Sized>(stage: &S) -> Result<()> {
    run_in(stage, &mut State::default()).await
}

/// Run `stage` and return what it wrote to stdout. Stderr is discarded.
pub async fn output<S: Stage + ?Sized>(stage: &S) -> Result<Vec<u8>> {
    let out = OutputBuffer::new();
    run_in(stage, &mut State::new(out.clone().into(), OutputStream::Discard)).await?;
    Ok(out.bytes())
}

/// Run `stage` and return stdout and stderr interleaved in one buffer.
pub async fn combined_output<S: Stage + ?Sized>(stage: &S) -> Result<Vec<u8>> {
    let out = OutputBuffer::new();
    run_in(stage, &mut State::new(out.clone().into(), out.clone().into())).await?;
    Ok(out.bytes())
}

/// Run `stage` and return stdout and stderr separately.
pub async fn disjoint_output<S: Stage + ?Sized>(stage: &S) -> Result<(Vec<u8>, Vec<u8>)> {
    let out = OutputBuffer::new();
    let err = OutputBuffer::new();
    run_in(stage, &mut State::new(out.clone().into(), err.clone().into())).await?;
    Ok((out.bytes(), err.bytes()))
}
