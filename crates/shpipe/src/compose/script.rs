//! Sequential composition.

use std::fmt;

use crate::error::Result;
use crate::stage::{BoxedStage, Stage};
use crate::state::State;

/// Runs stages one after the other.
///
/// Directory and environment changes made by the stages are visible to the
/// following stages and undone when the script's configuration returns.
/// Everything a stage registers waits for everything registered by the
/// earlier stages of the same script, so side effects happen in stage order
/// even though all flushers of a pipeline run under one
/// [`flush_all`](State::flush_all).
pub struct Script {
    stages: Vec<BoxedStage>,
}

impl Script {
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
        let start = state.pending_len();
        for (position, stage) in self.stages.iter().enumerate() {
            let before = state.pending_len();
            stage.configure(state)?;
            let after = state.pending_len();
            tracing::trace!(position, registered = after - before, "script stage configured");

            for pf in state.pending_range_mut(before..after) {
                for earlier in start..before {
                    pf.wait_for(earlier);
                }
            }
        }
        Ok(())
    }
}

impl Stage for Script {
    fn configure(&self, state: &mut State) -> Result<()> {
        let saved = state.enter_scope();
        let result = self.configure_stages(state);
        state.leave_scope(saved);
        result
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Script")
            .field("stages", &self.stages.len())
            .finish()
    }
}
