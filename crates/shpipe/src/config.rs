//! Tunables shared by every scope of a pipeline run.

/// Configuration carried by a [`State`](crate::State) for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeConfig {
    /// Bytes buffered in each junction between two `Line` stages before the
    /// upstream writer has to wait for the downstream reader. 0 (default)
    /// makes every write wait until the reader has taken it.
    pub junction_capacity: usize,

    /// When false (default), flushers still waiting on their dependencies
    /// when a run fails are skipped instead of started.
    pub run_after_failure: bool,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            junction_capacity: 0,
            run_after_failure: false,
        }
    }
}

impl PipeConfig {
    /// Let junctions buffer up to `capacity` bytes. Data still queued when a
    /// reader stops consuming is lost without failing its writer.
    pub fn with_junction_capacity(mut self, capacity: usize) -> Self {
        self.junction_capacity = capacity;
        self
    }

    /// Start dependent flushers even after another flusher has failed.
    pub fn with_run_after_failure(mut self, run: bool) -> Self {
        self.run_after_failure = run;
        self
    }
}
