//! Pipeline state: the live context stages configure, and the snapshots
//! captured for flushers.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::PipeConfig;
use crate::env::Env;
use crate::error::Result;
use crate::flusher::Flusher;
use crate::paths;
use crate::scheduler::{self, PendingFlush};
use crate::stream::{InputStream, OutputStream};

/// Environment for stages to run on.
///
/// Stages receive `&mut State` while a pipeline is built. Streams may be
/// rewired, the directory changed and the environment edited; none of that
/// touches the real process. Work that reads or writes the streams is
/// registered with [`add_flusher`](State::add_flusher) and only runs once
/// [`flush_all`](State::flush_all) is awaited.
#[derive(Debug)]
pub struct State {
    /// Data the pipe reads. Defaults to an empty stream.
    pub stdin: InputStream,
    pub stdout: OutputStream,
    pub stderr: OutputStream,
    /// Directory relative paths are resolved against. Defaults to the
    /// process's current directory; changing it never changes the process's.
    pub dir: PathBuf,
    /// Environment for processes started by the pipe. Defaults to a copy of
    /// the process environment.
    pub env: Env,
    config: PipeConfig,
    pending: Vec<PendingFlush>,
}

/// By-value snapshot of a [`State`] taken when a flusher is registered.
///
/// Later changes to the live state (a following `set_env_var`, a `Line`
/// rewiring stdout for the next stage) do not affect it.
#[derive(Debug, Clone)]
pub struct FlushContext {
    pub stdin: InputStream,
    pub stdout: OutputStream,
    pub stderr: OutputStream,
    pub dir: PathBuf,
    pub env: Env,
}

/// Directory, environment and streams saved on entry to a nested scope.
#[derive(Debug)]
pub(crate) struct SavedScope {
    dir: PathBuf,
    env: Env,
    streams: Option<(InputStream, OutputStream, OutputStream)>,
}

impl State {
    /// New state writing to `stdout` and `stderr`, reading from an empty stdin.
    pub fn new(stdout: OutputStream, stderr: OutputStream) -> Self {
        Self::with_config(stdout, stderr, PipeConfig::default())
    }

    pub fn with_config(stdout: OutputStream, stderr: OutputStream, config: PipeConfig) -> Self {
        let dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            stdin: InputStream::Empty,
            stdout,
            stderr,
            dir,
            env: Env::from_process(),
            config,
            pending: Vec::new(),
        }
    }

    pub fn config(&self) -> &PipeConfig {
        &self.config
    }

    /// Value of the named environment variable, or `""` when unset.
    pub fn env_var(&self, name: &str) -> &str {
        self.env.get(name)
    }

    pub fn set_env_var(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.env.set(name, value);
    }

    /// Resolve `segments` against the current directory.
    ///
    /// See [`paths::resolve`] for the joining rules.
    pub fn path<I, S>(&self, segments: I) -> PathBuf
    where
        I: IntoIterator<Item = S>,
        S: AsRef<Path>,
    {
        paths::resolve(&self.dir, segments)
    }

    /// Capture the current context and register `flusher` to run with it.
    pub fn add_flusher(&mut self, flusher: impl Flusher + 'static) {
        let ctx = self.snapshot();
        tracing::trace!(flusher = flusher.name(), index = self.pending.len(), "registered flusher");
        self.pending.push(PendingFlush::new(Arc::new(flusher), ctx));
    }

    /// By-value copy of the streams, directory and environment.
    pub fn snapshot(&self) -> FlushContext {
        FlushContext {
            stdin: self.stdin.clone(),
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
            dir: self.dir.clone(),
            env: self.env.clone(),
        }
    }

    /// Number of registered flushers not yet flushed.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self) -> &[PendingFlush] {
        &self.pending
    }

    pub(crate) fn pending_range_mut(&mut self, range: Range<usize>) -> &mut [PendingFlush] {
        &mut self.pending[range]
    }

    /// Run every registered flusher concurrently and wait for all of them.
    ///
    /// Returns the first error observed. The registry is empty afterwards,
    /// so the state can be configured and flushed again.
    pub async fn flush_all(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        scheduler::flush_all(pending, &self.config).await
    }

    /// Drop every registered flusher without running it, releasing the
    /// stream endpoints they held.
    pub fn discard_pending(&mut self) -> Result<()> {
        let mut result = Ok(());
        for pf in self.pending.drain(..) {
            if let Err(err) = pf.release()
                && result.is_ok()
            {
                result = Err(err.into());
            }
        }
        result
    }

    /// Save directory and environment for a nested scope.
    pub(crate) fn enter_scope(&self) -> SavedScope {
        SavedScope {
            dir: self.dir.clone(),
            env: self.env.clone(),
            streams: None,
        }
    }

    /// Save directory, environment and streams for a nested scope.
    pub(crate) fn enter_stream_scope(&self) -> SavedScope {
        SavedScope {
            streams: Some((self.stdin.clone(), self.stdout.clone(), self.stderr.clone())),
            ..self.enter_scope()
        }
    }

    pub(crate) fn leave_scope(&mut self, saved: SavedScope) {
        self.dir = saved.dir;
        self.env = saved.env;
        if let Some((stdin, stdout, stderr)) = saved.streams {
            self.stdin = stdin;
            self.stdout = stdout;
            self.stderr = stderr;
        }
    }
}

impl Default for State {
    /// State discarding all output.
    fn default() -> Self {
        Self::new(OutputStream::Discard, OutputStream::Discard)
    }
}

impl FlushContext {
    pub fn env_var(&self, name: &str) -> &str {
        self.env.get(name)
    }

    /// Resolve `segments` against the captured directory.
    pub fn path<I, S>(&self, segments: I) -> PathBuf
    where
        I: IntoIterator<Item = S>,
        S: AsRef<Path>,
    {
        paths::resolve(&self.dir, segments)
    }
}
