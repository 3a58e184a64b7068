//! shpipe: Unix-like pipelines of processes and in-process stages.
//!
//! Building a pipeline and running it are separate phases:
//!
//! - **Configure**: a [`Stage`] receives `&mut State` and rewires streams,
//!   changes the directory or environment, and registers [`Flusher`]s.
//!   This is synchronous and touches nothing outside the state.
//! - **Flush**: [`State::flush_all`] runs every registered flusher
//!   concurrently, honouring the ordering [`Script`] asks for, and returns the
//!   first error. Any failure kills every other flusher.
//!
//! Composers:
//!
//! - **[`Line`]**: stage outputs feed the next stage's input, like `a | b | c`
//! - **[`Script`]**: stages run in sequence, like `a; b; c`
//!
//! Both scope the directory and environment, so a nested `chdir` or
//! `set_env_var` never leaks into the enclosing composition.
//!
//! ```no_run
//! use shpipe::{output, pipeline, script, echo, exec, set_env_var, system};
//!
//! # async fn demo() -> shpipe::Result<()> {
//! let stage = script![
//!     set_env_var("GREETING", "hello"),
//!     pipeline![system("echo $GREETING"), exec("sed", ["s/l/k/g"])],
//!     echo("done\n"),
//! ];
//! assert_eq!(output(&stage).await?, b"hekko\ndone\n");
//! # Ok(())
//! # }
//! ```

pub mod compose;
pub mod config;
pub mod env;
pub mod error;
pub mod flusher;
pub mod paths;
pub mod run;
pub mod scheduler;
pub mod stage;
pub mod stages;
pub mod state;
pub mod stream;

pub use compose::{Line, Script};
pub use config::PipeConfig;
pub use env::Env;
pub use error::{CommandFailure, PipeError, Result};
pub use flusher::{flush_fn, Flusher};
pub use run::{combined_output, disjoint_output, output, run, run_in};
pub use scheduler::{Close, PendingFlush, RefCloser};
pub use stage::{stage_fn, BoxedStage, Stage};
pub use state::{FlushContext, State};
pub use stream::{InputStream, OutputBuffer, OutputStream};

pub use stages::{
    append_file, chdir, combine_to_err, combine_to_out, discard, echo, exec, filter, mkdir, read,
    read_file, replace, set_env_var, system, tee, tee_file, write, write_file,
};
