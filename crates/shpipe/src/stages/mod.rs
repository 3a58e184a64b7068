//! Built-in stages.
//!
//! - **context**: `chdir`, `mkdir`, `set_env_var`, `combine_to_err`,
//!   `combine_to_out` change the state while the pipeline is configured.
//! - **io**: `echo`, `read`, `write`, `discard`, `tee` copy between streams.
//! - **file**: `read_file`, `write_file`, `append_file`, `tee_file`.
//! - **lines**: `filter` and `replace` transform stdin line by line.
//! - **process**: `exec` and `system` run external programs.

mod context;
mod file;
mod io;
mod lines;
mod process;

pub use context::{
    chdir, combine_to_err, combine_to_out, mkdir, set_env_var, ChDir, Combine, MkDir, SetEnvVar,
};
pub use file::{append_file, read_file, tee_file, write_file, FileStage};
pub use io::{discard, echo, read, tee, write, Echo, Transfer};
pub use lines::{filter, replace, Filter, Replace};
pub use process::{exec, system, Exec};
