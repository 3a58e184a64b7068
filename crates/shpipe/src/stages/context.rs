//! Stages that only change the state: directory, environment and stream
//! wiring. They register no flushers.

use std::os::unix::fs::DirBuilderExt;
use std::path::PathBuf;

use crate::error::{PipeError, Result};
use crate::stage::Stage;
use crate::state::State;

#[derive(Debug, Clone)]
pub struct ChDir {
    dir: PathBuf,
}

/// Change the directory of the enclosing scope. Relative paths are resolved
/// against the current one.
pub fn chdir(dir: impl Into<PathBuf>) -> ChDir {
    ChDir { dir: dir.into() }
}

impl Stage for ChDir {
    fn configure(&self, state: &mut State) -> Result<()> {
        state.dir = state.path([&self.dir]);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MkDir {
    dir: PathBuf,
    mode: u32,
}

/// Create directory `dir` with permission bits `mode` (before the umask).
///
/// The directory is created while the pipeline is configured, so stages
/// after it can rely on it existing. The parent must already exist.
pub fn mkdir(dir: impl Into<PathBuf>, mode: u32) -> MkDir {
    MkDir {
        dir: dir.into(),
        mode,
    }
}

impl Stage for MkDir {
    fn configure(&self, state: &mut State) -> Result<()> {
        let path = state.path([&self.dir]);
        tracing::debug!(path = %path.display(), mode = format_args!("{:o}", self.mode), "mkdir");
        std::fs::DirBuilder::new()
            .mode(self.mode)
            .create(&path)
            .map_err(|e| PipeError::path("mkdir", path, e))
    }
}

#[derive(Debug, Clone)]
pub struct SetEnvVar {
    name: String,
    value: String,
}

/// Set an environment variable for the following stages of the enclosing
/// scope.
pub fn set_env_var(name: impl Into<String>, value: impl Into<String>) -> SetEnvVar {
    SetEnvVar {
        name: name.into(),
        value: value.into(),
    }
}

impl Stage for SetEnvVar {
    fn configure(&self, state: &mut State) -> Result<()> {
        state.set_env_var(self.name.clone(), self.value.clone());
        Ok(())
    }
}

/// Which stream a [`Combine`] stage redirects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone)]
pub struct Combine {
    into: Target,
}

/// Send stdout of the following stages to stderr (`1>&2`).
pub fn combine_to_err() -> Combine {
    Combine {
        into: Target::Stderr,
    }
}

/// Send stderr of the following stages to stdout (`2>&1`).
pub fn combine_to_out() -> Combine {
    Combine {
        into: Target::Stdout,
    }
}

impl Stage for Combine {
    fn configure(&self, state: &mut State) -> Result<()> {
        match self.into {
            Target::Stderr => state.stdout = state.stderr.clone(),
            Target::Stdout => state.stderr = state.stdout.clone(),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{OutputBuffer, OutputStream};
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_chdir_relative_and_absolute() {
        let mut state = State::default();
        state.dir = PathBuf::from("/base");
        chdir("sub").configure(&mut state).unwrap();
        assert_eq!(state.dir, PathBuf::from("/base/sub"));
        chdir("/elsewhere").configure(&mut state).unwrap();
        assert_eq!(state.dir, PathBuf::from("/elsewhere"));
    }

    #[test]
    fn test_mkdir_mode_and_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut state = State::default();
        state.dir = tmp.path().to_path_buf();

        mkdir("made", 0o700).configure(&mut state).unwrap();
        let meta = std::fs::metadata(tmp.path().join("made")).unwrap();
        assert!(meta.is_dir());
        assert_eq!(meta.permissions().mode() & 0o777, 0o700);

        let err = mkdir("made", 0o700).configure(&mut state).unwrap_err();
        assert_eq!(err.io_kind(), Some(std::io::ErrorKind::AlreadyExists));
        assert!(err.to_string().starts_with("mkdir "));
    }

    #[test]
    fn test_set_env_var() {
        let mut state = State::default();
        set_env_var("SHPIPE_CONTEXT", "value").configure(&mut state).unwrap();
        assert_eq!(state.env_var("SHPIPE_CONTEXT"), "value");
    }

    #[test]
    fn test_combine() {
        let out = OutputBuffer::new();
        let err = OutputBuffer::new();

        let mut state = State::new(out.clone().into(), err.clone().into());
        combine_to_err().configure(&mut state).unwrap();
        assert!(state.stdout.same_as(&OutputStream::from(err.clone())));

        let mut state = State::new(out.clone().into(), err.into());
        combine_to_out().configure(&mut state).unwrap();
        assert!(state.stderr.same_as(&OutputStream::from(out)));
    }
}
