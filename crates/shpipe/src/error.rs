//! Error types for pipeline configuration and flushing.

use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Result type used throughout shpipe.
pub type Result<T> = std::result::Result<T, PipeError>;

/// Errors raised while configuring or flushing a pipeline.
#[derive(Debug, Error)]
pub enum PipeError {
    /// Plain stream I/O failure (including broken pipes on junctions).
    #[error(transparent)]
    Io(#[from] io::Error),

    /// A filesystem operation on a resolved path failed.
    #[error("{op} {}: {source}", path.display())]
    Path {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The external program could not be started.
    #[error("exec {name:?}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    /// The external program started but did not finish cleanly.
    #[error("command {name:?}: {cause}")]
    Command {
        name: String,
        #[source]
        cause: CommandFailure,
    },

    /// A flusher was killed before it got to start its work.
    #[error("{name}: killed before start")]
    Killed { name: String },

    /// A flusher panicked while flushing.
    #[error("flusher panicked: {0}")]
    Panicked(String),

    /// Error raised by a user-defined stage or flusher.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Why a started command failed.
#[derive(Debug, Error)]
pub enum CommandFailure {
    #[error("{0}")]
    Exit(ExitStatus),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl PipeError {
    /// Wrap an I/O error together with the operation and path that caused it.
    pub fn path(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        PipeError::Path {
            op,
            path: path.into(),
            source,
        }
    }

    /// The underlying I/O error kind, if this error came from I/O.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            PipeError::Io(e) => Some(e.kind()),
            PipeError::Path { source, .. } | PipeError::Spawn { source, .. } => Some(source.kind()),
            PipeError::Command {
                cause: CommandFailure::Io(e),
                ..
            } => Some(e.kind()),
            _ => None,
        }
    }

    /// True when the failure is a write to a stream nobody reads anymore.
    pub fn is_broken_pipe(&self) -> bool {
        self.io_kind() == Some(io::ErrorKind::BrokenPipe)
    }
}

/// Keep the first error, falling back to the second.
pub(crate) fn first_err<T>(primary: Result<T>, secondary: Result<()>) -> Result<T> {
    match (primary, secondary) {
        (Err(e), _) => Err(e),
        (Ok(_), Err(e)) => Err(e),
        (Ok(v), Ok(())) => Ok(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_error_format() {
        let err = PipeError::Command {
            name: "true".to_string(),
            cause: CommandFailure::Io(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe")),
        };
        assert_eq!(err.to_string(), r#"command "true": broken pipe"#);
        assert!(err.is_broken_pipe());
    }

    #[test]
    fn test_path_error_format() {
        let err = PipeError::path(
            "open",
            "/tmp/x/file",
            io::Error::new(io::ErrorKind::NotFound, "no such file or directory"),
        );
        assert_eq!(err.to_string(), "open /tmp/x/file: no such file or directory");
        assert_eq!(err.io_kind(), Some(io::ErrorKind::NotFound));
    }

    #[test]
    fn test_first_err() {
        let a: Result<u8> = Err(PipeError::Panicked("a".into()));
        let b: Result<()> = Err(PipeError::Panicked("b".into()));
        assert!(matches!(first_err(a, b), Err(PipeError::Panicked(m)) if m == "a"));

        let b: Result<()> = Err(PipeError::Panicked("b".into()));
        assert!(matches!(first_err(Ok(1u8), b), Err(PipeError::Panicked(m)) if m == "b"));
        assert_eq!(first_err(Ok(1u8), Ok(())).ok(), Some(1));
    }
}
