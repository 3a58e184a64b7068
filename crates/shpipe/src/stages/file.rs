//! File stages. Paths are resolved against the directory captured when the
//! stage was configured.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::{first_err, PipeError, Result};
use crate::flusher::Flusher;
use crate::stage::Stage;
use crate::state::{FlushContext, State};
use crate::stream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Read,
    Write,
    Append,
    Tee,
}

/// Stage reading or writing a file. See [`read_file`], [`write_file`],
/// [`append_file`] and [`tee_file`].
#[derive(Debug, Clone)]
pub struct FileStage {
    path: PathBuf,
    mode: Mode,
    perm: u32,
}

/// Copy the file at `path` to stdout.
pub fn read_file(path: impl Into<PathBuf>) -> FileStage {
    FileStage {
        path: path.into(),
        mode: Mode::Read,
        perm: 0,
    }
}

/// Copy stdin into the file at `path`, truncating it first. A new file gets
/// permission bits `perm` (before the umask).
pub fn write_file(path: impl Into<PathBuf>, perm: u32) -> FileStage {
    FileStage {
        path: path.into(),
        mode: Mode::Write,
        perm,
    }
}

/// Append stdin to the file at `path`, creating it with `perm` if needed.
pub fn append_file(path: impl Into<PathBuf>, perm: u32) -> FileStage {
    FileStage {
        path: path.into(),
        mode: Mode::Append,
        perm,
    }
}

/// Copy stdin both into the file at `path` (truncated) and to stdout.
pub fn tee_file(path: impl Into<PathBuf>, perm: u32) -> FileStage {
    FileStage {
        path: path.into(),
        mode: Mode::Tee,
        perm,
    }
}

impl FileStage {
    async fn open(&self, path: &Path) -> Result<File> {
        let mut options = OpenOptions::new();
        match self.mode {
            Mode::Read => options.read(true),
            Mode::Write | Mode::Tee => options
                .write(true)
                .create(true)
                .truncate(true)
                .mode(self.perm),
            Mode::Append => options.append(true).create(true).mode(self.perm),
        };
        options
            .open(path)
            .await
            .map_err(|e| PipeError::path("open", path, e))
    }
}

impl Stage for FileStage {
    fn configure(&self, state: &mut State) -> Result<()> {
        state.add_flusher(self.clone());
        Ok(())
    }
}

#[async_trait]
impl Flusher for FileStage {
    fn name(&self) -> &str {
        match self.mode {
            Mode::Read => "read_file",
            Mode::Write => "write_file",
            Mode::Append => "append_file",
            Mode::Tee => "tee_file",
        }
    }

    async fn flush(&self, ctx: &FlushContext) -> Result<()> {
        let path = ctx.path([&self.path]);
        let mut file = self.open(&path).await?;
        tracing::trace!(path = %path.display(), stage = self.name(), "opened");

        let copied = match self.mode {
            Mode::Read => tokio::io::copy(&mut file, &mut ctx.stdout.clone()).await,
            Mode::Write | Mode::Append => tokio::io::copy(&mut ctx.stdin.clone(), &mut file).await,
            Mode::Tee => {
                stream::tee(&mut ctx.stdin.clone(), &mut file, &mut ctx.stdout.clone()).await
            }
        };
        // Writes to a tokio file are only complete once flushed.
        let flushed = match self.mode {
            Mode::Read => Ok(()),
            _ => file.flush().await.map_err(|e| PipeError::path("write", &path, e)),
        };
        first_err(copied.map_err(PipeError::from), flushed)?;
        Ok(())
    }
}
