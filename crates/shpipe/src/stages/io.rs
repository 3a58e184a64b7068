//! In-process stages moving bytes between the state's streams and
//! caller-provided ones.

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::Result;
use crate::flusher::Flusher;
use crate::stage::Stage;
use crate::state::{FlushContext, State};
use crate::stream::{self, InputStream, OutputStream};

/// Stage writing a fixed text to stdout. See [`echo`].
#[derive(Debug, Clone)]
pub struct Echo {
    text: String,
}

/// Write `text` to stdout, as-is.
pub fn echo(text: impl Into<String>) -> Echo {
    Echo { text: text.into() }
}

impl Stage for Echo {
    fn configure(&self, state: &mut State) -> Result<()> {
        state.add_flusher(self.clone());
        Ok(())
    }
}

#[async_trait]
impl Flusher for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    async fn flush(&self, ctx: &FlushContext) -> Result<()> {
        let mut out = ctx.stdout.clone();
        out.write_all(self.text.as_bytes()).await?;
        out.flush().await?;
        Ok(())
    }
}

/// Which way a [`Transfer`] stage moves data.
#[derive(Debug, Clone)]
enum Direction {
    /// From a caller-provided input to stdout.
    In(InputStream),
    /// From stdin to a caller-provided output.
    Out(OutputStream),
    /// From stdin to a caller-provided output and to stdout.
    Tee(OutputStream),
}

/// Stage copying between the state's streams and a caller-provided one.
#[derive(Debug, Clone)]
pub struct Transfer {
    direction: Direction,
}

/// Copy `input` to stdout. The state's stdin is ignored.
pub fn read(input: InputStream) -> Transfer {
    Transfer {
        direction: Direction::In(input),
    }
}

/// Copy stdin to `output`. Nothing is written to stdout.
pub fn write(output: impl Into<OutputStream>) -> Transfer {
    Transfer {
        direction: Direction::Out(output.into()),
    }
}

/// Consume stdin, dropping it.
pub fn discard() -> Transfer {
    write(OutputStream::Discard)
}

/// Copy stdin to both `output` and stdout.
pub fn tee(output: impl Into<OutputStream>) -> Transfer {
    Transfer {
        direction: Direction::Tee(output.into()),
    }
}

impl Stage for Transfer {
    fn configure(&self, state: &mut State) -> Result<()> {
        state.add_flusher(self.clone());
        Ok(())
    }
}

#[async_trait]
impl Flusher for Transfer {
    fn name(&self) -> &str {
        match self.direction {
            Direction::In(_) => "read",
            Direction::Out(_) => "write",
            Direction::Tee(_) => "tee",
        }
    }

    async fn flush(&self, ctx: &FlushContext) -> Result<()> {
        match &self.direction {
            Direction::In(input) => {
                tokio::io::copy(&mut input.clone(), &mut ctx.stdout.clone()).await?;
            }
            Direction::Out(output) => {
                tokio::io::copy(&mut ctx.stdin.clone(), &mut output.clone()).await?;
            }
            Direction::Tee(output) => {
                stream::tee(&mut ctx.stdin.clone(), &mut output.clone(), &mut ctx.stdout.clone())
                    .await?;
            }
        }
        Ok(())
    }
}
