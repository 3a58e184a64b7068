//! Stream handles carried by a [`State`](crate::State).
//!
//! Handles are cheap to clone and compare by identity: two clones of the same
//! handle refer to the same endpoint, which is how `Line` finds the flushers
//! consuming a junction and how `exec` notices that stdout and stderr are one
//! stream.
//!
//! ```text
//!   InputStream ── Empty | Pipe(junction reader) | Reader(user AsyncRead)
//!   OutputStream ─ Discard | Buffer(OutputBuffer) | Pipe(junction writer)
//!                  | Writer(user AsyncWrite)
//! ```

mod buffer;
mod junction;

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

pub use buffer::OutputBuffer;
pub use junction::{pipe_stream, PipeReader, PipeWriter, WriteTicket, PIPE_BUFFER_SIZE};

type SharedReader = Arc<Mutex<Box<dyn AsyncRead + Send + Unpin>>>;
type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Input side of a pipeline scope.
#[derive(Clone, Default)]
pub enum InputStream {
    /// Immediately at EOF.
    #[default]
    Empty,
    /// Reading end of a `Line` junction.
    Pipe(Arc<PipeReader>),
    /// Caller-provided reader.
    Reader(SharedReader),
}

/// Output side of a pipeline scope.
#[derive(Clone, Default)]
pub enum OutputStream {
    /// Accepts and drops everything.
    #[default]
    Discard,
    /// In-memory buffer.
    Buffer(OutputBuffer),
    /// Writing end of a `Line` junction, with this handle's write in flight.
    Pipe(Arc<PipeWriter>, WriteTicket),
    /// Caller-provided writer.
    Writer(SharedWriter),
}

impl InputStream {
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        InputStream::Reader(Arc::new(Mutex::new(Box::new(reader))))
    }

    /// An input producing exactly `data`, then EOF.
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        Self::from_reader(io::Cursor::new(data.into()))
    }

    pub fn is_empty_stream(&self) -> bool {
        matches!(self, InputStream::Empty)
    }

    /// True when this handle reads from `reader`.
    pub fn is_reader(&self, reader: &Arc<PipeReader>) -> bool {
        matches!(self, InputStream::Pipe(r) if Arc::ptr_eq(r, reader))
    }

    /// Identity comparison.
    pub fn same_as(&self, other: &InputStream) -> bool {
        match (self, other) {
            (InputStream::Empty, InputStream::Empty) => true,
            (InputStream::Pipe(a), InputStream::Pipe(b)) => Arc::ptr_eq(a, b),
            (InputStream::Reader(a), InputStream::Reader(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl OutputStream {
    pub fn from_writer<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        OutputStream::Writer(Arc::new(Mutex::new(Box::new(writer))))
    }

    /// Handle writing into a junction.
    pub fn pipe(writer: Arc<PipeWriter>) -> Self {
        OutputStream::Pipe(writer, WriteTicket::default())
    }

    pub fn is_discard(&self) -> bool {
        matches!(self, OutputStream::Discard)
    }

    /// True when this handle writes into `writer`.
    pub fn is_writer(&self, writer: &Arc<PipeWriter>) -> bool {
        matches!(self, OutputStream::Pipe(w, _) if Arc::ptr_eq(w, writer))
    }

    /// Identity comparison. Two `Discard` handles count as the same sink.
    pub fn same_as(&self, other: &OutputStream) -> bool {
        match (self, other) {
            (OutputStream::Discard, OutputStream::Discard) => true,
            (OutputStream::Buffer(a), OutputStream::Buffer(b)) => a.same_as(b),
            (OutputStream::Pipe(a, _), OutputStream::Pipe(b, _)) => Arc::ptr_eq(a, b),
            (OutputStream::Writer(a), OutputStream::Writer(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<OutputBuffer> for OutputStream {
    fn from(buffer: OutputBuffer) -> Self {
        OutputStream::Buffer(buffer)
    }
}

impl AsyncRead for InputStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            InputStream::Empty => Poll::Ready(Ok(())),
            InputStream::Pipe(reader) => reader.poll_read_bytes(cx, buf),
            InputStream::Reader(reader) => {
                let mut guard = reader.lock().unwrap_or_else(|e| e.into_inner());
                Pin::new(&mut **guard).poll_read(cx, buf)
            }
        }
    }
}

impl AsyncWrite for OutputStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            OutputStream::Discard => Poll::Ready(Ok(buf.len())),
            OutputStream::Buffer(buffer) => {
                buffer.append(buf);
                Poll::Ready(Ok(buf.len()))
            }
            OutputStream::Pipe(writer, ticket) => writer.poll_write_bytes(cx, buf, ticket),
            OutputStream::Writer(writer) => {
                let mut guard = writer.lock().unwrap_or_else(|e| e.into_inner());
                Pin::new(&mut **guard).poll_write(cx, buf)
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            OutputStream::Writer(writer) => {
                let mut guard = writer.lock().unwrap_or_else(|e| e.into_inner());
                Pin::new(&mut **guard).poll_flush(cx)
            }
            _ => Poll::Ready(Ok(())),
        }
    }

    /// Only flushes. Shared endpoints are closed by their `RefCloser`, never
    /// by one of the flushers writing to them.
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.poll_flush(cx)
    }
}

impl fmt::Debug for InputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputStream::Empty => f.write_str("InputStream::Empty"),
            InputStream::Pipe(r) => f.debug_tuple("InputStream::Pipe").field(r).finish(),
            InputStream::Reader(_) => f.write_str("InputStream::Reader"),
        }
    }
}

impl fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Discard => f.write_str("OutputStream::Discard"),
            OutputStream::Buffer(b) => f.debug_tuple("OutputStream::Buffer").field(b).finish(),
            OutputStream::Pipe(w, _) => f.debug_tuple("OutputStream::Pipe").field(w).finish(),
            OutputStream::Writer(_) => f.write_str("OutputStream::Writer"),
        }
    }
}

const COPY_CHUNK: usize = 32 * 1024;

/// Copy `input` to both `primary` and `secondary` until EOF.
///
/// Each chunk is written to `primary` first.
pub(crate) async fn tee<R, W1, W2>(
    input: &mut R,
    primary: &mut W1,
    secondary: &mut W2,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W1: AsyncWrite + Unpin + ?Sized,
    W2: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut total = 0u64;
    loop {
        let n = input.read(&mut buf).await?;
        if n == 0 {
            primary.flush().await?;
            secondary.flush().await?;
            return Ok(total);
        }
        primary.write_all(&buf[..n]).await?;
        secondary.write_all(&buf[..n]).await?;
        total += n as u64;
    }
}
