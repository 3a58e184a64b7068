//! In-memory byte pipe joining two adjacent `Line` stages.
//!
//! ```text
//!   PipeWriter ──▶ [VecDeque<u8>] ──▶ PipeReader
//!                  ├── capacity 0: a write completes once the reader took all of it
//!                  ├── capacity n: writers wait while n bytes are buffered
//!                  ├── readers wait while empty
//!                  ├── close writer → EOF once drained
//!                  └── close reader → broken pipe for every writer
//! ```
//!
//! Both ends are shared by reference between flushers, so every operation
//! takes `&self` and closing is an explicit, idempotent call rather than a
//! drop. Several flushers may wait on the same end at once (a stage whose
//! stdout and stderr both feed one junction), so wakers are kept in lists.
//! Closed flags are atomics set before taking the lock and read under it, so
//! a close racing a waiting writer can never be missed.
//!
//! With capacity 0 only one write is in flight at a time. Its bytes are staged
//! in the queue and the writing handle keeps a [`WriteTicket`] until the
//! reader has taken them; a reader close while they are staged fails that
//! write with `BrokenPipe`.

use std::collections::VecDeque;
use std::fmt;
use std::future::poll_fn;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};

use tokio::io::ReadBuf;

use crate::scheduler::Close;

/// Largest single write handed to the reader at capacity 0, and the size of
/// a Linux kernel pipe for callers that opt into buffering.
pub const PIPE_BUFFER_SIZE: usize = 64 * 1024;

struct PipeBuffer {
    buffer: VecDeque<u8>,
    capacity: usize,
    /// Ticket of the write whose bytes are queued, at capacity 0.
    staged: Option<u64>,
    next_ticket: u64,
    reader_wakers: Vec<Waker>,
    writer_wakers: Vec<Waker>,
}

struct PipeShared {
    buf: Mutex<PipeBuffer>,
    writer_closed: AtomicBool,
    reader_closed: AtomicBool,
}

impl PipeShared {
    fn lock(&self) -> MutexGuard<'_, PipeBuffer> {
        self.buf.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Writing end of a junction.
pub struct PipeWriter {
    shared: Arc<PipeShared>,
}

/// Reading end of a junction.
pub struct PipeReader {
    shared: Arc<PipeShared>,
}

/// Handoff in progress for one writing handle.
///
/// Kept by the handle between polls of the same write. A clone starts with
/// no write in flight.
#[derive(Debug, Default)]
pub struct WriteTicket(Option<(u64, usize)>);

impl Clone for WriteTicket {
    fn clone(&self) -> Self {
        Self::default()
    }
}

/// Create a junction. Capacity 0 makes every write a synchronous handoff.
pub fn pipe_stream(capacity: usize) -> (PipeWriter, PipeReader) {
    let shared = Arc::new(PipeShared {
        buf: Mutex::new(PipeBuffer {
            buffer: VecDeque::with_capacity(capacity.min(8192)),
            capacity,
            staged: None,
            next_ticket: 0,
            reader_wakers: Vec::new(),
            writer_wakers: Vec::new(),
        }),
        writer_closed: AtomicBool::new(false),
        reader_closed: AtomicBool::new(false),
    });

    (
        PipeWriter {
            shared: shared.clone(),
        },
        PipeReader { shared },
    )
}

fn register(wakers: &mut Vec<Waker>, cx: &Context<'_>) {
    if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
        wakers.push(cx.waker().clone());
    }
}

fn wake_all(wakers: &mut Vec<Waker>) {
    for waker in wakers.drain(..) {
        waker.wake();
    }
}

fn broken_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader closed")
}

impl PipeWriter {
    /// Write part of `buf`.
    ///
    /// At capacity 0 the bytes are queued on the first poll and the write
    /// stays pending until the reader has taken all of them; `ticket` must be
    /// passed back unchanged on every poll of the same write. Otherwise as
    /// much as fits is buffered, waiting while the buffer is full.
    ///
    /// Fails with `BrokenPipe` once the reader is closed.
    pub fn poll_write_bytes(
        &self,
        cx: &mut Context<'_>,
        buf: &[u8],
        ticket: &mut WriteTicket,
    ) -> Poll<io::Result<usize>> {
        let mut inner = self.shared.lock();

        if let Some((id, n)) = ticket.0 {
            if inner.staged != Some(id) {
                ticket.0 = None;
                return Poll::Ready(Ok(n));
            }
            if self.shared.reader_closed.load(Ordering::Acquire) {
                inner.staged = None;
                ticket.0 = None;
                wake_all(&mut inner.writer_wakers);
                return Poll::Ready(Err(broken_pipe()));
            }
            register(&mut inner.writer_wakers, cx);
            return Poll::Pending;
        }

        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        if self.shared.reader_closed.load(Ordering::Acquire) {
            return Poll::Ready(Err(broken_pipe()));
        }
        if self.shared.writer_closed.load(Ordering::Acquire) {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write on closed pipe",
            )));
        }

        if inner.capacity == 0 {
            if inner.staged.is_none() {
                let n = buf.len().min(PIPE_BUFFER_SIZE);
                let id = inner.next_ticket;
                inner.next_ticket += 1;
                inner.buffer.extend(&buf[..n]);
                inner.staged = Some(id);
                ticket.0 = Some((id, n));
                wake_all(&mut inner.reader_wakers);
            }
            register(&mut inner.writer_wakers, cx);
            return Poll::Pending;
        }

        let available = inner.capacity.saturating_sub(inner.buffer.len());
        if available > 0 {
            let n = buf.len().min(available);
            inner.buffer.extend(&buf[..n]);
            wake_all(&mut inner.reader_wakers);
            Poll::Ready(Ok(n))
        } else {
            register(&mut inner.writer_wakers, cx);
            Poll::Pending
        }
    }

    /// Write part of `data`, returning how many bytes were accepted.
    pub async fn write_bytes(&self, data: &[u8]) -> io::Result<usize> {
        let mut ticket = WriteTicket::default();
        poll_fn(|cx| self.poll_write_bytes(cx, data, &mut ticket)).await
    }

    /// Write all of `data`.
    pub async fn write_all_bytes(&self, mut data: &[u8]) -> io::Result<()> {
        while !data.is_empty() {
            let n = self.write_bytes(data).await?;
            data = &data[n..];
        }
        Ok(())
    }

    /// Signal EOF to the reader. Idempotent.
    pub fn close(&self) {
        if self.shared.writer_closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut inner = self.shared.lock();
        wake_all(&mut inner.reader_wakers);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.writer_closed.load(Ordering::Acquire)
    }
}

impl PipeReader {
    /// Read queued bytes into `buf`, waiting while the pipe is empty.
    ///
    /// Leaves `buf` untouched at EOF (writer closed and buffer drained).
    pub fn poll_read_bytes(
        &self,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.shared.reader_closed.load(Ordering::Acquire) {
            return Poll::Ready(Ok(()));
        }

        let mut inner = self.shared.lock();

        if !inner.buffer.is_empty() {
            let n = buf.remaining().min(inner.buffer.len());
            let (front, back) = inner.buffer.as_slices();
            if n <= front.len() {
                buf.put_slice(&front[..n]);
            } else {
                buf.put_slice(front);
                buf.put_slice(&back[..n - front.len()]);
            }
            inner.buffer.drain(..n);
            if inner.buffer.is_empty() {
                inner.staged = None;
            }
            wake_all(&mut inner.writer_wakers);
            Poll::Ready(Ok(()))
        } else if self.shared.writer_closed.load(Ordering::Acquire) {
            Poll::Ready(Ok(()))
        } else {
            register(&mut inner.reader_wakers, cx);
            Poll::Pending
        }
    }

    /// Read into `dst`, returning 0 at EOF.
    pub async fn read_bytes(&self, dst: &mut [u8]) -> io::Result<usize> {
        let mut buf = ReadBuf::new(dst);
        poll_fn(|cx| self.poll_read_bytes(cx, &mut buf)).await?;
        Ok(buf.filled().len())
    }

    /// Stop consuming: pending and future writes fail with `BrokenPipe`. Idempotent.
    ///
    /// Queued bytes are dropped. A staged handoff keeps its ticket so the
    /// write that queued them reports the failure.
    pub fn close(&self) {
        if self.shared.reader_closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut inner = self.shared.lock();
        inner.buffer.clear();
        wake_all(&mut inner.writer_wakers);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.reader_closed.load(Ordering::Acquire)
    }
}

impl Close for PipeWriter {
    fn close(&self) -> io::Result<()> {
        PipeWriter::close(self);
        Ok(())
    }
}

impl Close for PipeReader {
    fn close(&self) -> io::Result<()> {
        PipeReader::close(self);
        Ok(())
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        PipeWriter::close(self);
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        PipeReader::close(self);
    }
}

impl fmt::Debug for PipeWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeWriter")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl fmt::Debug for PipeReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeReader")
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn read_all(reader: &PipeReader) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 128];
        loop {
            let n = reader.read_bytes(&mut buf).await.unwrap();
            if n == 0 {
                return out;
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    #[tokio::test]
    async fn test_basic_write_read() {
        let (writer, reader) = pipe_stream(1024);

        writer.write_all_bytes(b"hello").await.unwrap();
        writer.close();

        assert_eq!(read_all(&reader).await, b"hello");
    }

    #[tokio::test]
    async fn test_backpressure() {
        let (writer, reader) = pipe_stream(16);

        let write_task = tokio::spawn(async move {
            writer
                .write_all_bytes(b"0123456789ABCDEF_EXTRA_DATA")
                .await
                .unwrap();
            writer.close();
        });

        let output = read_all(&reader).await;
        write_task.await.unwrap();
        assert_eq!(output, b"0123456789ABCDEF_EXTRA_DATA");
    }

    #[tokio::test]
    async fn test_eof_after_drain() {
        let (writer, reader) = pipe_stream(1024);

        writer.write_all_bytes(b"data").await.unwrap();
        writer.close();

        let mut buf = [0u8; 1024];
        let n = reader.read_bytes(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"data");
        assert_eq!(reader.read_bytes(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_broken_pipe_on_reader_close() {
        let (writer, reader) = pipe_stream(1024);
        reader.close();

        let err = writer.write_bytes(b"data").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (writer, reader) = pipe_stream(8);
        writer.close();
        writer.close();
        reader.close();
        reader.close();
        assert!(writer.is_closed());
        assert!(reader.is_closed());
    }

    #[tokio::test]
    async fn test_reader_close_unblocks_full_writer() {
        let (writer, reader) = pipe_stream(8);
        let writer = Arc::new(writer);

        let w = writer.clone();
        let write_task = tokio::spawn(async move { w.write_all_bytes(&[0u8; 1024]).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        reader.close();

        let result = tokio::time::timeout(Duration::from_secs(2), write_task).await;
        let err = result
            .expect("writer hung after reader closed")
            .unwrap()
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_writer_close_unblocks_reader() {
        let (writer, reader) = pipe_stream(1024);
        let reader = Arc::new(reader);

        let r = reader.clone();
        let read_task = tokio::spawn(async move { read_all(&r).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        writer.close();

        let result = tokio::time::timeout(Duration::from_secs(2), read_task).await;
        assert!(result.expect("reader hung after writer closed").unwrap().is_empty());
    }

    /// Two writers blocked on the same full junction must both be woken.
    #[tokio::test]
    async fn test_two_blocked_writers_both_progress() {
        let (writer, reader) = pipe_stream(4);
        let writer = Arc::new(writer);

        let a = writer.clone();
        let b = writer.clone();
        let task_a = tokio::spawn(async move { a.write_all_bytes(&[b'a'; 64]).await });
        let task_b = tokio::spawn(async move { b.write_all_bytes(&[b'b'; 64]).await });

        let collect = tokio::spawn(async move { read_all(&reader).await });

        task_a.await.unwrap().unwrap();
        task_b.await.unwrap().unwrap();
        writer.close();

        let output = tokio::time::timeout(Duration::from_secs(2), collect)
            .await
            .expect("reader hung")
            .unwrap();
        assert_eq!(output.iter().filter(|&&c| c == b'a').count(), 64);
        assert_eq!(output.iter().filter(|&&c| c == b'b').count(), 64);
    }

    #[tokio::test]
    async fn test_handoff_waits_for_reader() {
        let (writer, reader) = pipe_stream(0);
        let writer = Arc::new(writer);

        let w = writer.clone();
        let write_task = tokio::spawn(async move { w.write_bytes(b"hello").await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!write_task.is_finished(), "write returned before any read");

        let mut buf = [0u8; 3];
        assert_eq!(reader.read_bytes(&mut buf).await.unwrap(), 3);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!write_task.is_finished(), "write returned after a partial read");

        assert_eq!(reader.read_bytes(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf[..2], b"lo");
        let n = tokio::time::timeout(Duration::from_secs(2), write_task)
            .await
            .expect("write hung after the reader took everything")
            .unwrap()
            .unwrap();
        assert_eq!(n, 5);
    }

    #[tokio::test]
    async fn test_handoff_fails_when_reader_closes_unread() {
        let (writer, reader) = pipe_stream(0);
        let writer = Arc::new(writer);

        let w = writer.clone();
        let write_task = tokio::spawn(async move { w.write_all_bytes(b"hi").await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        reader.close();

        let err = tokio::time::timeout(Duration::from_secs(2), write_task)
            .await
            .expect("writer hung after reader closed")
            .unwrap()
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_handoff_completed_before_reader_close() {
        let (writer, reader) = pipe_stream(0);
        let writer = Arc::new(writer);

        let w = writer.clone();
        let write_task = tokio::spawn(async move { w.write_all_bytes(b"hi").await });

        let mut buf = [0u8; 8];
        assert_eq!(reader.read_bytes(&mut buf).await.unwrap(), 2);
        reader.close();

        write_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_handoff_two_writers_both_progress() {
        let (writer, reader) = pipe_stream(0);
        let writer = Arc::new(writer);

        let a = writer.clone();
        let b = writer.clone();
        let task_a = tokio::spawn(async move { a.write_all_bytes(&[b'a'; 300]).await });
        let task_b = tokio::spawn(async move { b.write_all_bytes(&[b'b'; 300]).await });

        let collect = tokio::spawn(async move { read_all(&reader).await });

        task_a.await.unwrap().unwrap();
        task_b.await.unwrap().unwrap();
        writer.close();

        let output = tokio::time::timeout(Duration::from_secs(2), collect)
            .await
            .expect("reader hung")
            .unwrap();
        assert_eq!(output.iter().filter(|&&c| c == b'a').count(), 300);
        assert_eq!(output.iter().filter(|&&c| c == b'b').count(), 300);
    }

    #[tokio::test]
    async fn test_concurrent_stress_no_hang() {
        let result = tokio::time::timeout(Duration::from_secs(5), async {
            let (writer, reader) = pipe_stream(0);

            let write_task = tokio::spawn(async move {
                let chunk = vec![0xABu8; 37];
                for _ in 0..5000 {
                    writer.write_all_bytes(&chunk).await.unwrap();
                }
                writer.close();
            });

            let total = read_all(&reader).await.len();
            write_task.await.unwrap();
            assert_eq!(total, 37 * 5000);
        })
        .await;

        assert!(result.is_ok(), "pipe stress test timed out, likely deadlock");
    }
}
