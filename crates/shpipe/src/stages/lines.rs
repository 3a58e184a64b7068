//! Line-oriented transforms of stdin into stdout.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::error::Result;
use crate::flusher::Flusher;
use crate::stage::Stage;
use crate::state::{FlushContext, State};

/// Stage keeping the lines of stdin a predicate accepts. See [`filter`].
pub struct Filter<F> {
    pred: Arc<F>,
}

/// Stage rewriting every line of stdin. See [`replace`].
pub struct Replace<F> {
    f: Arc<F>,
}

/// Copy the lines of stdin for which `pred` returns true to stdout.
///
/// `pred` sees each line without its `\n` or `\r\n` terminator; accepted
/// lines are written unchanged, terminator included. A last line without a
/// terminator is still passed to `pred`.
pub fn filter<F>(pred: F) -> Filter<F>
where
    F: Fn(&str) -> bool + Send + Sync + 'static,
{
    Filter {
        pred: Arc::new(pred),
    }
}

/// Write `f(line)` for every line of stdin to stdout.
///
/// `f` sees each line without its terminator, and the original terminator is
/// written after the result. An empty result drops the line entirely.
pub fn replace<F>(f: F) -> Replace<F>
where
    F: Fn(&str) -> String + Send + Sync + 'static,
{
    Replace { f: Arc::new(f) }
}

impl<F> Stage for Filter<F>
where
    F: Fn(&str) -> bool + Send + Sync + 'static,
{
    fn configure(&self, state: &mut State) -> Result<()> {
        state.add_flusher(Filter {
            pred: self.pred.clone(),
        });
        Ok(())
    }
}

#[async_trait]
impl<F> Flusher for Filter<F>
where
    F: Fn(&str) -> bool + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        "filter"
    }

    async fn flush(&self, ctx: &FlushContext) -> Result<()> {
        map_lines(ctx, |line, raw, _| (self.pred)(line).then_some(Cow::Borrowed(raw))).await
    }
}

impl<F> Stage for Replace<F>
where
    F: Fn(&str) -> String + Send + Sync + 'static,
{
    fn configure(&self, state: &mut State) -> Result<()> {
        state.add_flusher(Replace { f: self.f.clone() });
        Ok(())
    }
}

#[async_trait]
impl<F> Flusher for Replace<F>
where
    F: Fn(&str) -> String + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        "replace"
    }

    async fn flush(&self, ctx: &FlushContext) -> Result<()> {
        map_lines(ctx, |line, _, terminator| {
            let result = (self.f)(line);
            if result.is_empty() {
                return None;
            }
            let mut bytes = result.into_bytes();
            bytes.extend_from_slice(terminator);
            Some(Cow::Owned(bytes))
        })
        .await
    }
}

/// Feed every line of stdin to `each` and write what it returns to stdout.
///
/// `each` gets the line without terminator (lossily decoded), the raw line
/// and the terminator.
async fn map_lines<E>(ctx: &FlushContext, mut each: E) -> Result<()>
where
    E: for<'a> FnMut(&str, &'a [u8], &'a [u8]) -> Option<Cow<'a, [u8]>> + Send,
{
    let mut reader = BufReader::new(ctx.stdin.clone());
    let mut out = ctx.stdout.clone();
    let mut raw = Vec::new();
    loop {
        raw.clear();
        if reader.read_until(b'\n', &mut raw).await? == 0 {
            break;
        }
        let body = body_len(&raw);
        let line = String::from_utf8_lossy(&raw[..body]);
        if let Some(bytes) = each(&line, &raw, &raw[body..]) {
            out.write_all(&bytes).await?;
        }
    }
    out.flush().await?;
    Ok(())
}

/// Length of `raw` without a trailing `\n` or `\r\n`.
fn body_len(raw: &[u8]) -> usize {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
        if end > 0 && raw[end - 1] == b'\r' {
            end -= 1;
        }
    }
    end
}

impl<F> fmt::Debug for Filter<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Filter")
    }
}

impl<F> fmt::Debug for Replace<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Replace")
    }
}
