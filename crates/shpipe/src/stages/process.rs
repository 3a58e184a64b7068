//! External programs.

use std::io;
use std::os::fd::OwnedFd;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::net::unix::pipe;
use tokio::process::{ChildStdin, Command};
use tokio_util::sync::CancellationToken;

use crate::error::{CommandFailure, PipeError, Result};
use crate::flusher::Flusher;
use crate::stage::Stage;
use crate::state::{FlushContext, State};
use crate::stream::{InputStream, OutputStream};

type Source = Box<dyn AsyncRead + Send + Unpin>;

/// Stage running an external program. See [`exec`].
#[derive(Debug, Clone)]
pub struct Exec {
    name: String,
    args: Vec<String>,
}

/// Run program `name` with `args`, using the state's streams, directory and
/// environment at the time the stage is configured.
///
/// The program is looked up the way the operating system does it (`PATH`
/// for bare names). When stdout and stderr are the same stream the program
/// gets one pipe on both descriptors, which keeps their relative order.
pub fn exec<I, S>(name: impl Into<String>, args: I) -> Exec
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Exec {
        name: name.into(),
        args: args.into_iter().map(Into::into).collect(),
    }
}

/// Run `command` with `/bin/sh -c`.
pub fn system(command: impl Into<String>) -> Exec {
    exec("/bin/sh", ["-c".to_string(), command.into()])
}

impl Stage for Exec {
    fn configure(&self, state: &mut State) -> Result<()> {
        state.add_flusher(ExecFlusher {
            name: self.name.clone(),
            args: self.args.clone(),
            killed: CancellationToken::new(),
        });
        Ok(())
    }
}

struct ExecFlusher {
    name: String,
    args: Vec<String>,
    killed: CancellationToken,
}

impl ExecFlusher {
    fn failure(&self, cause: CommandFailure) -> PipeError {
        PipeError::Command {
            name: self.name.clone(),
            cause,
        }
    }

    fn spawn_error(&self, source: io::Error) -> PipeError {
        PipeError::Spawn {
            name: self.name.clone(),
            source,
        }
    }

    /// Wait for the child while feeding its stdin, killing it on request.
    async fn supervise(
        &self,
        child: &mut tokio::process::Child,
        input: InputStream,
    ) -> (io::Result<ExitStatus>, io::Result<()>) {
        let mut feed = std::pin::pin!(feed_stdin(input, child.stdin.take()));
        let mut fed = Ok(());
        let mut feeding = true;
        let mut kill_sent = false;

        let status = loop {
            tokio::select! {
                result = &mut feed, if feeding => {
                    feeding = false;
                    fed = result;
                }
                status = child.wait() => break status,
                _ = self.killed.cancelled(), if !kill_sent => {
                    kill_sent = true;
                    tracing::debug!(program = %self.name, "killing");
                    if let Err(err) = child.start_kill() {
                        tracing::debug!(program = %self.name, error = %err, "kill failed");
                    }
                }
            }
        };
        // A feed still running here is abandoned with its end of the pipe.
        (status, fed)
    }
}

#[async_trait]
impl Flusher for ExecFlusher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn flush(&self, ctx: &FlushContext) -> Result<()> {
        if self.killed.is_cancelled() {
            return Err(PipeError::Killed {
                name: self.name.clone(),
            });
        }

        let mut cmd = Command::new(&self.name);
        cmd.args(&self.args)
            .current_dir(&ctx.dir)
            .env_clear()
            .envs(ctx.env.iter())
            .kill_on_drop(true);

        cmd.stdin(if ctx.stdin.is_empty_stream() {
            Stdio::null()
        } else {
            Stdio::piped()
        });

        let combined = !ctx.stdout.is_discard() && ctx.stdout.same_as(&ctx.stderr);
        let shared_pipe = if combined {
            let (reader, writer) = io::pipe().map_err(|e| self.spawn_error(e))?;
            let writer_dup = writer.try_clone().map_err(|e| self.spawn_error(e))?;
            cmd.stdout(Stdio::from(writer));
            cmd.stderr(Stdio::from(writer_dup));
            Some(reader)
        } else {
            cmd.stdout(output_stdio(&ctx.stdout));
            cmd.stderr(output_stdio(&ctx.stderr));
            None
        };

        let spawned = cmd.spawn();
        // Our copies of the write ends must go, or the shared pipe never hits EOF.
        drop(cmd);
        let mut child = spawned.map_err(|e| self.spawn_error(e))?;
        tracing::debug!(program = %self.name, pid = child.id(), "spawned");

        let (stdout_src, stderr_src): (Option<Source>, Option<Source>) = match shared_pipe {
            Some(reader) => {
                let receiver = pipe::Receiver::from_owned_fd(OwnedFd::from(reader))
                    .map_err(|e| self.failure(e.into()))?;
                (Some(Box::new(receiver)), None)
            }
            None => (
                child.stdout.take().map(|s| Box::new(s) as Source),
                child.stderr.take().map(|s| Box::new(s) as Source),
            ),
        };

        let drains = async {
            let (out, err) = tokio::join!(
                drain(stdout_src, ctx.stdout.clone()),
                drain(stderr_src, ctx.stderr.clone()),
            );
            out.and(err)
        };
        let ((status, fed), drained) =
            tokio::join!(self.supervise(&mut child, ctx.stdin.clone()), drains);

        let status = status.map_err(|e| self.failure(e.into()))?;
        drained.map_err(|e| self.failure(e.into()))?;
        if !status.success() {
            tracing::debug!(program = %self.name, %status, "exited with failure");
            return Err(self.failure(CommandFailure::Exit(status)));
        }
        fed.map_err(|e| self.failure(e.into()))?;
        tracing::debug!(program = %self.name, "exited");
        Ok(())
    }

    fn kill(&self) {
        self.killed.cancel();
    }
}

fn output_stdio(stream: &OutputStream) -> Stdio {
    if stream.is_discard() {
        Stdio::null()
    } else {
        Stdio::piped()
    }
}

/// Copy `input` into the child's stdin, closing it at EOF.
///
/// A child that exits without reading everything is not an error.
async fn feed_stdin(mut input: InputStream, stdin: Option<ChildStdin>) -> io::Result<()> {
    let Some(mut stdin) = stdin else {
        return Ok(());
    };
    match tokio::io::copy(&mut input, &mut stdin).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
            tracing::trace!("child closed stdin early");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn drain(source: Option<Source>, mut sink: OutputStream) -> io::Result<()> {
    let Some(mut source) = source else {
        return Ok(());
    };
    tokio::io::copy(&mut source, &mut sink).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::OutputBuffer;

    fn buffered_state() -> (State, OutputBuffer, OutputBuffer) {
        let out = OutputBuffer::new();
        let err = OutputBuffer::new();
        let state = State::new(out.clone().into(), err.clone().into());
        (state, out, err)
    }

    #[tokio::test]
    async fn test_exec_writes_stdout_and_stderr() {
        let (mut state, out, err) = buffered_state();
        system("echo out; echo err >&2").configure(&mut state).unwrap();
        state.flush_all().await.unwrap();
        assert_eq!(out.to_string_lossy(), "out\n");
        assert_eq!(err.to_string_lossy(), "err\n");
    }

    #[tokio::test]
    async fn test_exec_feeds_stdin() {
        let (mut state, out, _) = buffered_state();
        state.stdin = InputStream::from_bytes("hello");
        exec("sed", ["s/l/k/g"]).configure(&mut state).unwrap();
        state.flush_all().await.unwrap();
        assert_eq!(out.to_string_lossy(), "hekko");
    }

    #[tokio::test]
    async fn test_exec_nonzero_exit() {
        let (mut state, _, _) = buffered_state();
        system("exit 3").configure(&mut state).unwrap();
        let err = state.flush_all().await.unwrap_err();
        assert_eq!(err.to_string(), r#"command "/bin/sh": exit status: 3"#);
    }

    #[tokio::test]
    async fn test_exec_missing_program() {
        let (mut state, _, _) = buffered_state();
        exec("shpipe-no-such-program", Vec::<String>::new())
            .configure(&mut state)
            .unwrap();
        let err = state.flush_all().await.unwrap_err();
        assert!(matches!(err, PipeError::Spawn { .. }));
        assert_eq!(err.io_kind(), Some(io::ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn test_kill_before_start_never_spawns() {
        let flusher = ExecFlusher {
            name: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), "exit 0".to_string()],
            killed: CancellationToken::new(),
        };
        flusher.kill();
        flusher.kill();
        let err = flusher.flush(&State::default().snapshot()).await.unwrap_err();
        assert!(matches!(err, PipeError::Killed { .. }));
    }

    #[tokio::test]
    async fn test_kill_stops_running_child() {
        let flusher = std::sync::Arc::new(ExecFlusher {
            name: "sleep".to_string(),
            args: vec!["30".to_string()],
            killed: CancellationToken::new(),
        });
        let running = {
            let flusher = flusher.clone();
            tokio::spawn(async move { flusher.flush(&State::default().snapshot()).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        flusher.kill();

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), running)
            .await
            .expect("kill did not stop the child")
            .unwrap();
        assert!(matches!(
            result,
            Err(PipeError::Command {
                cause: CommandFailure::Exit(_),
                ..
            })
        ));
    }
}
