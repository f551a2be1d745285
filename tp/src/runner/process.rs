//! Subprocess execution with streamed output

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use eyre::Context;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{LineSink, OutputSink};

/// How a streamed subprocess ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Exit code, or -1 if killed by a signal
    Exited(i32),
    Cancelled,
    TimedOut,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

fn spawn_reader<R>(reader: R, sink: Arc<dyn LineSink>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => sink.line(&line),
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "spawn_reader: read failed");
                    break;
                }
            }
        }
    })
}

/// Run a command, streaming stdout and stderr lines into `output`
///
/// The child is killed when `cancel` fires or `timeout` elapses.
pub async fn run_streaming(
    mut command: Command,
    stdin: Option<String>,
    cancel: &CancellationToken,
    timeout: Duration,
    output: &OutputSink,
) -> eyre::Result<ProcessOutcome> {
    debug!(?command, ?timeout, "run_streaming: called");
    command
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().context("Failed to spawn process")?;

    // Feed stdin from a task so a chatty child can't deadlock against us
    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        tokio::spawn(async move {
            if let Err(e) = pipe.write_all(input.as_bytes()).await {
                warn!(error = %e, "run_streaming: failed to write stdin");
            }
        });
    }

    let deadline = tokio::time::Instant::now() + timeout;
    let mut readers: Vec<JoinHandle<()>> = [
        child.stdout.take().map(|s| spawn_reader(s, output.stdout.clone())),
        child.stderr.take().map(|s| spawn_reader(s, output.stderr.clone())),
    ]
    .into_iter()
    .flatten()
    .collect();

    let outcome = tokio::select! {
        status = child.wait() => {
            let status = status.context("Failed to wait for process")?;
            ProcessOutcome::Exited(status.code().unwrap_or(-1))
        }
        _ = cancel.cancelled() => {
            debug!("run_streaming: cancelled, killing child");
            let _ = child.kill().await;
            ProcessOutcome::Cancelled
        }
        _ = tokio::time::sleep_until(deadline) => {
            warn!(?timeout, "run_streaming: timed out, killing child");
            let _ = child.kill().await;
            ProcessOutcome::TimedOut
        }
    };

    // Descendants of the child may still hold the pipes open, so draining
    // stays bounded by the same cancel token and deadline
    let outcome = match outcome {
        ProcessOutcome::Exited(code) => tokio::select! {
            _ = async {
                for reader in readers.iter_mut() {
                    let _ = reader.await;
                }
            } => ProcessOutcome::Exited(code),
            _ = cancel.cancelled() => {
                debug!("run_streaming: cancelled while draining output");
                ProcessOutcome::Cancelled
            }
            _ = tokio::time::sleep_until(deadline) => {
                warn!(?timeout, "run_streaming: timed out while draining output");
                ProcessOutcome::TimedOut
            }
        },
        other => other,
    };
    readers.iter().for_each(JoinHandle::abort);

    debug!(?outcome, "run_streaming: finished");
    Ok(outcome)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::runner::MemoryLineSink;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    fn capture() -> (OutputSink, Arc<MemoryLineSink>, Arc<MemoryLineSink>) {
        let out = Arc::new(MemoryLineSink::new());
        let err = Arc::new(MemoryLineSink::new());
        (OutputSink::new(out.clone(), err.clone()), out, err)
    }

    #[tokio::test]
    async fn test_streams_both_pipes() {
        let (sink, out, err) = capture();
        let outcome = run_streaming(
            sh("echo one; echo two; echo oops >&2"),
            None,
            &CancellationToken::new(),
            Duration::from_secs(30),
            &sink,
        )
        .await
        .unwrap();

        assert!(outcome.success());
        assert_eq!(out.lines(), vec!["one", "two"]);
        assert_eq!(err.lines(), vec!["oops"]);
    }

    #[tokio::test]
    async fn test_exit_code_and_stdin() {
        let (sink, out, _) = capture();
        let outcome = run_streaming(
            sh("cat; exit 3"),
            Some("prompt text\n".to_string()),
            &CancellationToken::new(),
            Duration::from_secs(30),
            &sink,
        )
        .await
        .unwrap();

        assert_eq!(outcome, ProcessOutcome::Exited(3));
        assert_eq!(out.lines(), vec!["prompt text"]);
    }

    #[tokio::test]
    async fn test_timeout_kills() {
        let (sink, _, _) = capture();
        let outcome = run_streaming(
            sh("sleep 10"),
            None,
            &CancellationToken::new(),
            Duration::from_millis(100),
            &sink,
        )
        .await
        .unwrap();
        assert_eq!(outcome, ProcessOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_cancel_kills_promptly() {
        let (sink, _, _) = capture();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let outcome = run_streaming(sh("sleep 10"), None, &cancel, Duration::from_secs(30), &sink)
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancel_while_descendant_holds_pipes() {
        let (sink, out, _) = capture();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let outcome = run_streaming(sh("sleep 8 & echo hi"), None, &cancel, Duration::from_secs(30), &sink)
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(out.lines(), vec!["hi"]);
    }

    #[tokio::test]
    async fn test_timeout_while_descendant_holds_pipes() {
        let (sink, _, _) = capture();
        let started = std::time::Instant::now();
        let outcome = run_streaming(
            sh("sleep 8 & echo hi"),
            None,
            &CancellationToken::new(),
            Duration::from_secs(1),
            &sink,
        )
        .await
        .unwrap();
        assert_eq!(outcome, ProcessOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
