//! Encoder subprocess supervision

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, ReadBuf};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use super::args::EncoderCommand;
use crate::error::{BridgeError, Result};
use crate::media::MediaKind;
use crate::source::RawInput;

/// How an encoder subprocess ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderExit {
    /// The process exited on its own
    Exited(ExitStatus),
    /// Killed on request
    Terminated,
    /// The exit status could not be collected
    WaitFailed(String),
}

impl EncoderExit {
    /// Whether the compressed stream ended normally
    pub fn is_clean(&self) -> bool {
        match self {
            EncoderExit::Exited(status) => status.success(),
            EncoderExit::Terminated => true,
            EncoderExit::WaitFailed(_) => false,
        }
    }
}

impl fmt::Display for EncoderExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncoderExit::Exited(status) => write!(f, "{}", status),
            EncoderExit::Terminated => write!(f, "terminated"),
            EncoderExit::WaitFailed(e) => write!(f, "wait failed: {}", e),
        }
    }
}

/// Read fault raised when the encoder dies without being asked to
#[derive(Debug, thiserror::Error)]
#[error("{kind} encoder exited unexpectedly ({exit})")]
pub struct UncleanExit {
    pub kind: MediaKind,
    pub exit: EncoderExit,
}

/// Map a read error from an encoder's output to the bridge error taxonomy
pub fn stream_error(kind: MediaKind, err: io::Error) -> BridgeError {
    if let Some(unclean) = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<UncleanExit>())
    {
        return BridgeError::EncoderExit {
            kind: unclean.kind,
            status: unclean.exit.to_string(),
        };
    }
    BridgeError::StreamFault {
        kind,
        reason: err.to_string(),
    }
}

/// Handle to one running encoder subprocess
///
/// Dropping the handle kills the process.
pub struct EncoderProcess {
    kind: MediaKind,
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
    status: watch::Receiver<Option<EncoderExit>>,
}

impl EncoderProcess {
    /// Spawn the encoder with `input` as its raw source
    ///
    /// Returns the handle and the compressed output stream. Must be called
    /// from within a tokio runtime.
    pub fn start(command: &EncoderCommand, input: RawInput) -> Result<(Self, EncoderOutput)> {
        let kind = command.kind;
        info!("Starting {} encoder: {}", kind, command);

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(input.into_stdio())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BridgeError::Spawn { kind, source })?;

        let stdout = child.stdout.take().ok_or_else(|| BridgeError::StreamFault {
            kind,
            reason: "encoder stdout not captured".into(),
        })?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(kind, stderr));
        }

        let pid = child.id();
        info!("{} encoder started with PID {:?}", kind.label(), pid);

        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let (status_tx, status) = watch::channel(None);
        tokio::spawn(supervise(kind, child, kill_rx, exit_tx, status_tx));

        let process = Self {
            kind,
            pid,
            kill_tx: Some(kill_tx),
            status,
        };
        let output = EncoderOutput {
            kind,
            stdout,
            exit: Some(exit_rx),
        };
        Ok((process, output))
    }

    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Forcefully kill the process; calling it again does nothing
    pub fn terminate(&mut self) {
        if let Some(kill_tx) = self.kill_tx.take() {
            debug!("Terminating {} encoder", self.kind);
            let _ = kill_tx.send(());
        }
    }

    /// Wait until the process has ended
    pub async fn wait(&mut self) -> EncoderExit {
        loop {
            let current = self.status.borrow_and_update().clone();
            if let Some(exit) = current {
                return exit;
            }
            if self.status.changed().await.is_err() {
                return self
                    .status
                    .borrow()
                    .clone()
                    .unwrap_or_else(|| EncoderExit::WaitFailed("supervisor stopped".into()));
            }
        }
    }
}

async fn supervise(
    kind: MediaKind,
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    exit_tx: oneshot::Sender<EncoderExit>,
    status_tx: watch::Sender<Option<EncoderExit>>,
) {
    // A dropped handle closes kill_rx, which also kills.
    let exit = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => EncoderExit::Exited(status),
            Err(e) => EncoderExit::WaitFailed(e.to_string()),
        },
        _ = kill_rx => {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill {} encoder: {}", kind, e);
            }
            EncoderExit::Terminated
        }
    };

    if exit.is_clean() {
        info!("{} encoder stopped ({})", kind.label(), exit);
    } else {
        warn!("{} encoder exited unexpectedly ({})", kind.label(), exit);
    }

    let _ = exit_tx.send(exit.clone());
    let _ = status_tx.send(Some(exit));
}

async fn forward_stderr(kind: MediaKind, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!("[{} encoder] {}", kind, line),
            Ok(None) => break,
            Err(e) => {
                warn!("[{} encoder] Error reading log: {}", kind, e);
                break;
            }
        }
    }
}

/// Compressed output of an encoder
///
/// End of stream is clean when the encoder exited successfully or was
/// terminated; any other exit turns end of stream into an [`UncleanExit`]
/// read error.
pub struct EncoderOutput {
    kind: MediaKind,
    stdout: ChildStdout,
    exit: Option<oneshot::Receiver<EncoderExit>>,
}

impl AsyncRead for EncoderOutput {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.stdout).poll_read(cx, buf))?;
        if buf.filled().len() > before || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        // stdout closed, the exit status decides how the stream ended
        let Some(exit_rx) = this.exit.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let exit = match ready!(Pin::new(exit_rx).poll(cx)) {
            Ok(exit) => exit,
            Err(_) => EncoderExit::WaitFailed("supervisor stopped".into()),
        };
        this.exit = None;

        if exit.is_clean() {
            Poll::Ready(Ok(()))
        } else {
            Poll::Ready(Err(io::Error::other(UncleanExit {
                kind: this.kind,
                exit,
            })))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    fn sh(kind: MediaKind, script: &str) -> EncoderCommand {
        EncoderCommand::new(kind, "sh", ["-c", script])
    }

    #[tokio::test]
    async fn test_spawn_failure_is_diagnosable() {
        let command = EncoderCommand::new(MediaKind::Video, "/nonexistent/ffmpeg", ["-version"]);
        let err = EncoderProcess::start(&command, RawInput::Null).err().unwrap();
        assert!(matches!(
            err,
            BridgeError::Spawn {
                kind: MediaKind::Video,
                ..
            }
        ));
        assert!(err.to_string().contains("video encoder"));
    }

    #[tokio::test]
    async fn test_clean_exit_ends_stream() {
        let (mut process, mut output) =
            EncoderProcess::start(&sh(MediaKind::Audio, "printf hello"), RawInput::Null).unwrap();

        let mut data = Vec::new();
        output.read_to_end(&mut data).await.unwrap();
        assert_eq!(data, b"hello");

        let exit = process.wait().await;
        assert!(matches!(exit, EncoderExit::Exited(status) if status.success()));
    }

    #[tokio::test]
    async fn test_unclean_exit_surfaces_as_error() {
        let (_process, mut output) =
            EncoderProcess::start(&sh(MediaKind::Video, "printf abc; exit 3"), RawInput::Null)
                .unwrap();

        let mut data = Vec::new();
        let err = output.read_to_end(&mut data).await.unwrap_err();
        assert_eq!(data, b"abc");

        match stream_error(MediaKind::Video, err) {
            BridgeError::EncoderExit { kind, status } => {
                assert_eq!(kind, MediaKind::Video);
                assert!(status.contains('3'), "status: {}", status);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent_and_clean() {
        let (mut process, mut output) =
            EncoderProcess::start(&sh(MediaKind::Audio, "exec sleep 30"), RawInput::Null).unwrap();
        assert!(process.id().is_some());

        process.terminate();
        process.terminate();

        let exit = tokio::time::timeout(Duration::from_secs(5), process.wait())
            .await
            .unwrap();
        assert_eq!(exit, EncoderExit::Terminated);

        // a requested kill ends the stream without an error
        let mut data = Vec::new();
        output.read_to_end(&mut data).await.unwrap();
        assert!(data.is_empty());

        process.terminate();
        assert_eq!(process.wait().await, EncoderExit::Terminated);
    }

    #[tokio::test]
    async fn test_drop_kills_process() {
        let (process, mut output) =
            EncoderProcess::start(&sh(MediaKind::Video, "exec sleep 30"), RawInput::Null).unwrap();
        drop(process);

        let mut data = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), output.read_to_end(&mut data))
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_stream_error_classification() {
        let err = stream_error(
            MediaKind::Audio,
            io::Error::new(io::ErrorKind::BrokenPipe, "pipe gone"),
        );
        assert!(matches!(
            err,
            BridgeError::StreamFault {
                kind: MediaKind::Audio,
                ..
            }
        ));
    }
}
