//! [`CommandExecutor`] backed by `tokio::process`.
//!
//! Each command runs under `bash -c` with stdout and stderr streamed as
//! [`ExecEvent::Data`] chunks. Once a NUL byte shows up the output is
//! treated as binary and only byte counts are reported.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use scout_core::exec::{CommandExecutor, ExecEvent, ExecOutcome, ExecutionHandle};

const READ_CHUNK: usize = 8192;

#[derive(Clone, Debug)]
pub struct ProcessExecutor {
    shell: PathBuf,
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self {
            shell: PathBuf::from("bash"),
        }
    }

    pub fn with_shell(shell: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandExecutor for ProcessExecutor {
    fn execute(&self, command: &str, cwd: &Path, cancel: CancellationToken) -> ExecutionHandle {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let command = command.to_string();
        tokio::spawn(async move {
            let outcome = run(cmd, &command, event_tx, cancel).await;
            let _ = outcome_tx.send(outcome);
        });

        ExecutionHandle {
            events: Box::pin(async_stream::stream! {
                while let Some(event) = event_rx.recv().await {
                    yield event;
                }
            }),
            outcome: Box::pin(async move {
                outcome_rx.await.unwrap_or_else(|_| ExecOutcome {
                    error: Some("executor task ended before the command finished".into()),
                    ..Default::default()
                })
            }),
        }
    }
}

/// Incremental decoder for one output pipe.
#[derive(Default)]
struct OutputDecoder {
    pending: Vec<u8>,
}

impl OutputDecoder {
    /// Decode as much as forms complete UTF-8, keeping a split trailing
    /// character for the next chunk.
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let keep = match std::str::from_utf8(&self.pending) {
            Ok(_) => 0,
            Err(e) if e.error_len().is_none() => self.pending.len() - e.valid_up_to(),
            Err(_) => 0,
        };
        let complete: Vec<u8> = self.pending.drain(..self.pending.len() - keep).collect();
        String::from_utf8_lossy(&complete).into_owned()
    }

    fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&rest).into_owned()
    }
}

struct OutputState {
    output: String,
    binary: bool,
    binary_bytes: u64,
    events: mpsc::UnboundedSender<ExecEvent>,
}

impl OutputState {
    fn chunk(&mut self, decoder: &mut OutputDecoder, bytes: &[u8]) {
        if !self.binary && bytes.contains(&0) {
            self.binary = true;
            let _ = self.events.send(ExecEvent::BinaryDetected);
        }
        if self.binary {
            self.binary_bytes += bytes.len() as u64;
            let _ = self.events.send(ExecEvent::BinaryProgress {
                bytes_received: self.binary_bytes,
            });
            return;
        }
        let text = decoder.push(bytes);
        self.text(text);
    }

    fn text(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        self.output.push_str(&text);
        let _ = self.events.send(ExecEvent::Data { data: text });
    }
}

async fn read_some<R: AsyncRead + Unpin>(
    pipe: &mut Option<R>,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    match pipe {
        Some(reader) => reader.read(buf).await,
        None => std::future::pending().await,
    }
}

async fn run(
    mut cmd: Command,
    command: &str,
    events: mpsc::UnboundedSender<ExecEvent>,
    cancel: CancellationToken,
) -> ExecOutcome {
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(command, error = %e, "failed to spawn command");
            return ExecOutcome {
                error: Some(format!("Failed to spawn process: {e}")),
                ..Default::default()
            };
        }
    };
    debug!(command, "process spawned");

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut out_buf = vec![0u8; READ_CHUNK];
    let mut err_buf = vec![0u8; READ_CHUNK];
    let mut out_decoder = OutputDecoder::default();
    let mut err_decoder = OutputDecoder::default();
    let mut state = OutputState {
        output: String::new(),
        binary: false,
        binary_bytes: 0,
        events,
    };
    let mut aborted = false;

    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            _ = cancel.cancelled() => {
                aborted = true;
                break;
            }
            read = read_some(&mut stdout, &mut out_buf) => match read {
                Ok(0) | Err(_) => {
                    stdout = None;
                    let rest = out_decoder.finish();
                    state.text(rest);
                }
                Ok(n) => state.chunk(&mut out_decoder, &out_buf[..n]),
            },
            read = read_some(&mut stderr, &mut err_buf) => match read {
                Ok(0) | Err(_) => {
                    stderr = None;
                    let rest = err_decoder.finish();
                    state.text(rest);
                }
                Ok(n) => state.chunk(&mut err_decoder, &err_buf[..n]),
            },
        }
    }

    let status = if aborted {
        None
    } else {
        tokio::select! {
            _ = cancel.cancelled() => {
                aborted = true;
                None
            }
            status = child.wait() => Some(status),
        }
    };

    if aborted {
        debug!(command, "process cancelled");
        let _ = child.start_kill();
        let _ = child.wait().await;
        return ExecOutcome {
            exit_code: None,
            error: None,
            aborted: true,
            output: state.output,
        };
    }

    match status {
        Some(Ok(status)) => {
            debug!(command, exit_code = ?status.code(), "process completed");
            ExecOutcome {
                exit_code: status.code(),
                error: None,
                aborted: false,
                output: state.output,
            }
        }
        Some(Err(e)) => ExecOutcome {
            error: Some(format!("Process wait failed: {e}")),
            output: state.output,
            ..Default::default()
        },
        None => ExecOutcome {
            aborted: true,
            output: state.output,
            ..Default::default()
        },
    }
}
