//! Contract for a streaming command backend (shell session, PTY, ...).

use std::path::Path;
use std::pin::Pin;

use futures::{Future, Stream};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Events emitted while a command runs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecEvent {
    /// A chunk of decoded text output.
    Data { data: String },
    /// Output stopped looking like text; further data is not decoded.
    BinaryDetected,
    BinaryProgress { bytes_received: u64 },
}

/// Final state of a command.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutcome {
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub aborted: bool,
    pub output: String,
}

impl ExecOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && self.error.is_none() && !self.aborted
    }
}

/// A running command: an event stream plus a future for its outcome.
pub struct ExecutionHandle {
    pub events: Pin<Box<dyn Stream<Item = ExecEvent> + Send>>,
    pub outcome: Pin<Box<dyn Future<Output = ExecOutcome> + Send>>,
}

pub trait CommandExecutor: Send + Sync {
    fn execute(&self, command: &str, cwd: &Path, cancel: CancellationToken) -> ExecutionHandle;
}
