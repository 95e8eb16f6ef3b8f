use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::exec::CommandExecutor;
use crate::ids::SessionId;

/// Context available to tools during execution.
///
/// Cheap to clone: tools that need it past the first poll of their stream
/// take an owned copy.
#[derive(Clone)]
pub struct ToolContext {
    pub session_id: SessionId,
    pub working_directory: PathBuf,
    pub abort_signal: CancellationToken,
    /// Shell session owned by this conversation, if any.
    pub executor: Option<Arc<dyn CommandExecutor>>,
}

impl ToolContext {
    pub fn new(working_directory: impl Into<PathBuf>, abort_signal: CancellationToken) -> Self {
        Self {
            session_id: SessionId::new(),
            working_directory: working_directory.into(),
            abort_signal,
            executor: None,
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("session_id", &self.session_id)
            .field("working_directory", &self.working_directory)
            .field("cancelled", &self.abort_signal.is_cancelled())
            .field("has_executor", &self.executor.is_some())
            .finish()
    }
}

/// One step of a tool's execution stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolEvent {
    /// Interim output. Any number may precede the result.
    Progress { content: String },
    /// Terminal event. Exactly one per execution.
    Result { data: serde_json::Value },
}

impl ToolEvent {
    pub fn progress(content: impl Into<String>) -> Self {
        Self::Progress {
            content: content.into(),
        }
    }

    pub fn result(data: impl Into<serde_json::Value>) -> Self {
        Self::Result { data: data.into() }
    }
}

pub type ToolEventStream = Pin<Box<dyn Stream<Item = Result<ToolEvent, ToolError>> + Send>>;

/// Tool definition sent to the LLM as part of the request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Trait implemented by each tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> serde_json::Value;

    fn is_read_only(&self) -> bool {
        false
    }

    /// Reject bad input before anything runs.
    async fn validate(
        &self,
        _input: &serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<(), ToolError> {
        Ok(())
    }

    fn needs_permission(&self, _input: &serde_json::Value) -> bool {
        !self.is_read_only()
    }

    fn execute(&self, input: serde_json::Value, ctx: &ToolContext) -> ToolEventStream;

    /// Text the model sees for a successful result. `None` falls back to JSON.
    fn render_result_for_assistant(&self, _data: &serde_json::Value) -> Option<String> {
        None
    }

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
}

impl ToolError {
    /// Message surfaced to the model. Validation errors go out verbatim.
    pub fn for_assistant(&self) -> String {
        match self {
            Self::InvalidArguments(msg) | Self::ExecutionFailed(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}
