use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};

use scout_core::exec::{ExecEvent, ExecutionHandle};
use scout_core::tools::{Tool, ToolContext, ToolError, ToolEvent, ToolEventStream};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_TIMEOUT_MS: u64 = 600_000;
const MAX_OUTPUT_BYTES: usize = 30_000;

/// Patterns that indicate potential command injection.
const BLOCKED_PATTERNS: &[&str] = &[
    "$(", // command substitution
    "${", // variable expansion with braces
];

/// Runs shell commands through the session's [`CommandExecutor`].
///
/// [`CommandExecutor`]: scout_core::exec::CommandExecutor
pub struct BashTool {
    timeout: Duration,
}

impl BashTool {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for BashTool {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a command against the blocked patterns.
pub fn validate_command(command: &str) -> Result<(), String> {
    for pattern in BLOCKED_PATTERNS {
        if command.contains(pattern) {
            return Err(format!("Command contains blocked pattern: {pattern}"));
        }
    }

    if command.contains('`') {
        return Err("Command contains backtick command substitution".into());
    }

    Ok(())
}

/// Keep the head of long output, cut at a char boundary.
pub fn truncate_output(output: &str, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        return output.to_string();
    }
    let mut boundary = max_bytes;
    while !output.is_char_boundary(boundary) {
        boundary -= 1;
    }
    format!(
        "{}\n\n[truncated: {} bytes -> {} bytes]",
        &output[..boundary],
        output.len(),
        boundary
    )
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "Bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the session's working directory"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["command"],
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in milliseconds (max 600000)"
                },
                "description": {
                    "type": "string",
                    "description": "Description of what this command does"
                }
            }
        })
    }

    async fn validate(&self, input: &Value, ctx: &ToolContext) -> Result<(), ToolError> {
        let command = input["command"]
            .as_str()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("command is required".into()))?;
        validate_command(command).map_err(ToolError::InvalidArguments)?;
        if ctx.executor.is_none() {
            return Err(ToolError::ExecutionFailed(
                "no shell session is available".into(),
            ));
        }
        Ok(())
    }

    fn execute(&self, input: Value, ctx: &ToolContext) -> ToolEventStream {
        let ctx = ctx.clone();
        let default_timeout = self.timeout;

        Box::pin(async_stream::stream! {
            let command = input["command"].as_str().unwrap_or_default().to_string();
            let timeout = input["timeout"]
                .as_u64()
                .map(|ms| Duration::from_millis(ms.min(MAX_TIMEOUT_MS)))
                .unwrap_or(default_timeout);

            match ctx.executor.clone() {
                None => yield Err(ToolError::ExecutionFailed("no shell session is available".into())),
                Some(executor) => {
                    let cancel = ctx.abort_signal.child_token();
                    let ExecutionHandle { mut events, outcome } =
                        executor.execute(&command, &ctx.working_directory, cancel.clone());

                    let deadline = tokio::time::sleep(timeout);
                    tokio::pin!(deadline);
                    let mut timed_out = false;

                    loop {
                        let event = tokio::select! {
                            event = events.next() => event,
                            _ = &mut deadline => {
                                cancel.cancel();
                                timed_out = true;
                                None
                            }
                        };
                        match event {
                            Some(ExecEvent::Data { data }) => yield Ok(ToolEvent::progress(data)),
                            Some(ExecEvent::BinaryDetected) => {
                                yield Ok(ToolEvent::progress("[binary output detected]"));
                            }
                            Some(ExecEvent::BinaryProgress { .. }) => {}
                            None => break,
                        }
                    }

                    let outcome = outcome.await;
                    if timed_out {
                        yield Err(ToolError::Timeout(timeout));
                    } else if outcome.aborted {
                        yield Err(ToolError::Cancelled);
                    } else if let Some(error) = outcome.error {
                        yield Err(ToolError::ExecutionFailed(error));
                    } else {
                        let output = truncate_output(&outcome.output, MAX_OUTPUT_BYTES);
                        match outcome.exit_code {
                            Some(0) => yield Ok(ToolEvent::result(json!({
                                "output": output,
                                "exit_code": 0,
                            }))),
                            Some(code) => yield Err(ToolError::ExecutionFailed(format!(
                                "Exit code: {code}\n{output}"
                            ))),
                            None => yield Err(ToolError::ExecutionFailed(format!(
                                "Terminated by signal\n{output}"
                            ))),
                        }
                    }
                }
            }
        })
    }

    fn render_result_for_assistant(&self, data: &Value) -> Option<String> {
        let output = data["output"].as_str()?;
        if output.trim().is_empty() {
            Some("(no output)".into())
        } else {
            Some(output.to_string())
        }
    }
}
