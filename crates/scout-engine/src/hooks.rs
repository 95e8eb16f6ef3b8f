//! User-configured shell hooks around tool execution.
//!
//! PreToolUse hooks run in order before a tool and may block it or rewrite
//! its input. PostToolUse hooks run after it on a spawned task and can only
//! observe. Each hook is a `sh -c` command receiving the invocation as env
//! vars and as a JSON document on stdin.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use futures::future::join_all;
use regex::Regex;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use scout_settings::{HookCommandSettings, HookMatcherSettings, HooksSettings};

use crate::error::EngineError;

pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// Larger `TOOL_INPUT_*` values are left out of the hook environment.
const MAX_ENV_VALUE_BYTES: usize = 32 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookEvent {
    PreToolUse,
    PostToolUse,
}

impl HookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreToolUse => "PreToolUse",
            Self::PostToolUse => "PostToolUse",
        }
    }
}

/// Tool-name matcher compiled from a pattern such as `Edit|Write` or `mcp__*`.
#[derive(Clone, Debug)]
pub enum ToolMatcher {
    Any,
    Pattern(Regex),
}

impl ToolMatcher {
    /// `*` or an empty pattern matches every tool. Otherwise each
    /// `|`-separated alternative is a case-insensitive glob anchored at both
    /// ends, where `*` is any run and `?` any single character.
    pub fn compile(pattern: &str) -> Result<Self, EngineError> {
        let alternatives: Vec<&str> = pattern
            .split('|')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .collect();

        if alternatives.is_empty() || alternatives.contains(&"*") {
            return Ok(Self::Any);
        }

        let body = alternatives
            .iter()
            .map(|a| glob_to_regex(a))
            .collect::<Vec<_>>()
            .join("|");
        let regex = Regex::new(&format!("(?i)^(?:{body})$"))
            .map_err(|e| EngineError::Hook(format!("invalid hook matcher {pattern:?}: {e}")))?;
        Ok(Self::Pattern(regex))
    }

    pub fn matches(&self, tool_name: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Pattern(regex) => regex.is_match(tool_name),
        }
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() * 2);
    for c in glob.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out
}

/// One shell command bound to a hook event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandHook {
    pub command: String,
    pub timeout: Duration,
}

impl CommandHook {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: DEFAULT_HOOK_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl From<&HookCommandSettings> for CommandHook {
    fn from(settings: &HookCommandSettings) -> Self {
        match settings {
            HookCommandSettings::Command { command, timeout } => Self {
                command: command.clone(),
                timeout: timeout.map_or(DEFAULT_HOOK_TIMEOUT, |s| Duration::from_secs(s.max(1))),
            },
        }
    }
}

#[derive(Clone, Debug)]
struct HookGroup {
    matcher: ToolMatcher,
    commands: Vec<CommandHook>,
}

/// The tool invocation a hook observes.
#[derive(Clone, Debug)]
pub struct HookRequest {
    pub session_id: String,
    pub cwd: PathBuf,
    pub tool_name: String,
    pub tool_description: String,
    pub tool_input: Value,
}

/// What one hook command did.
#[derive(Clone, Debug, Default)]
pub struct HookCommandResult {
    pub command: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub spawn_error: Option<String>,
}

impl HookCommandResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out && self.spawn_error.is_none()
    }

    /// Human-readable reason for a failure, preferring the hook's own output.
    pub fn failure_message(&self) -> String {
        if let Some(err) = &self.spawn_error {
            return format!("failed to run hook `{}`: {err}", self.command);
        }
        if self.timed_out {
            return format!("hook `{}` timed out", self.command);
        }
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        match self.exit_code {
            Some(code) => format!("hook `{}` exited with status {code}", self.command),
            None => format!("hook `{}` was terminated by a signal", self.command),
        }
    }
}

/// Result of running the PreToolUse hooks for one invocation.
#[derive(Clone, Debug, Default)]
pub struct HookOutcome {
    pub blocked: bool,
    /// Replacement input when some hook rewrote it.
    pub tool_input: Option<Value>,
    pub results: Vec<HookCommandResult>,
}

impl HookOutcome {
    /// Why the tool was blocked, if it was.
    pub fn block_message(&self) -> Option<String> {
        if !self.blocked {
            return None;
        }
        self.results
            .iter()
            .find(|r| !r.succeeded())
            .map(HookCommandResult::failure_message)
    }
}

#[derive(Debug, Default)]
pub struct HookEngine {
    pre_tool_use: Vec<HookGroup>,
    post_tool_use: Vec<HookGroup>,
}

impl HookEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &HooksSettings) -> Result<Self, EngineError> {
        let mut engine = Self::new();
        for group in &settings.pre_tool_use {
            engine.pre_tool_use.push(compile_group(group)?);
        }
        for group in &settings.post_tool_use {
            engine.post_tool_use.push(compile_group(group)?);
        }
        info!(
            pre_tool_use = engine.pre_tool_use.len(),
            post_tool_use = engine.post_tool_use.len(),
            "hooks configured"
        );
        Ok(engine)
    }

    pub fn add(
        &mut self,
        event: HookEvent,
        matcher: &str,
        commands: Vec<CommandHook>,
    ) -> Result<(), EngineError> {
        let group = HookGroup {
            matcher: ToolMatcher::compile(matcher)?,
            commands,
        };
        match event {
            HookEvent::PreToolUse => self.pre_tool_use.push(group),
            HookEvent::PostToolUse => self.post_tool_use.push(group),
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.pre_tool_use.is_empty() && self.post_tool_use.is_empty()
    }

    fn matching(&self, event: HookEvent, tool_name: &str) -> Vec<CommandHook> {
        let groups = match event {
            HookEvent::PreToolUse => &self.pre_tool_use,
            HookEvent::PostToolUse => &self.post_tool_use,
        };
        groups
            .iter()
            .filter(|g| g.matcher.matches(tool_name))
            .flat_map(|g| g.commands.iter().cloned())
            .collect()
    }

    /// Run matching PreToolUse hooks in order. The first failure blocks the
    /// tool and skips the rest. A hook printing `{"tool_input": ...}` on
    /// stdout replaces the input seen by later hooks and by the tool.
    pub async fn run_pre_tool_use(&self, request: &HookRequest) -> HookOutcome {
        let commands = self.matching(HookEvent::PreToolUse, &request.tool_name);
        let mut outcome = HookOutcome::default();
        if commands.is_empty() {
            return outcome;
        }

        let mut current = request.clone();
        for hook in &commands {
            let payload = stdin_payload(HookEvent::PreToolUse, &current, None);
            let result = run_command(hook, &current, &payload).await;

            if !result.succeeded() {
                warn!(
                    tool = %request.tool_name,
                    command = %hook.command,
                    exit_code = ?result.exit_code,
                    timed_out = result.timed_out,
                    "PreToolUse hook blocked tool"
                );
                outcome.blocked = true;
                outcome.results.push(result);
                return outcome;
            }

            if let Some(input) = replacement_input(&result.stdout) {
                debug!(tool = %request.tool_name, command = %hook.command, "hook replaced tool input");
                current.tool_input = input.clone();
                outcome.tool_input = Some(input);
            }
            outcome.results.push(result);
        }
        outcome
    }

    /// Spawn matching PostToolUse hooks concurrently and return without
    /// waiting. The handle resolves once every hook has settled.
    pub fn spawn_post_tool_use(
        &self,
        request: HookRequest,
        tool_response: Value,
    ) -> Option<JoinHandle<Vec<HookCommandResult>>> {
        let commands = self.matching(HookEvent::PostToolUse, &request.tool_name);
        if commands.is_empty() {
            return None;
        }

        Some(tokio::spawn(async move {
            let payload = stdin_payload(HookEvent::PostToolUse, &request, Some(&tool_response));
            let results = join_all(
                commands
                    .iter()
                    .map(|hook| run_command(hook, &request, &payload)),
            )
            .await;

            for result in &results {
                if result.succeeded() {
                    debug!(tool = %request.tool_name, command = %result.command, "PostToolUse hook finished");
                } else {
                    warn!(
                        tool = %request.tool_name,
                        command = %result.command,
                        error = %result.failure_message(),
                        "PostToolUse hook failed"
                    );
                }
            }
            results
        }))
    }
}

fn compile_group(settings: &HookMatcherSettings) -> Result<HookGroup, EngineError> {
    Ok(HookGroup {
        matcher: ToolMatcher::compile(&settings.matcher)?,
        commands: settings.hooks.iter().map(CommandHook::from).collect(),
    })
}

fn replacement_input(stdout: &str) -> Option<Value> {
    let trimmed = stdout.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    let mut parsed: Value = serde_json::from_str(trimmed).ok()?;
    parsed.get_mut("tool_input").map(Value::take)
}

fn stdin_payload(event: HookEvent, request: &HookRequest, response: Option<&Value>) -> Value {
    let mut payload = json!({
        "hook_event_name": event.as_str(),
        "session_id": request.session_id,
        "cwd": request.cwd.to_string_lossy(),
        "tool_name": request.tool_name,
        "tool_description": request.tool_description,
        "tool_input": request.tool_input,
    });
    if let Some(response) = response {
        payload["tool_response"] = response.clone();
    }
    payload
}

/// `TOOL_INPUT_<KEY>` variables for each top-level input field.
pub fn tool_input_env(input: &Value) -> Vec<(String, String)> {
    let Some(obj) = input.as_object() else {
        return Vec::new();
    };
    obj.iter()
        .filter_map(|(key, value)| {
            let key: String = key
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() {
                        c.to_ascii_uppercase()
                    } else {
                        '_'
                    }
                })
                .collect();
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let name = format!("TOOL_INPUT_{key}");
            // The kernel rejects oversized env strings at exec. The full
            // input still reaches the hook on stdin.
            if value.len() > MAX_ENV_VALUE_BYTES {
                warn!(var = %name, bytes = value.len(), "tool input too large for hook env, omitted");
                return None;
            }
            Some((name, value))
        })
        .collect()
}

async fn run_command(hook: &CommandHook, request: &HookRequest, payload: &Value) -> HookCommandResult {
    let mut result = HookCommandResult {
        command: hook.command.clone(),
        ..Default::default()
    };

    let mut process = Command::new("sh");
    process
        .arg("-c")
        .arg(&hook.command)
        .current_dir(&request.cwd)
        .env("TOOL_NAME", &request.tool_name)
        .env("TOOL_DESCRIPTION", &request.tool_description)
        .envs(tool_input_env(&request.tool_input))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match process.spawn() {
        Ok(child) => child,
        Err(e) => {
            result.spawn_error = Some(e.to_string());
            return result;
        }
    };

    // Written from its own task so a hook that never drains stdin cannot
    // hold the command past its timeout.
    let stdin_task = child.stdin.take().map(|mut stdin| {
        let mut bytes = payload.to_string().into_bytes();
        bytes.push(b'\n');
        let command = hook.command.clone();
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&bytes).await {
                debug!(command = %command, error = %e, "hook did not consume stdin");
            }
            let _ = stdin.shutdown().await;
        })
    });

    let stdout_task = child.stdout.take().map(|mut pipe| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf).await;
            buf
        })
    });
    let stderr_task = child.stderr.take().map(|mut pipe| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf).await;
            buf
        })
    });

    match tokio::time::timeout(hook.timeout, child.wait()).await {
        Ok(Ok(status)) => result.exit_code = status.code(),
        Ok(Err(e)) => result.spawn_error = Some(e.to_string()),
        Err(_) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            result.timed_out = true;
            for task in [&stdout_task, &stderr_task].into_iter().flatten() {
                task.abort();
            }
            if let Some(task) = &stdin_task {
                task.abort();
            }
            return result;
        }
    }

    if let Some(task) = stdin_task {
        task.abort();
    }
    if let Some(task) = stdout_task {
        result.stdout = String::from_utf8_lossy(&task.await.unwrap_or_default()).into_owned();
    }
    if let Some(task) = stderr_task {
        result.stderr = String::from_utf8_lossy(&task.await.unwrap_or_default()).into_owned();
    }
    result
}
