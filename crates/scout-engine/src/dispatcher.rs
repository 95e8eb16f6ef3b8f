//! Runs one tool-use request through lookup, hooks, validation, permission
//! and execution, turning every failure a tool can cause into an error
//! result for the model.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_stream::try_stream;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, error, warn};

use scout_core::messages::{Message, ToolResultBlock, ToolUseBlock};
use scout_core::tools::{Tool, ToolContext, ToolError, ToolEvent};

use crate::error::EngineError;
use crate::hooks::{HookEngine, HookRequest};
use crate::permissions::{AllowAll, PermissionCheck};
use crate::registry::ToolRegistry;

pub const PERMISSION_DENIED_MESSAGE: &str = "Permission denied by user";
pub const INTERRUPTED_MESSAGE: &str = "Interrupted by user";
const TOOL_CRASHED_MESSAGE: &str = "Internal error: tool crashed";

pub fn no_such_tool_message(name: &str) -> String {
    format!("Error: No such tool available: {name}")
}

#[derive(Clone, Debug)]
pub enum DispatchEvent {
    Progress(Message),
    /// Always the last event for a request.
    Completed(ToolResultBlock),
}

type GuardedStream =
    BoxStream<'static, Result<Result<ToolEvent, ToolError>, Box<dyn Any + Send>>>;

enum Prepared {
    Done(ToolResultBlock),
    Run { tool: Arc<dyn Tool>, input: Value },
}

enum Finished {
    Result(Value),
    Failed(String),
    Panicked(String),
    Interrupted,
    Incomplete,
}

pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    hooks: Arc<HookEngine>,
    permission: Arc<dyn PermissionCheck>,
    skip_permissions: bool,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            hooks: Arc::new(HookEngine::new()),
            permission: Arc::new(AllowAll),
            skip_permissions: false,
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<HookEngine>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_permission(mut self, permission: Arc<dyn PermissionCheck>) -> Self {
        self.permission = permission;
        self
    }

    pub fn with_skip_permissions(mut self, skip: bool) -> Self {
        self.skip_permissions = skip;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Stream the progress of one request, ending with its result.
    ///
    /// The only error item is [`EngineError::ToolStreamIncomplete`]; every
    /// other failure arrives as an error result.
    pub fn dispatch<'a>(
        &'a self,
        request: &'a ToolUseBlock,
        ctx: &'a ToolContext,
    ) -> impl Stream<Item = Result<DispatchEvent, EngineError>> + Send + 'a {
        try_stream! {
            match self.prepare(request, ctx).await {
                Prepared::Done(block) => {
                    yield DispatchEvent::Completed(block);
                }
                Prepared::Run { tool, input } => {
                    let mut events = guarded_execute(tool.as_ref(), input.clone(), ctx);

                    let finished = loop {
                        let step = tokio::select! {
                            biased;
                            _ = ctx.abort_signal.cancelled() => None,
                            item = events.next() => Some(item),
                        };
                        match step {
                            None => break Finished::Interrupted,
                            Some(None) => break Finished::Incomplete,
                            Some(Some(Err(panic))) => break Finished::Panicked(panic_message(&panic)),
                            Some(Some(Ok(Err(e)))) => break Finished::Failed(e.for_assistant()),
                            Some(Some(Ok(Ok(ToolEvent::Result { data })))) => break Finished::Result(data),
                            Some(Some(Ok(Ok(ToolEvent::Progress { content })))) => {
                                yield DispatchEvent::Progress(Message::progress(request.id.clone(), content));
                            }
                        }
                    };
                    // Dropping the stream stops the tool if it is still running.
                    drop(events);

                    let block = match finished {
                        Finished::Result(data) => {
                            let rendered = render(tool.as_ref(), &data);
                            self.spawn_post_hooks(tool.as_ref(), &input, ctx, data);
                            Some(ToolResultBlock::success(request.id.clone(), rendered))
                        }
                        Finished::Failed(message) => {
                            debug!(tool = %request.name, error = %message, "tool returned error");
                            self.spawn_post_hooks(
                                tool.as_ref(),
                                &input,
                                ctx,
                                serde_json::json!({"error": message}),
                            );
                            Some(ToolResultBlock::error(request.id.clone(), message))
                        }
                        Finished::Panicked(msg) => {
                            error!(tool = %request.name, panic = %msg, "tool panicked during execution");
                            Some(ToolResultBlock::error(request.id.clone(), TOOL_CRASHED_MESSAGE))
                        }
                        Finished::Interrupted => {
                            debug!(tool = %request.name, "tool interrupted");
                            Some(ToolResultBlock::error(request.id.clone(), INTERRUPTED_MESSAGE))
                        }
                        Finished::Incomplete => None,
                    };
                    let block = block.ok_or_else(|| EngineError::ToolStreamIncomplete {
                        tool: request.name.clone(),
                    })?;
                    yield DispatchEvent::Completed(block);
                }
            }
        }
    }

    /// Everything before execution. Any early exit is a finished result.
    async fn prepare(&self, request: &ToolUseBlock, ctx: &ToolContext) -> Prepared {
        let id = &request.id;

        if ctx.abort_signal.is_cancelled() {
            return Prepared::Done(ToolResultBlock::error(id.clone(), INTERRUPTED_MESSAGE));
        }

        let Some(tool) = self.registry.get(&request.name) else {
            warn!(tool = %request.name, "tool not found");
            return Prepared::Done(ToolResultBlock::error(
                id.clone(),
                no_such_tool_message(&request.name),
            ));
        };

        let mut input = request.input.clone();

        let outcome = self
            .hooks
            .run_pre_tool_use(&hook_request(tool.as_ref(), &input, ctx))
            .await;
        if outcome.blocked {
            let reason = outcome
                .block_message()
                .unwrap_or_else(|| "blocked by hook".to_string());
            return Prepared::Done(ToolResultBlock::error(
                id.clone(),
                format!("Tool blocked by PreToolUse hook: {reason}"),
            ));
        }
        if let Some(replacement) = outcome.tool_input {
            input = replacement;
        }

        match AssertUnwindSafe(tool.validate(&input, ctx)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(tool = %request.name, error = %e, "tool input rejected");
                return Prepared::Done(ToolResultBlock::error(id.clone(), e.for_assistant()));
            }
            Err(panic) => {
                error!(tool = %request.name, panic = %panic_message(&panic), "tool panicked during validation");
                return Prepared::Done(ToolResultBlock::error(id.clone(), TOOL_CRASHED_MESSAGE));
            }
        }

        if !self.skip_permissions
            && tool.needs_permission(&input)
            && !self.permission.can_use_tool(&request.name, &input).await
        {
            debug!(tool = %request.name, "permission denied");
            return Prepared::Done(ToolResultBlock::error(id.clone(), PERMISSION_DENIED_MESSAGE));
        }

        Prepared::Run { tool, input }
    }

    fn spawn_post_hooks(&self, tool: &dyn Tool, input: &Value, ctx: &ToolContext, response: Value) {
        // Not awaited: PostToolUse hooks only observe.
        let _ = self
            .hooks
            .spawn_post_tool_use(hook_request(tool, input, ctx), response);
    }
}

fn hook_request(tool: &dyn Tool, input: &Value, ctx: &ToolContext) -> HookRequest {
    HookRequest {
        session_id: ctx.session_id.to_string(),
        cwd: ctx.working_directory.clone(),
        tool_name: tool.name().to_string(),
        tool_description: tool.description().to_string(),
        tool_input: input.clone(),
    }
}

fn guarded_execute(tool: &dyn Tool, input: Value, ctx: &ToolContext) -> GuardedStream {
    match std::panic::catch_unwind(AssertUnwindSafe(|| tool.execute(input, ctx))) {
        Ok(events) => AssertUnwindSafe(events).catch_unwind().boxed(),
        Err(panic) => stream::once(futures::future::ready(Err(panic))).boxed(),
    }
}

fn render(tool: &dyn Tool, data: &Value) -> String {
    let rendered =
        std::panic::catch_unwind(AssertUnwindSafe(|| tool.render_result_for_assistant(data)))
            .ok()
            .flatten();
    rendered.unwrap_or_else(|| match data {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use scout_core::ids::ToolUseId;
    use scout_core::tools::ToolEventStream;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use crate::hooks::{CommandHook, HookEvent};
    use crate::permissions::{DenyAll, FnPermission};
    use crate::registry::ToolSource;

    #[derive(Clone, Copy)]
    enum Behavior {
        Echo,
        Json,
        Incomplete,
        PanicOnExecute,
        PanicWhilePolling,
        Fails,
        Hangs,
    }

    struct TestTool {
        name: &'static str,
        behavior: Behavior,
        read_only: bool,
        require_path: bool,
        executions: Arc<AtomicUsize>,
    }

    impl TestTool {
        fn new(name: &'static str, behavior: Behavior) -> Self {
            Self {
                name,
                behavior,
                read_only: true,
                require_path: false,
                executions: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn writes(mut self) -> Self {
            self.read_only = false;
            self
        }

        fn requiring_path(mut self) -> Self {
            self.require_path = true;
            self
        }
    }

    #[async_trait]
    impl Tool for TestTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "test tool"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        fn is_read_only(&self) -> bool {
            self.read_only
        }
        async fn validate(&self, input: &Value, _ctx: &ToolContext) -> Result<(), ToolError> {
            if self.require_path && input.get("path").is_none() {
                return Err(ToolError::InvalidArguments("path is required".into()));
            }
            Ok(())
        }
        fn execute(&self, input: Value, _ctx: &ToolContext) -> ToolEventStream {
            self.executions.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Echo => events(vec![
                    Ok(ToolEvent::progress("working")),
                    Ok(ToolEvent::result(input)),
                ]),
                Behavior::Json => events(vec![Ok(ToolEvent::result(json!({"lines": 3})))]),
                Behavior::Incomplete => events(vec![Ok(ToolEvent::progress("almost"))]),
                Behavior::PanicOnExecute => panic!("boom"),
                Behavior::PanicWhilePolling => Box::pin(stream::once(async move {
                    if input.is_object() {
                        panic!("boom later");
                    }
                    Ok::<_, ToolError>(ToolEvent::result("never"))
                })),
                Behavior::Fails => events(vec![Err(ToolError::ExecutionFailed(
                    "disk full".into(),
                ))]),
                Behavior::Hangs => Box::pin(stream::pending::<Result<ToolEvent, ToolError>>()),
            }
        }
        fn render_result_for_assistant(&self, data: &Value) -> Option<String> {
            match self.behavior {
                Behavior::Echo => Some(format!("echo: {data}")),
                _ => None,
            }
        }
    }

    fn events(items: Vec<Result<ToolEvent, ToolError>>) -> ToolEventStream {
        Box::pin(stream::iter(items))
    }

    fn dispatcher_with(tools: Vec<TestTool>) -> ToolDispatcher {
        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register(Arc::new(tool), ToolSource::BuiltIn);
        }
        ToolDispatcher::new(Arc::new(registry))
    }

    fn request(name: &str, input: Value) -> ToolUseBlock {
        ToolUseBlock {
            id: ToolUseId::from_raw("toolu_1"),
            name: name.into(),
            input,
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::new(std::env::temp_dir(), CancellationToken::new())
    }

    async fn run(
        dispatcher: &ToolDispatcher,
        request: &ToolUseBlock,
        ctx: &ToolContext,
    ) -> (Vec<Message>, Result<ToolResultBlock, EngineError>) {
        let mut progress = Vec::new();
        let stream = dispatcher.dispatch(request, ctx);
        futures::pin_mut!(stream);
        while let Some(event) = stream.next().await {
            match event {
                Ok(DispatchEvent::Progress(msg)) => progress.push(msg),
                Ok(DispatchEvent::Completed(block)) => return (progress, Ok(block)),
                Err(e) => return (progress, Err(e)),
            }
        }
        panic!("dispatch ended without a result");
    }

    #[tokio::test]
    async fn unknown_tool_is_error_result() {
        let dispatcher = dispatcher_with(vec![]);
        let (_, result) = run(&dispatcher, &request("Nope", json!({})), &ctx()).await;
        let block = result.unwrap();
        assert!(block.is_error);
        assert_eq!(block.content, "Error: No such tool available: Nope");
        assert_eq!(block.tool_use_id.as_str(), "toolu_1");
    }

    #[tokio::test]
    async fn progress_then_rendered_result() {
        let dispatcher = dispatcher_with(vec![TestTool::new("Echo", Behavior::Echo)]);
        let (progress, result) = run(&dispatcher, &request("Echo", json!({"a": 1})), &ctx()).await;

        assert_eq!(progress.len(), 1);
        assert!(matches!(&progress[0], Message::Progress(p) if p.content == "working"));
        let block = result.unwrap();
        assert!(!block.is_error);
        assert_eq!(block.content, r#"echo: {"a":1}"#);
    }

    #[tokio::test]
    async fn unrendered_result_falls_back_to_json() {
        let dispatcher = dispatcher_with(vec![TestTool::new("Count", Behavior::Json)]);
        let (_, result) = run(&dispatcher, &request("Count", json!({})), &ctx()).await;
        assert_eq!(result.unwrap().content, r#"{"lines":3}"#);
    }

    #[tokio::test]
    async fn validation_failure_skips_execution() {
        let tool = TestTool::new("Read", Behavior::Echo).requiring_path();
        let executions = Arc::clone(&tool.executions);
        let dispatcher = dispatcher_with(vec![tool]);

        let (_, result) = run(&dispatcher, &request("Read", json!({})), &ctx()).await;
        let block = result.unwrap();
        assert!(block.is_error);
        assert_eq!(block.content, "path is required");
        assert_eq!(executions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn permission_denied_for_writing_tool() {
        let tool = TestTool::new("Write", Behavior::Echo).writes();
        let executions = Arc::clone(&tool.executions);
        let dispatcher = dispatcher_with(vec![tool]).with_permission(Arc::new(DenyAll));

        let (_, result) = run(&dispatcher, &request("Write", json!({})), &ctx()).await;
        let block = result.unwrap();
        assert!(block.is_error);
        assert_eq!(block.content, PERMISSION_DENIED_MESSAGE);
        assert_eq!(executions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn read_only_tools_never_ask() {
        let asked = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&asked);
        let dispatcher = dispatcher_with(vec![TestTool::new("Echo", Behavior::Echo)])
            .with_permission(Arc::new(FnPermission(move |_: &str, _: &Value| {
                counter.fetch_add(1, Ordering::SeqCst);
                false
            })));

        let (_, result) = run(&dispatcher, &request("Echo", json!({})), &ctx()).await;
        assert!(!result.unwrap().is_error);
        assert_eq!(asked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn skip_permissions_bypasses_check() {
        let dispatcher = dispatcher_with(vec![TestTool::new("Write", Behavior::Echo).writes()])
            .with_permission(Arc::new(DenyAll))
            .with_skip_permissions(true);
        let (_, result) = run(&dispatcher, &request("Write", json!({})), &ctx()).await;
        assert!(!result.unwrap().is_error);
    }

    #[tokio::test]
    async fn stream_without_result_propagates() {
        let dispatcher = dispatcher_with(vec![TestTool::new("Half", Behavior::Incomplete)]);
        let (progress, result) = run(&dispatcher, &request("Half", json!({})), &ctx()).await;
        assert_eq!(progress.len(), 1);
        assert!(matches!(
            result,
            Err(EngineError::ToolStreamIncomplete { tool }) if tool == "Half"
        ));
    }

    #[tokio::test]
    async fn panics_become_error_results() {
        let dispatcher = dispatcher_with(vec![
            TestTool::new("Boom", Behavior::PanicOnExecute),
            TestTool::new("Later", Behavior::PanicWhilePolling),
        ]);

        for name in ["Boom", "Later"] {
            let (_, result) = run(&dispatcher, &request(name, json!({})), &ctx()).await;
            let block = result.unwrap();
            assert!(block.is_error);
            assert_eq!(block.content, TOOL_CRASHED_MESSAGE);
        }
    }

    #[tokio::test]
    async fn error_item_becomes_error_result() {
        let dispatcher = dispatcher_with(vec![TestTool::new("Disk", Behavior::Fails)]);
        let (_, result) = run(&dispatcher, &request("Disk", json!({})), &ctx()).await;
        let block = result.unwrap();
        assert!(block.is_error);
        assert_eq!(block.content, "disk full");
    }

    #[tokio::test]
    async fn cancellation_interrupts_running_tool() {
        let dispatcher = dispatcher_with(vec![TestTool::new("Wait", Behavior::Hangs)]);
        let ctx = ctx();
        let token = ctx.abort_signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let (_, result) = run(&dispatcher, &request("Wait", json!({})), &ctx).await;
        let block = result.unwrap();
        assert!(block.is_error);
        assert_eq!(block.content, INTERRUPTED_MESSAGE);
    }

    #[tokio::test]
    async fn cancelled_before_start_does_not_execute() {
        let tool = TestTool::new("Echo", Behavior::Echo);
        let executions = Arc::clone(&tool.executions);
        let dispatcher = dispatcher_with(vec![tool]);
        let ctx = ctx();
        ctx.abort_signal.cancel();

        let (_, result) = run(&dispatcher, &request("Echo", json!({})), &ctx).await;
        assert_eq!(result.unwrap().content, INTERRUPTED_MESSAGE);
        assert_eq!(executions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn blocking_hook_prevents_execution() {
        let tool = TestTool::new("Echo", Behavior::Echo);
        let executions = Arc::clone(&tool.executions);
        let mut hooks = HookEngine::new();
        hooks
            .add(
                HookEvent::PreToolUse,
                "Echo",
                vec![CommandHook::new("echo 'echo is disabled' >&2; exit 1")],
            )
            .unwrap();
        let dispatcher = dispatcher_with(vec![tool]).with_hooks(Arc::new(hooks));

        let (_, result) = run(&dispatcher, &request("Echo", json!({})), &ctx()).await;
        let block = result.unwrap();
        assert!(block.is_error);
        assert!(block.content.contains("echo is disabled"), "{}", block.content);
        assert_eq!(executions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn hook_replacement_input_reaches_tool() {
        let mut hooks = HookEngine::new();
        hooks
            .add(
                HookEvent::PreToolUse,
                "*",
                vec![CommandHook::new(r#"echo '{"tool_input": {"path": "/safe"}}'"#)],
            )
            .unwrap();
        let dispatcher = dispatcher_with(vec![TestTool::new("Read", Behavior::Echo).requiring_path()])
            .with_hooks(Arc::new(hooks));

        let (_, result) = run(&dispatcher, &request("Read", json!({})), &ctx()).await;
        let block = result.unwrap();
        assert!(!block.is_error, "{}", block.content);
        assert_eq!(block.content, r#"echo: {"path":"/safe"}"#);
    }

    fn post_hook(command: String) -> Arc<HookEngine> {
        let mut hooks = HookEngine::new();
        hooks
            .add(HookEvent::PostToolUse, "*", vec![CommandHook::new(command)])
            .unwrap();
        Arc::new(hooks)
    }

    #[tokio::test]
    async fn post_hooks_are_not_awaited() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let dispatcher = dispatcher_with(vec![TestTool::new("Json", Behavior::Json)])
            .with_hooks(post_hook(format!("sleep 5; touch {}", marker.display())));
        let ctx = ToolContext::new(dir.path(), CancellationToken::new());

        let start = std::time::Instant::now();
        let (_, result) = run(&dispatcher, &request("Json", json!({})), &ctx).await;
        assert!(!result.unwrap().is_error);
        assert!(start.elapsed() < Duration::from_secs(2), "took {:?}", start.elapsed());
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn post_hooks_see_error_response() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("post.json");
        let dispatcher = dispatcher_with(vec![TestTool::new("Fails", Behavior::Fails)])
            .with_hooks(post_hook(format!("cat > {}.tmp && mv {0}.tmp {0}", out.display())));
        let ctx = ToolContext::new(dir.path(), CancellationToken::new());

        let (_, result) = run(&dispatcher, &request("Fails", json!({})), &ctx).await;
        assert_eq!(result.unwrap().content, "disk full");

        let mut payload = None;
        for _ in 0..100 {
            if let Ok(text) = std::fs::read_to_string(&out) {
                payload = Some(serde_json::from_str::<Value>(&text).unwrap());
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let payload = payload.expect("post hook never ran");
        assert_eq!(payload["hook_event_name"], "PostToolUse");
        assert_eq!(payload["tool_response"], json!({"error": "disk full"}));
    }
}
