//! The conversation loop.
//!
//! One iteration: compact if over budget, ask the model, dispatch every
//! requested tool in order, then go again with the results appended. The
//! loop ends when the model requests no tools, the caller cancels, or the
//! turn limit is hit.

use std::collections::HashMap;
use std::sync::Arc;

use async_stream::try_stream;
use futures::{pin_mut, Stream, StreamExt};
use tracing::{debug, info, instrument};

use scout_core::ids::ToolUseId;
use scout_core::messages::{
    AssistantMessage, Message, ToolResultBlock, ToolUseBlock, INTERRUPT_MESSAGE,
    INTERRUPT_MESSAGE_FOR_TOOL_USE,
};
use scout_core::provider::CompletionRequest;
use scout_core::tools::ToolContext;
use scout_llm::ProviderRouter;
use scout_settings::QuerySettings;
use scout_store::CompactionStats;

use crate::compaction::{self, CompactionEngine};
use crate::dispatcher::{DispatchEvent, ToolDispatcher, INTERRUPTED_MESSAGE};
use crate::error::EngineError;
use crate::prompt::format_system_prompt;

pub const DEFAULT_MAX_TURNS: u32 = 100;

#[derive(Clone, Debug)]
pub struct QueryConfig {
    /// Prompt blocks, may contain `{{key}}` placeholders.
    pub system_prompt: Vec<String>,
    pub prompt_context: HashMap<String, String>,
    pub max_thinking_tokens: u32,
    pub max_turns: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            system_prompt: Vec::new(),
            prompt_context: HashMap::new(),
            max_thinking_tokens: 0,
            max_turns: DEFAULT_MAX_TURNS,
        }
    }
}

impl QueryConfig {
    pub fn from_settings(settings: &QuerySettings) -> Self {
        Self {
            max_thinking_tokens: settings.max_thinking_tokens,
            max_turns: settings.max_turns,
            ..Default::default()
        }
    }

    pub fn with_system_prompt(mut self, blocks: Vec<String>) -> Self {
        self.system_prompt = blocks;
        self
    }

    pub fn with_prompt_context(mut self, context: HashMap<String, String>) -> Self {
        self.prompt_context = context;
        self
    }
}

#[derive(Clone, Debug)]
pub enum QueryEvent {
    Message(Message),
    /// History was replaced. Later messages continue from `messages`.
    Compacted {
        messages: Vec<Message>,
        stats: CompactionStats,
    },
}

impl QueryEvent {
    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Self::Message(m) => Some(m),
            Self::Compacted { .. } => None,
        }
    }
}

pub struct QueryLoop {
    router: Arc<ProviderRouter>,
    dispatcher: Arc<ToolDispatcher>,
    compaction: Option<Arc<CompactionEngine>>,
    config: QueryConfig,
}

impl QueryLoop {
    pub fn new(
        router: Arc<ProviderRouter>,
        dispatcher: Arc<ToolDispatcher>,
        config: QueryConfig,
    ) -> Self {
        Self {
            router,
            dispatcher,
            compaction: None,
            config,
        }
    }

    pub fn with_compaction(mut self, engine: Arc<CompactionEngine>) -> Self {
        self.compaction = Some(engine);
        self
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    fn system_prompt(&self) -> Vec<String> {
        format_system_prompt(&self.config.system_prompt, &self.config.prompt_context)
    }

    /// Drive the conversation from `messages`. The caller's history is never
    /// touched; everything new arrives on the stream in order.
    pub fn run(
        &self,
        messages: Vec<Message>,
        ctx: ToolContext,
    ) -> impl Stream<Item = Result<QueryEvent, EngineError>> + Send + '_ {
        try_stream! {
            let system_prompt = self.system_prompt();
            let tools = self.dispatcher.registry().definitions();
            let mut history = messages;
            let mut turn: u32 = 0;

            loop {
                if turn >= self.config.max_turns {
                    Err::<(), _>(EngineError::MaxTurnsExceeded(self.config.max_turns))?;
                }
                turn += 1;

                if let Some(engine) = &self.compaction {
                    if let Some(compacted) = engine.auto_compact(&history).await {
                        history = compacted.messages.clone();
                        yield QueryEvent::Compacted {
                            messages: compacted.messages,
                            stats: compacted.stats,
                        };
                    }
                }

                let request = CompletionRequest::new(history.clone(), system_prompt.clone())
                    .with_tools(tools.clone())
                    .with_thinking(self.config.max_thinking_tokens);

                debug!(turn, messages = history.len(), "requesting completion");
                let response = tokio::select! {
                    biased;
                    _ = ctx.abort_signal.cancelled() => None,
                    result = self.router.query(&request) => Some(result),
                };

                let assistant = match response {
                    Some(result) if !ctx.abort_signal.is_cancelled() => result?,
                    _ => {
                        info!(turn, "request interrupted");
                        yield QueryEvent::Message(Message::synthetic_assistant(INTERRUPT_MESSAGE));
                        break;
                    }
                };

                let requests: Vec<ToolUseBlock> =
                    assistant.tool_uses().into_iter().cloned().collect();
                let assistant = Message::Assistant(assistant);
                yield QueryEvent::Message(assistant.clone());

                if requests.is_empty() {
                    debug!(turn, "turn complete");
                    break;
                }

                let mut collected: Vec<(ToolUseId, Message)> = Vec::with_capacity(requests.len());
                for request in &requests {
                    if ctx.abort_signal.is_cancelled() {
                        break;
                    }
                    let events = self.dispatcher.dispatch(request, &ctx);
                    pin_mut!(events);
                    while let Some(event) = events.next().await {
                        match event? {
                            DispatchEvent::Progress(progress) => {
                                yield QueryEvent::Message(progress);
                            }
                            DispatchEvent::Completed(block) => {
                                let id = block.tool_use_id.clone();
                                let result = Message::tool_results(vec![block]);
                                yield QueryEvent::Message(result.clone());
                                collected.push((id, result));
                            }
                        }
                    }
                }

                if ctx.abort_signal.is_cancelled() {
                    let missing: Vec<ToolResultBlock> = requests
                        .iter()
                        .filter(|r| !collected.iter().any(|(id, _)| id == &r.id))
                        .map(|r| ToolResultBlock::error(r.id.clone(), INTERRUPTED_MESSAGE))
                        .collect();
                    if !missing.is_empty() {
                        yield QueryEvent::Message(Message::tool_results(missing));
                    }
                    info!(turn, "tool use interrupted");
                    yield QueryEvent::Message(Message::synthetic_assistant(
                        INTERRUPT_MESSAGE_FOR_TOOL_USE,
                    ));
                    break;
                }

                order_by_request(&mut collected, &requests);
                history.push(assistant);
                history.extend(collected.into_iter().map(|(_, m)| m));
            }
        }
    }

    /// Run to the end and collect every event.
    #[instrument(skip_all, fields(messages = messages.len()))]
    pub async fn run_to_completion(
        &self,
        messages: Vec<Message>,
        ctx: ToolContext,
    ) -> Result<Vec<QueryEvent>, EngineError> {
        let stream = self.run(messages, ctx);
        pin_mut!(stream);
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event?);
        }
        Ok(events)
    }

    /// One tool-free call asking for a summary of `messages`. The history
    /// itself is left alone.
    #[instrument(skip_all, fields(messages = messages.len()))]
    pub async fn summarize(&self, messages: &[Message]) -> Result<AssistantMessage, EngineError> {
        let request = compaction::summary_request(messages, self.system_prompt());
        Ok(self.router.query(&request).await?)
    }
}

/// Sort results by the position of their request in the assistant turn.
fn order_by_request(results: &mut [(ToolUseId, Message)], requests: &[ToolUseBlock]) {
    let position: HashMap<&ToolUseId, usize> =
        requests.iter().enumerate().map(|(i, r)| (&r.id, i)).collect();
    results.sort_by_key(|(id, _)| position.get(id).copied().unwrap_or(usize::MAX));
}
