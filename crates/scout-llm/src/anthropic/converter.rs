use serde::Deserialize;
use serde_json::{json, Value};

use scout_core::errors::ProviderError;
use scout_core::ids::ToolUseId;
use scout_core::messages::{
    AssistantContent, AssistantMessage, Message, StopReason, ToolUseBlock, UserContent,
    UserMessage,
};
use scout_core::provider::CompletionRequest;
use scout_core::tokens::TokenUsage;

/// First system block on every OAuth-authenticated request.
pub const OAUTH_SYSTEM_PREAMBLE: &str = "You are Claude Code, Anthropic's official CLI for Claude.";

/// Headroom added on top of the thinking budget so the visible answer fits.
const THINKING_OUTPUT_HEADROOM: u32 = 4096;

/// Build the Messages API request body.
pub fn build_request_body(
    request: &CompletionRequest,
    model: &str,
    default_max_tokens: u32,
    is_oauth: bool,
) -> Value {
    let mut max_tokens = request.max_tokens.unwrap_or(default_max_tokens);

    let mut body = json!({ "model": model });

    if request.max_thinking_tokens > 0 {
        // The API rejects budgets that do not leave room for output.
        if max_tokens <= request.max_thinking_tokens {
            max_tokens = request.max_thinking_tokens + THINKING_OUTPUT_HEADROOM;
        }
        body["thinking"] = json!({
            "type": "enabled",
            "budget_tokens": request.max_thinking_tokens,
        });
    }
    body["max_tokens"] = json!(max_tokens);

    let system = convert_system_blocks(&request.system_prompt, is_oauth);
    if !system.is_empty() {
        body["system"] = json!(system);
    }

    body["messages"] = json!(convert_messages(&request.messages));

    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect();
        body["tools"] = json!(tools);
    }

    body
}

fn convert_system_blocks(blocks: &[String], is_oauth: bool) -> Vec<Value> {
    let preamble = is_oauth.then_some(OAUTH_SYSTEM_PREAMBLE);
    preamble
        .into_iter()
        .chain(blocks.iter().map(String::as_str))
        .filter(|text| !text.trim().is_empty())
        .map(|text| json!({"type": "text", "text": text}))
        .collect()
}

fn convert_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .filter_map(|msg| match msg {
            Message::User(user) => Some(convert_user_message(user)),
            Message::Assistant(asst) => Some(convert_assistant_message(asst)),
            Message::Progress(_) => None,
        })
        .collect()
}

fn convert_user_message(msg: &UserMessage) -> Value {
    let content: Vec<Value> = msg
        .content
        .iter()
        .map(|c| match c {
            UserContent::Text { text } => json!({"type": "text", "text": text}),
            UserContent::Image { media_type, data } => json!({
                "type": "image",
                "source": {"type": "base64", "media_type": media_type, "data": data}
            }),
            UserContent::ToolResult(result) => json!({
                "type": "tool_result",
                "tool_use_id": result.tool_use_id,
                "content": result.content,
                "is_error": result.is_error,
            }),
        })
        .collect();

    json!({"role": "user", "content": content})
}

fn convert_assistant_message(msg: &AssistantMessage) -> Value {
    let content: Vec<Value> = msg
        .content
        .iter()
        .filter_map(|c| match c {
            AssistantContent::Text { text } => Some(json!({"type": "text", "text": text})),
            // Unsigned thinking cannot be replayed.
            AssistantContent::Thinking {
                thinking,
                signature,
            } => signature.as_ref().map(|sig| {
                json!({
                    "type": "thinking",
                    "thinking": thinking,
                    "signature": sig,
                })
            }),
            AssistantContent::RedactedThinking { data } => {
                Some(json!({"type": "redacted_thinking", "data": data}))
            }
            AssistantContent::ToolUse(tu) => Some(json!({
                "type": "tool_use",
                "id": tu.id,
                "name": tu.name,
                "input": tu.input,
            })),
        })
        .collect();

    json!({"role": "assistant", "content": content})
}

// --- Response parsing ---

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    content: Vec<ApiContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: ApiUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
        #[serde(default)]
        signature: Option<String>,
    },
    RedactedThinking {
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Default, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
    #[serde(default)]
    cache_creation_input_tokens: u32,
    #[serde(default)]
    cache_read_input_tokens: u32,
}

/// Parse a non-streaming Messages API response into an assistant turn.
pub fn parse_response(body: &str) -> Result<AssistantMessage, ProviderError> {
    let resp: ApiResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Decode(e.to_string()))?;

    let content = resp
        .content
        .into_iter()
        .filter_map(|block| match block {
            ApiContentBlock::Text { text } => Some(AssistantContent::Text { text }),
            ApiContentBlock::Thinking {
                thinking,
                signature,
            } => Some(AssistantContent::Thinking {
                thinking,
                signature,
            }),
            ApiContentBlock::RedactedThinking { data } => {
                Some(AssistantContent::RedactedThinking { data })
            }
            ApiContentBlock::ToolUse { id, name, input } => {
                Some(AssistantContent::ToolUse(ToolUseBlock {
                    id: ToolUseId::from_raw(id),
                    name,
                    input: if input.is_null() { json!({}) } else { input },
                }))
            }
            ApiContentBlock::Unknown => None,
        })
        .collect();

    let mut msg = AssistantMessage::new(content).with_usage(TokenUsage {
        input_tokens: resp.usage.input_tokens,
        output_tokens: resp.usage.output_tokens,
        cache_read_tokens: resp.usage.cache_read_input_tokens,
        cache_creation_tokens: resp.usage.cache_creation_input_tokens,
    });
    msg.stop_reason = resp.stop_reason.as_deref().and_then(StopReason::parse);
    Ok(msg)
}
