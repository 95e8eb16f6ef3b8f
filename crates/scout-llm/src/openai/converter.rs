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

/// Key under which unparseable tool-call arguments are preserved.
pub const RAW_ARGUMENTS_KEY: &str = "_raw";

/// Build the chat-completions request body.
pub fn build_request_body(request: &CompletionRequest, model: &str, max_tokens: u32) -> Value {
    let mut messages: Vec<Value> = Vec::with_capacity(request.messages.len() + 1);

    let system = request
        .system_prompt
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    if !system.is_empty() {
        messages.push(json!({"role": "system", "content": system}));
    }

    for msg in &request.messages {
        match msg {
            Message::User(user) => messages.extend(convert_user_message(user)),
            Message::Assistant(asst) => messages.push(convert_assistant_message(asst)),
            Message::Progress(_) => {}
        }
    }

    let mut body = json!({
        "model": model,
        "messages": messages,
        "max_tokens": request.max_tokens.unwrap_or(max_tokens),
    });

    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    }
                })
            })
            .collect();
        body["tools"] = json!(tools);
    }

    body
}

/// A tool-result-only user message becomes one `tool` message per result.
/// Anything mixed is flattened into a single user message.
fn convert_user_message(msg: &UserMessage) -> Vec<Value> {
    if msg.is_tool_result_only() {
        return msg
            .tool_results()
            .map(|r| {
                json!({
                    "role": "tool",
                    "tool_call_id": r.tool_use_id,
                    "content": r.content,
                })
            })
            .collect();
    }

    let has_image = msg
        .content
        .iter()
        .any(|c| matches!(c, UserContent::Image { .. }));

    if has_image {
        let parts: Vec<Value> = msg
            .content
            .iter()
            .map(|c| match c {
                UserContent::Text { text } => json!({"type": "text", "text": text}),
                UserContent::Image { media_type, data } => json!({
                    "type": "image_url",
                    "image_url": {"url": format!("data:{media_type};base64,{data}")}
                }),
                UserContent::ToolResult(r) => {
                    json!({"type": "text", "text": flatten_tool_result(r)})
                }
            })
            .collect();
        return vec![json!({"role": "user", "content": parts})];
    }

    let text = msg
        .content
        .iter()
        .map(|c| match c {
            UserContent::Text { text } => text.clone(),
            UserContent::ToolResult(r) => flatten_tool_result(r),
            UserContent::Image { .. } => String::new(),
        })
        .collect::<Vec<_>>()
        .join("\n");
    vec![json!({"role": "user", "content": text})]
}

fn flatten_tool_result(r: &scout_core::messages::ToolResultBlock) -> String {
    format!(
        "Tool result: {}",
        json!({"tool_use_id": r.tool_use_id, "content": r.content, "is_error": r.is_error})
    )
}

fn convert_assistant_message(msg: &AssistantMessage) -> Value {
    // Some compatible servers reject a null content alongside tool calls.
    let mut out = json!({
        "role": "assistant",
        "content": msg.text_content(),
    });

    let tool_calls: Vec<Value> = msg
        .tool_uses()
        .into_iter()
        .map(|tu| {
            json!({
                "id": tu.id,
                "type": "function",
                "function": {
                    "name": tu.name,
                    "arguments": tu.input.to_string(),
                }
            })
        })
        .collect();
    if !tool_calls.is_empty() {
        out["tool_calls"] = json!(tool_calls);
    }
    out
}

// --- Response parsing ---

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    id: String,
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: u32,
}

/// Parse a chat-completions response into an assistant turn.
pub fn parse_response(body: &str) -> Result<AssistantMessage, ProviderError> {
    let resp: ChatResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Decode(e.to_string()))?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Decode("response has no choices".into()))?;

    let mut content = Vec::new();
    let text = choice.message.content.unwrap_or_default();
    if !text.is_empty() {
        content.push(AssistantContent::Text { text });
    }
    for call in choice.message.tool_calls {
        content.push(AssistantContent::ToolUse(ToolUseBlock {
            id: ToolUseId::from_raw(call.id),
            name: call.function.name,
            input: parse_arguments(&call.function.arguments),
        }));
    }

    let usage = resp.usage.map(|u| {
        let cached = u
            .prompt_tokens_details
            .map_or(0, |d| d.cached_tokens)
            .min(u.prompt_tokens);
        TokenUsage {
            input_tokens: u.prompt_tokens - cached,
            output_tokens: u.completion_tokens,
            cache_read_tokens: cached,
            cache_creation_tokens: 0,
        }
    });

    let mut msg = AssistantMessage::new(content).with_usage(usage.unwrap_or_default());
    msg.stop_reason = choice.finish_reason.as_deref().and_then(StopReason::parse);
    Ok(msg)
}

/// Empty arguments mean no input; invalid JSON is kept verbatim.
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| json!({ "_raw": raw }))
}
