use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, ToolUseId};
use crate::tokens::TokenUsage;

/// Substituted when a backend returns an assistant turn with no content.
pub const NO_CONTENT_MESSAGE: &str = "(no content)";
/// Cancellation observed before or while the backend answered.
pub const INTERRUPT_MESSAGE: &str = "[Request interrupted by user]";
/// Cancellation observed while tools were being dispatched.
pub const INTERRUPT_MESSAGE_FOR_TOOL_USE: &str = "[Request interrupted by user for tool use]";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
    /// Interim tool output. Shown to the caller, never sent to a backend.
    Progress(ProgressMessage),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub id: MessageId,
    pub created_at: DateTime<Utc>,
    pub content: Vec<UserContent>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub id: MessageId,
    pub created_at: DateTime<Utc>,
    pub content: Vec<AssistantContent>,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressMessage {
    pub id: MessageId,
    pub created_at: DateTime<Utc>,
    pub tool_use_id: ToolUseId,
    pub content: String,
}

// --- Content types ---

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserContent {
    Text { text: String },
    Image { media_type: String, data: String },
    ToolResult(ToolResultBlock),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantContent {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    RedactedThinking {
        data: String,
    },
    ToolUse(ToolUseBlock),
}

/// A tool invocation requested by the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolUseBlock {
    pub id: ToolUseId,
    pub name: String,
    pub input: serde_json::Value,
}

/// The answer to one [`ToolUseBlock`], carried inside a user message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResultBlock {
    pub tool_use_id: ToolUseId,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

impl StopReason {
    /// Map a backend's stop/finish reason string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "end_turn" | "stop" => Some(Self::EndTurn),
            "tool_use" | "tool_calls" | "function_call" => Some(Self::ToolUse),
            "max_tokens" | "length" => Some(Self::MaxTokens),
            "stop_sequence" => Some(Self::StopSequence),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("expected an assistant message, got {0}")]
    NotAssistant(&'static str),
}

// --- Convenience constructors ---

impl ToolResultBlock {
    pub fn success(tool_use_id: ToolUseId, content: impl Into<String>) -> Self {
        Self {
            tool_use_id,
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(tool_use_id: ToolUseId, content: impl Into<String>) -> Self {
        Self {
            tool_use_id,
            content: content.into(),
            is_error: true,
        }
    }
}

impl UserMessage {
    pub fn new(content: Vec<UserContent>) -> Self {
        Self {
            id: MessageId::new(),
            created_at: Utc::now(),
            content,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(vec![UserContent::Text { text: text.into() }])
    }

    /// True when every block is a tool result (and there is at least one).
    pub fn is_tool_result_only(&self) -> bool {
        !self.content.is_empty()
            && self
                .content
                .iter()
                .all(|c| matches!(c, UserContent::ToolResult(_)))
    }

    pub fn tool_results(&self) -> impl Iterator<Item = &ToolResultBlock> {
        self.content.iter().filter_map(|c| match c {
            UserContent::ToolResult(r) => Some(r),
            _ => None,
        })
    }
}

impl AssistantMessage {
    pub fn new(content: Vec<AssistantContent>) -> Self {
        Self {
            id: MessageId::new(),
            created_at: Utc::now(),
            content,
            usage: TokenUsage::default(),
            duration_ms: 0,
            cost_usd: 0.0,
            stop_reason: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        let mut msg = Self::new(vec![AssistantContent::Text { text: text.into() }]);
        msg.stop_reason = Some(StopReason::EndTurn);
        msg
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    /// All tool_use blocks, in the order the model emitted them.
    pub fn tool_uses(&self) -> Vec<&ToolUseBlock> {
        self.content
            .iter()
            .filter_map(|c| match c {
                AssistantContent::ToolUse(tu) => Some(tu),
                _ => None,
            })
            .collect()
    }

    /// Plain text blocks joined with a single space.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn has_tool_uses(&self) -> bool {
        self.content
            .iter()
            .any(|c| matches!(c, AssistantContent::ToolUse(_)))
    }

    /// Replace empty content with the [`NO_CONTENT_MESSAGE`] placeholder.
    pub fn ensure_content(&mut self) {
        if self.content.is_empty() {
            self.content.push(AssistantContent::Text {
                text: NO_CONTENT_MESSAGE.to_string(),
            });
        }
    }
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Message::User(UserMessage::text(text))
    }

    pub fn tool_results(results: Vec<ToolResultBlock>) -> Self {
        Message::User(UserMessage::new(
            results.into_iter().map(UserContent::ToolResult).collect(),
        ))
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Message::Assistant(AssistantMessage::text(text))
    }

    /// An assistant message produced locally rather than by a backend.
    pub fn synthetic_assistant(text: impl Into<String>) -> Self {
        Message::Assistant(AssistantMessage::text(text))
    }

    pub fn progress(tool_use_id: ToolUseId, content: impl Into<String>) -> Self {
        Message::Progress(ProgressMessage {
            id: MessageId::new(),
            created_at: Utc::now(),
            tool_use_id,
            content: content.into(),
        })
    }

    pub fn id(&self) -> &MessageId {
        match self {
            Message::User(m) => &m.id,
            Message::Assistant(m) => &m.id,
            Message::Progress(m) => &m.id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::User(_) => "user",
            Message::Assistant(_) => "assistant",
            Message::Progress(_) => "progress",
        }
    }

    pub fn as_assistant(&self) -> Result<&AssistantMessage, MessageError> {
        match self {
            Message::Assistant(m) => Ok(m),
            other => Err(MessageError::NotAssistant(other.kind())),
        }
    }

    pub fn tool_use_requests(&self) -> Result<Vec<&ToolUseBlock>, MessageError> {
        self.as_assistant().map(AssistantMessage::tool_uses)
    }

    pub fn assistant_text_content(&self) -> Result<String, MessageError> {
        self.as_assistant().map(AssistantMessage::text_content)
    }
}

/// Prepare history for a backend call.
///
/// Progress messages are dropped. Consecutive user messages made only of
/// tool results are folded into one user message, blocks kept in encounter
/// order. Anything else passes through untouched.
pub fn normalize_messages_for_api(messages: &[Message]) -> Vec<Message> {
    let mut out: Vec<Message> = Vec::with_capacity(messages.len());
    for msg in messages {
        match msg {
            Message::Progress(_) => {}
            Message::User(user) if user.is_tool_result_only() => {
                let merge = matches!(
                    out.last(),
                    Some(Message::User(prev)) if prev.is_tool_result_only()
                );
                if !merge {
                    out.push(msg.clone());
                } else if let Some(Message::User(prev)) = out.last_mut() {
                    let mut content = std::mem::take(&mut prev.content);
                    content.extend(user.content.iter().cloned());
                    *prev = UserMessage {
                        id: MessageId::new(),
                        created_at: prev.created_at,
                        content,
                    };
                }
            }
            _ => out.push(msg.clone()),
        }
    }
    out
}
