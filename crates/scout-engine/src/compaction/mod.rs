//! Token-pressure driven history compaction.
//!
//! When the most recent turn reports a context size over
//! `floor(context_length * ratio)`, everything but the last `keep_recent`
//! messages is replaced by a model-written summary.

pub mod stats;
pub mod tokens;

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use scout_core::messages::{Message, NO_CONTENT_MESSAGE};
use scout_core::provider::{CompletionRequest, LlmProvider};
use scout_core::tokens::TokenUsage;
use scout_settings::CompactionSettings;
use scout_store::CompactionStats;

use crate::error::EngineError;

pub use stats::{CompactionStatsLog, InMemoryStatsSink, StatsSink};
pub use tokens::{estimate_message_tokens, estimate_messages_tokens};

pub const COMPACTION_PROMPT: &str = "\
Your task is to create a detailed summary of the conversation so far. It will replace \
the earlier messages, so include everything needed to continue the work without them.

Structure the summary with exactly these sections:

1. Technical Context: languages, frameworks, tools and environment details in use.
2. Project Overview: what the project is and what the user is trying to achieve.
3. Code Changes: files created or modified, with the essential details of each change.
4. Debugging & Issues: errors encountered, their causes and how they were resolved.
5. Current Status: what was being worked on immediately before this summary.
6. Pending Tasks: work that was requested but is not finished yet.
7. User Preferences: instructions and preferences the user has expressed.
8. Key Decisions: important choices made and the reasons given for them.

Be specific. Prefer file paths, names and exact values over general descriptions.";

pub const COMPACTION_MARKER: &str =
    "[Earlier conversation was compacted. The summary below replaces it.]";

/// `floor(context_length * ratio)`.
pub fn threshold(context_length: usize, ratio: f64) -> u64 {
    (context_length as f64 * ratio).floor() as u64
}

/// Context size reported by the most recent assistant turn, 0 if none.
pub fn count_tokens(messages: &[Message]) -> u64 {
    messages
        .iter()
        .rev()
        .find_map(|m| match m {
            Message::Assistant(a) => Some(a.usage.total()),
            _ => None,
        })
        .unwrap_or(0)
}

/// Request asking the model to summarize `messages`. No tools are offered.
pub fn summary_request(messages: &[Message], system_prompt: Vec<String>) -> CompletionRequest {
    let mut history = messages.to_vec();
    history.push(Message::user_text(COMPACTION_PROMPT));
    CompletionRequest::new(history, system_prompt)
}

/// A replaced history and the record describing the replacement.
#[derive(Clone, Debug)]
pub struct Compacted {
    pub messages: Vec<Message>,
    pub stats: CompactionStats,
}

pub struct CompactionEngine {
    provider: Arc<dyn LlmProvider>,
    settings: CompactionSettings,
    stats: Option<Arc<CompactionStatsLog>>,
}

impl CompactionEngine {
    pub fn new(provider: Arc<dyn LlmProvider>, settings: CompactionSettings) -> Self {
        Self {
            provider,
            settings,
            stats: None,
        }
    }

    pub fn with_stats(mut self, stats: Arc<CompactionStatsLog>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn settings(&self) -> &CompactionSettings {
        &self.settings
    }

    pub fn threshold(&self) -> u64 {
        threshold(self.settings.context_length, self.settings.ratio)
    }

    pub fn should_compact(&self, messages: &[Message]) -> bool {
        messages.len() >= self.settings.min_messages && count_tokens(messages) >= self.threshold()
    }

    /// Summarize everything before the kept suffix. `None` when there is
    /// nothing older than the suffix.
    #[instrument(skip_all, fields(messages = messages.len()))]
    pub async fn compact(&self, messages: &[Message]) -> Result<Option<Compacted>, EngineError> {
        let split = split_point(messages, self.settings.keep_recent);
        if split == 0 {
            return Ok(None);
        }
        let (older, recent) = messages.split_at(split);

        let mut summary = self
            .provider
            .complete(&summary_request(older, Vec::new()))
            .await?;
        let text = summary.text_content();
        if text.trim().is_empty() || text == NO_CONTENT_MESSAGE {
            return Err(EngineError::Compaction("model returned an empty summary".into()));
        }
        // The summary's own usage would otherwise count as current pressure.
        summary.usage = TokenUsage::default();

        let summary = Message::Assistant(summary);
        let stats = CompactionStats {
            timestamp: Utc::now(),
            message_count: messages.len(),
            token_count: count_tokens(messages),
            tokens_removed: estimate_messages_tokens(older)
                .saturating_sub(estimate_message_tokens(&summary)),
        };

        let mut compacted = Vec::with_capacity(recent.len() + 2);
        compacted.push(Message::user_text(COMPACTION_MARKER));
        compacted.push(summary);
        compacted.extend_from_slice(recent);

        info!(
            before = messages.len(),
            after = compacted.len(),
            token_count = stats.token_count,
            tokens_removed = stats.tokens_removed,
            "history compacted"
        );

        if let Some(log) = &self.stats {
            if let Err(e) = log.record(stats.clone()) {
                warn!(error = %e, "failed to record compaction stats");
            }
        }

        Ok(Some(Compacted {
            messages: compacted,
            stats,
        }))
    }

    /// Compact when over budget. Failures are logged and leave the history
    /// as it was.
    pub async fn auto_compact(&self, messages: &[Message]) -> Option<Compacted> {
        if !self.settings.enabled || !self.should_compact(messages) {
            return None;
        }
        match self.compact(messages).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "compaction failed, keeping full history");
                None
            }
        }
    }
}

/// Index where the kept suffix starts. The suffix never opens with tool
/// results, whose requests would otherwise be summarized away.
fn split_point(messages: &[Message], keep_recent: usize) -> usize {
    let mut split = messages.len().saturating_sub(keep_recent);
    while split > 0 && split < messages.len() {
        match &messages[split] {
            Message::Progress(_) => split -= 1,
            Message::User(u) if u.is_tool_result_only() => split -= 1,
            _ => break,
        }
    }
    split
}
