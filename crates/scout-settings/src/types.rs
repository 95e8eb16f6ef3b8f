//! Settings type definitions.
//!
//! Field names are camelCase on the wire; hook sections keep their event
//! names (`PreToolUse`, `PostToolUse`). Every struct is `#[serde(default)]`
//! so partial JSON fills in from [`Default`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Root settings type.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoutSettings {
    pub provider: ProviderSettings,
    pub query: QuerySettings,
    pub compaction: CompactionSettings,
    pub hooks: HooksSettings,
    pub logging: LoggingSettings,
    pub store: StoreSettings,
}

/// Which backend family to talk to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Anthropic,
    #[serde(alias = "openai-compatible")]
    OpenAi,
}

impl ProviderKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "anthropic" | "claude" => Some(Self::Anthropic),
            "openai" | "openai-compatible" => Some(Self::OpenAi),
            _ => None,
        }
    }

    /// Env var consulted when no key is configured.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anthropic => f.write_str("anthropic"),
            Self::OpenAi => f.write_str("openai"),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderSettings {
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    /// Model id. `None` picks the backend's default model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Never written back out.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub max_retries: u32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Anthropic,
            model: None,
            api_key: None,
            base_url: None,
            max_retries: 3,
            max_tokens: 8192,
            request_timeout_secs: 600,
        }
    }
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("kind", &self.kind)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("max_retries", &self.max_retries)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuerySettings {
    /// Extended-thinking budget. Zero disables thinking.
    pub max_thinking_tokens: u32,
    /// Hard stop on model round-trips within one query.
    pub max_turns: u32,
    pub skip_permissions: bool,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            max_thinking_tokens: 0,
            max_turns: 100,
            skip_permissions: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompactionSettings {
    pub enabled: bool,
    /// Context window the threshold is computed against.
    pub context_length: usize,
    /// Fraction of `context_length` that triggers compaction.
    pub ratio: f64,
    /// Messages kept verbatim after the summary.
    pub keep_recent: usize,
    /// Histories shorter than this are never compacted.
    pub min_messages: usize,
    /// Stats records buffered before a flush to the store.
    pub flush_every: usize,
}

impl Default for CompactionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            context_length: 200_000,
            ratio: 0.85,
            keep_recent: 10,
            min_messages: 3,
            flush_every: 10,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksSettings {
    #[serde(rename = "PreToolUse")]
    pub pre_tool_use: Vec<HookMatcherSettings>,
    #[serde(rename = "PostToolUse")]
    pub post_tool_use: Vec<HookMatcherSettings>,
}

impl HooksSettings {
    pub fn is_empty(&self) -> bool {
        self.pre_tool_use.is_empty() && self.post_tool_use.is_empty()
    }
}

/// One matcher and the commands it triggers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookMatcherSettings {
    #[serde(default = "default_matcher")]
    pub matcher: String,
    #[serde(default)]
    pub hooks: Vec<HookCommandSettings>,
}

fn default_matcher() -> String {
    "*".to_string()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HookCommandSettings {
    Command {
        command: String,
        /// Seconds. Falls back to the engine default when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    /// `json` or `pretty`.
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: "json".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// SQLite file for compaction stats. Defaults under `~/.scout/`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = ScoutSettings::default();
        assert_eq!(s.provider.kind, ProviderKind::Anthropic);
        assert!(s.provider.model.is_none());
        assert_eq!(s.provider.max_retries, 3);
        assert!((s.compaction.ratio - 0.85).abs() < f64::EPSILON);
        assert_eq!(s.compaction.keep_recent, 10);
        assert_eq!(s.compaction.min_messages, 3);
        assert_eq!(s.compaction.flush_every, 10);
        assert!(s.hooks.is_empty());
    }

    #[test]
    fn provider_type_discriminator() {
        let p: ProviderSettings =
            serde_json::from_str(r#"{"type": "openai", "model": "gpt-4o"}"#).unwrap();
        assert_eq!(p.kind, ProviderKind::OpenAi);
        assert_eq!(p.model.as_deref(), Some("gpt-4o"));
        assert_eq!(p.max_tokens, 8192);
    }

    #[test]
    fn api_key_never_serialized_or_debugged() {
        let p = ProviderSettings {
            api_key: Some("sk-secret".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&p).unwrap();
        assert!(!json.contains("sk-secret"));
        assert!(!format!("{p:?}").contains("sk-secret"));
    }

    #[test]
    fn hooks_parse_event_keys() {
        let hooks: HooksSettings = serde_json::from_value(serde_json::json!({
            "PreToolUse": [{
                "matcher": "Edit|Write",
                "hooks": [{"type": "command", "command": "./check.sh", "timeout": 5}]
            }],
            "PostToolUse": [{
                "hooks": [{"type": "command", "command": "logger done"}]
            }]
        }))
        .unwrap();
        assert_eq!(hooks.pre_tool_use[0].matcher, "Edit|Write");
        assert_eq!(
            hooks.pre_tool_use[0].hooks[0],
            HookCommandSettings::Command {
                command: "./check.sh".into(),
                timeout: Some(5)
            }
        );
        assert_eq!(hooks.post_tool_use[0].matcher, "*");
    }

    #[test]
    fn provider_kind_parse() {
        assert_eq!(ProviderKind::parse("OpenAI"), Some(ProviderKind::OpenAi));
        assert_eq!(ProviderKind::parse("claude"), Some(ProviderKind::Anthropic));
        assert_eq!(ProviderKind::parse("gemini"), None);
        assert_eq!(ProviderKind::OpenAi.api_key_env(), "OPENAI_API_KEY");
    }
}
