//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{ProviderKind, ScoutSettings};

/// `~/.scout`, falling back to `/tmp/.scout` without a home directory.
pub fn scout_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".scout")
}

pub fn settings_path() -> PathBuf {
    scout_dir().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ScoutSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or out-of-range values are errors.
pub fn load_settings_from_path(path: &Path) -> Result<ScoutSettings> {
    let mut settings = read_merged(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

fn read_merged(path: &Path) -> Result<ScoutSettings> {
    let defaults = serde_json::to_value(ScoutSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut ScoutSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable lookup.
///
/// Invalid values are logged and ignored (file/default value wins).
pub fn apply_overrides_from<F>(settings: &mut ScoutSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    // ── Provider ────────────────────────────────────────────────────
    if let Some(v) = read("SCOUT_PROVIDER") {
        match ProviderKind::parse(&v) {
            Some(kind) => settings.provider.kind = kind,
            None => warn!(key = "SCOUT_PROVIDER", value = %v, "unknown provider, ignoring"),
        }
    }
    if let Some(v) = read("SCOUT_MODEL") {
        settings.provider.model = Some(v);
    }
    if let Some(v) = read("SCOUT_BASE_URL") {
        settings.provider.base_url = Some(v);
    }
    if let Some(v) = read("SCOUT_API_KEY") {
        settings.provider.api_key = Some(v);
    }
    if settings.provider.api_key.is_none() {
        settings.provider.api_key = read(settings.provider.kind.api_key_env());
    }
    if let Some(v) = parsed(&read, "SCOUT_MAX_RETRIES", |s| parse_u64_range(s, 0, 10)) {
        settings.provider.max_retries = v as u32;
    }

    // ── Query ───────────────────────────────────────────────────────
    if let Some(v) = parsed(&read, "SCOUT_MAX_THINKING_TOKENS", |s| {
        parse_u64_range(s, 0, 128_000)
    }) {
        settings.query.max_thinking_tokens = v as u32;
    }
    if let Some(v) = parsed(&read, "SCOUT_SKIP_PERMISSIONS", parse_bool) {
        settings.query.skip_permissions = v;
    }

    // ── Compaction ──────────────────────────────────────────────────
    if let Some(v) = parsed(&read, "SCOUT_AUTO_COMPACT", parse_bool) {
        settings.compaction.enabled = v;
    }
    if let Some(v) = parsed(&read, "SCOUT_COMPACT_RATIO", parse_ratio) {
        settings.compaction.ratio = v;
    }
    if let Some(v) = parsed(&read, "SCOUT_CONTEXT_LENGTH", |s| {
        parse_u64_range(s, 1_000, 10_000_000)
    }) {
        settings.compaction.context_length = v as usize;
    }
    if let Some(v) = parsed(&read, "SCOUT_KEEP_RECENT", |s| parse_u64_range(s, 0, 1_000)) {
        settings.compaction.keep_recent = v as usize;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read("SCOUT_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("SCOUT_DB_PATH") {
        settings.store.database_path = Some(v);
    }
}

/// Reject values that parse but make no sense.
pub fn validate(settings: &ScoutSettings) -> Result<()> {
    let c = &settings.compaction;
    if !(c.ratio > 0.0 && c.ratio <= 1.0) {
        return Err(SettingsError::InvalidValue(format!(
            "compaction.ratio must be in (0, 1], got {}",
            c.ratio
        )));
    }
    if c.context_length == 0 {
        return Err(SettingsError::InvalidValue(
            "compaction.contextLength must be positive".into(),
        ));
    }
    if c.flush_every == 0 {
        return Err(SettingsError::InvalidValue(
            "compaction.flushEvery must be positive".into(),
        ));
    }
    if settings.query.max_turns == 0 {
        return Err(SettingsError::InvalidValue(
            "query.maxTurns must be positive".into(),
        ));
    }
    Ok(())
}

fn parsed<T, R, P>(read: &R, name: &str, parse: P) -> Option<T>
where
    R: Fn(&str) -> Option<String>,
    P: Fn(&str) -> Option<T>,
{
    let val = read(name)?;
    let result = parse(&val);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid env var, ignoring");
    }
    result
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// A fraction in `(0, 1]`.
pub fn parse_ratio(val: &str) -> Option<f64> {
    let n: f64 = val.trim().parse().ok()?;
    (n > 0.0 && n <= 1.0).then_some(n)
}
