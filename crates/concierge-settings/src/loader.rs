//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ConciergeSettings::default()`]
//! 2. If `~/.concierge/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `CONCIERGE_*` environment overrides
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::ConciergeSettings;

/// Resolve the path to the settings file (`~/.concierge/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".concierge").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ConciergeSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or an out-of-range value is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ConciergeSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<ConciergeSettings> {
    let defaults = serde_json::to_value(ConciergeSettings::default())?;

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
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `CONCIERGE_*` environment variables to loaded settings.
///
/// Invalid values are logged and ignored (the file/default value stays).
pub fn apply_env_overrides(settings: &mut ConciergeSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable lookup.
pub fn apply_overrides_from<F>(settings: &mut ConciergeSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Orchestrator ────────────────────────────────────────────────
    if let Some(v) = env.u32("CONCIERGE_STEP_BUDGET", 1, 10_000) {
        settings.orchestrator.step_budget = v;
    }
    if let Some(v) = env.bool("CONCIERGE_PREFLIGHT_INTENT") {
        settings.orchestrator.preflight_intent = v;
    }
    if let Some(v) = env.u64("CONCIERGE_LOCAL_TIMEOUT_SECS", 1, 86_400) {
        settings.orchestrator.local_timeout_secs = v;
    }
    if let Some(v) = env.u64("CONCIERGE_DELEGATION_TIMEOUT_SECS", 1, 86_400) {
        settings.orchestrator.delegation_timeout_secs = v;
    }
    if let Some(v) = env.u32("CONCIERGE_DELEGATION_MAX_ATTEMPTS", 1, 10) {
        settings.orchestrator.delegation_max_attempts = v;
    }

    // ── Peers ───────────────────────────────────────────────────────
    if let Some(v) = env.string("CONCIERGE_PEER_URL") {
        settings.peers.default_base_url = v;
    }

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.u16("CONCIERGE_PORT", 1, 65535) {
        settings.server.port = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("CONCIERGE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.string("CONCIERGE_LOG_FORMAT") {
        settings.logging.format = v;
    }
}

/// Reject settings the orchestrator cannot run with.
pub fn validate(settings: &ConciergeSettings) -> Result<()> {
    let orchestrator = &settings.orchestrator;
    if orchestrator.step_budget == 0 {
        return Err(SettingsError::InvalidValue(
            "orchestrator.stepBudget must be at least 1".to_string(),
        ));
    }
    if orchestrator.local_max_attempts == 0 || orchestrator.delegation_max_attempts == 0 {
        return Err(SettingsError::InvalidValue(
            "orchestrator max attempts must be at least 1".to_string(),
        ));
    }
    if orchestrator.retry_base_delay_ms > orchestrator.retry_max_delay_ms {
        return Err(SettingsError::InvalidValue(format!(
            "orchestrator.retryBaseDelayMs ({}) exceeds retryMaxDelayMs ({})",
            orchestrator.retry_base_delay_ms, orchestrator.retry_max_delay_ms
        )));
    }
    if !matches!(settings.logging.format.as_str(), "json" | "compact") {
        return Err(SettingsError::InvalidValue(format!(
            "logging.format must be \"json\" or \"compact\", got {:?}",
            settings.logging.format
        )));
    }
    Ok(())
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers ─────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "bool", parse_bool)
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn u32(&self, name: &str, min: u32, max: u32) -> Option<u32> {
        self.parsed(name, "u32", |v| parse_u32_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }
}
