//! Settings types. Every struct deserializes with camelCase keys and
//! falls back to its `Default` for any missing field.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConciergeSettings {
    pub orchestrator: OrchestratorSettings,
    pub peers: PeerSettings,
    pub server: ServerSettings,
    pub logging: LoggingSettings,
}

/// Think-act loop and capability execution limits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorSettings {
    /// Maximum number of capability-execution steps per run.
    pub step_budget: u32,
    /// Run the keyword intent analyzer on the user's message before the first step.
    pub preflight_intent: bool,
    pub local_timeout_secs: u64,
    pub delegation_timeout_secs: u64,
    /// Per-capability timeout in seconds, keyed by capability name.
    pub timeout_overrides: BTreeMap<String, u64>,
    /// Attempts per local invocation. `1` disables retries.
    pub local_max_attempts: u32,
    pub delegation_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            step_budget: 25,
            preflight_intent: true,
            local_timeout_secs: 120,
            delegation_timeout_secs: 600,
            timeout_overrides: BTreeMap::new(),
            local_max_attempts: 1,
            delegation_max_attempts: 1,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 10_000,
        }
    }
}

/// Where delegation requests are sent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PeerSettings {
    /// Base URL for any peer without its own endpoint entry.
    pub default_base_url: String,
    /// HTTP-level timeout for a single delegation round trip.
    pub request_timeout_secs: u64,
    pub endpoints: BTreeMap<String, PeerEndpointSettings>,
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            default_base_url: "http://localhost:8000".to_string(),
            request_timeout_secs: 600,
            endpoints: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PeerEndpointSettings {
    pub base_url: String,
    /// Assistant id sent to the peer. Defaults to the peer name.
    pub assistant_id: Option<String>,
}

/// Peer agent server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub port: u16,
    pub request_timeout_secs: u64,
    /// Threads nobody deleted are dropped this long after their last run.
    pub thread_ttl_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 8000,
            request_timeout_secs: 60,
            thread_ttl_secs: 3600,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    /// `json` or `compact`.
    pub format: String,
    /// Per-module level overrides, e.g. `{"concierge_engine": "debug"}`.
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
            modules: BTreeMap::new(),
        }
    }
}
