//! Builds runtime components from loaded settings.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::Level;

use concierge_core::events::RunEvent;
use concierge_core::oracle::Oracle;

use concierge_engine::registry::{CapabilityTimeouts, RetryPolicies, RetryPolicy};
use concierge_engine::{
    CapabilityRegistry, DelegationClient, HttpDelegationClient, IntentAnalyzer,
    KeywordIntentAnalyzer, Orchestrator, PeerDirectory, PeerEndpoint, RunnerConfig,
};
use concierge_settings::ConciergeSettings;
use concierge_telemetry::{parse_level, LogFormat, TelemetryConfig};

pub fn telemetry_config(settings: &ConciergeSettings) -> TelemetryConfig {
    let logging = &settings.logging;
    TelemetryConfig {
        log_level: parse_level(&logging.level).unwrap_or(Level::INFO),
        module_levels: logging
            .modules
            .iter()
            .filter_map(|(module, level)| Some((module.clone(), parse_level(level)?)))
            .collect(),
        format: match logging.format.as_str() {
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json,
        },
    }
}

pub fn peer_directory(settings: &ConciergeSettings) -> PeerDirectory {
    let peers = &settings.peers;
    peers
        .endpoints
        .iter()
        .fold(PeerDirectory::new(&peers.default_base_url), |dir, (name, ep)| {
            dir.with_peer(
                name.clone(),
                PeerEndpoint {
                    base_url: ep.base_url.clone(),
                    assistant_id: ep.assistant_id.clone().unwrap_or_else(|| name.clone()),
                },
            )
        })
}

pub fn delegation_client(settings: &ConciergeSettings) -> Arc<dyn DelegationClient> {
    Arc::new(
        HttpDelegationClient::new(peer_directory(settings))
            .with_timeout(Duration::from_secs(settings.peers.request_timeout_secs)),
    )
}

pub fn analyzer() -> Arc<dyn IntentAnalyzer> {
    Arc::new(KeywordIntentAnalyzer::travel())
}

pub fn registry(settings: &ConciergeSettings) -> CapabilityRegistry {
    let o = &settings.orchestrator;
    let policy = |max_attempts| RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(o.retry_base_delay_ms),
        max_delay: Duration::from_millis(o.retry_max_delay_ms),
    };
    concierge_engine::capabilities::travel_registry(delegation_client(settings), analyzer())
        .with_timeouts(CapabilityTimeouts {
            local: Duration::from_secs(o.local_timeout_secs),
            delegation: Duration::from_secs(o.delegation_timeout_secs),
            overrides: o
                .timeout_overrides
                .iter()
                .map(|(name, secs)| (name.clone(), Duration::from_secs(*secs)))
                .collect(),
        })
        .with_retries(RetryPolicies {
            local: policy(o.local_max_attempts),
            delegation: policy(o.delegation_max_attempts),
        })
}

pub fn runner_config(settings: &ConciergeSettings) -> RunnerConfig {
    RunnerConfig {
        step_budget: settings.orchestrator.step_budget,
        preflight_intent: settings.orchestrator.preflight_intent,
        ..RunnerConfig::default()
    }
}

/// An orchestrator over the travel registry, configured from settings.
pub fn orchestrator(
    settings: &ConciergeSettings,
    oracle: Arc<dyn Oracle>,
    event_tx: broadcast::Sender<RunEvent>,
) -> Orchestrator {
    Orchestrator::new(oracle, Arc::new(registry(settings)), event_tx)
        .with_analyzer(analyzer())
        .with_config(runner_config(settings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_core::conversation::{Conversation, TerminationReason};
    use concierge_engine::registry::CapabilityKind;
    use concierge_oracle::{ScriptedOracle, ScriptedResponse};
    use concierge_settings::PeerEndpointSettings;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn telemetry_from_settings() {
        let mut settings = ConciergeSettings::default();
        settings.logging.level = "debug".into();
        settings.logging.format = "compact".into();
        let _ = settings
            .logging
            .modules
            .insert("concierge_engine".into(), "trace".into());
        let _ = settings.logging.modules.insert("noisy".into(), "loud".into());

        let config = telemetry_config(&settings);
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.format, LogFormat::Compact);
        assert_eq!(
            config.module_levels,
            vec![("concierge_engine".to_string(), Level::TRACE)]
        );
    }

    #[test]
    fn endpoint_overrides_and_fallback() {
        let mut settings = ConciergeSettings::default();
        let _ = settings.peers.endpoints.insert(
            "hotel_agent".into(),
            PeerEndpointSettings {
                base_url: "http://hotels:9000".into(),
                assistant_id: None,
            },
        );
        let dir = peer_directory(&settings);

        let hotel = dir.resolve("hotel_agent");
        assert_eq!(hotel.base_url, "http://hotels:9000");
        assert_eq!(hotel.assistant_id, "hotel_agent");

        let flight = dir.resolve("flight_agent");
        assert_eq!(flight.base_url, "http://localhost:8000");
    }

    #[test]
    fn registry_has_travel_capabilities() {
        let registry = registry(&ConciergeSettings::default());
        assert_eq!(registry.count(), 5);
        assert_eq!(
            registry.kind("delegate_to_hotel_agent"),
            Some(CapabilityKind::Delegation)
        );
    }

    #[test]
    fn runner_config_from_settings() {
        let mut settings = ConciergeSettings::default();
        settings.orchestrator.step_budget = 3;
        settings.orchestrator.preflight_intent = false;

        let config = runner_config(&settings);
        assert_eq!(config.step_budget, 3);
        assert!(!config.preflight_intent);
        assert_eq!(
            config.budget_exhausted_message,
            RunnerConfig::default().budget_exhausted_message
        );
    }

    #[tokio::test]
    async fn step_budget_setting_bounds_the_run() {
        let mut settings = ConciergeSettings::default();
        settings.orchestrator.step_budget = 2;
        let analyze = || {
            ScriptedResponse::calls(vec![(
                "analyze_travel_request",
                json!({"user_message": "a flight to Lisbon"}),
            )])
        };
        let oracle = Arc::new(ScriptedOracle::new(vec![analyze(), analyze(), analyze()]));
        let (tx, _rx) = broadcast::channel(64);

        let outcome = orchestrator(&settings, oracle.clone(), tx)
            .run(
                Conversation::from_user_text("a flight to Lisbon"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.reason, TerminationReason::BudgetExhausted);
        assert_eq!(outcome.steps, 2);
        assert_eq!(oracle.call_count(), 2);
        assert!(outcome.intent.is_some());
    }
}
