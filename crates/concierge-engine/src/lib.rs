pub mod capabilities;
pub mod delegation;
pub mod error;
pub mod intent;
pub mod prompt;
pub mod registry;
pub mod routing;
pub mod runner;

#[cfg(test)]
pub(crate) mod test_support;

pub use delegation::{DelegationClient, HttpDelegationClient, PeerDirectory, PeerEndpoint};
pub use error::EngineError;
pub use intent::{IntentAnalysis, IntentAnalyzer, KeywordIntentAnalyzer};
pub use registry::CapabilityRegistry;
pub use runner::{Orchestrator, RunOutcome, RunnerConfig};
