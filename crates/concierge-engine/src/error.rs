use concierge_core::conversation::MissingUserMessage;
use concierge_core::errors::OracleError;

use crate::routing::RoutingError;

/// Run-level failures. Capability failures never surface here.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("invalid conversation: {0}")]
    InvalidConversation(#[from] MissingUserMessage),

    #[error("step budget must be greater than zero")]
    InvalidStepBudget,

    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),
}
