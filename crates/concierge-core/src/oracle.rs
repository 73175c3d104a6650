use async_trait::async_trait;

use crate::capability::CapabilityDefinition;
use crate::errors::OracleError;
use crate::messages::{AssistantMessage, Message};

/// Everything the oracle sees for one reasoning step.
#[derive(Clone, Debug)]
pub struct OracleRequest {
    /// Rendered with the wall-clock time of this invocation.
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub capabilities: Vec<CapabilityDefinition>,
}

/// The reasoning component that proposes either a final answer or capability calls.
#[async_trait]
pub trait Oracle: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(&self, request: &OracleRequest) -> Result<AssistantMessage, OracleError>;
}
