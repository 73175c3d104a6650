use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use concierge_core::errors::OracleError;
use concierge_core::messages::{AssistantMessage, CapabilityCall};
use concierge_core::oracle::{Oracle, OracleRequest};

/// Pre-programmed replies for deterministic testing without a live model.
#[derive(Clone, Debug)]
pub enum ScriptedResponse {
    Reply(AssistantMessage),
    Error(OracleError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<ScriptedResponse>),
}

impl ScriptedResponse {
    /// A final answer with no capability calls.
    pub fn answer(text: &str) -> Self {
        Self::Reply(AssistantMessage::text(text))
    }

    /// A reply requesting the given `(capability, arguments)` calls, in order.
    pub fn calls(calls: Vec<(&str, Value)>) -> Self {
        let calls = calls
            .into_iter()
            .map(|(name, args)| CapabilityCall::new(name, args))
            .collect();
        Self::Reply(AssistantMessage::with_calls("", calls))
    }

    pub fn delayed(delay: Duration, inner: ScriptedResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Oracle that returns pre-programmed responses in sequence and records every request.
pub struct ScriptedOracle {
    responses: Vec<ScriptedResponse>,
    call_count: AtomicUsize,
    requests: Mutex<Vec<OracleRequest>>,
}

impl ScriptedOracle {
    pub fn new(responses: Vec<ScriptedResponse>) -> Self {
        Self {
            responses,
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Snapshot of every request received so far.
    pub fn requests(&self) -> Vec<OracleRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, request: &OracleRequest) -> Result<AssistantMessage, OracleError> {
        self.requests.lock().push(request.clone());
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);

        let Some(response) = self.responses.get(idx) else {
            return Err(OracleError::Rejected(format!(
                "no scripted response for call {idx}"
            )));
        };

        // Nested delays are unrolled iteratively to avoid recursive async.
        let mut current = response;
        loop {
            match current {
                ScriptedResponse::Reply(message) => return Ok(message.clone()),
                ScriptedResponse::Error(e) => return Err(e.clone()),
                ScriptedResponse::Delay(duration, inner) => {
                    tokio::time::sleep(*duration).await;
                    current = inner;
                }
            }
        }
    }
}
