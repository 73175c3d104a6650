use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use concierge_core::capability::{Capability, CapabilityContext, CapabilityError, Signature};
use concierge_core::ids::{RunId, SessionId};
use concierge_core::messages::CapabilityCall;

use crate::delegation::{DelegationClient, DelegationError, DelegationReply, DelegationSession};
use crate::prompt::Clock;

pub(crate) fn ctx(call: &CapabilityCall) -> CapabilityContext {
    CapabilityContext {
        run_id: RunId::new(),
        call_id: call.id.clone(),
        cancel: CancellationToken::new(),
    }
}

pub(crate) enum Behavior {
    /// Return the bound arguments.
    Echo,
    Sleep(Duration, Value),
    Fail(String),
    Panic,
    Count(Arc<AtomicUsize>),
}

pub(crate) struct TestCapability {
    name: String,
    signature: Signature,
    behavior: Behavior,
}

impl TestCapability {
    pub(crate) fn arc(name: &str, behavior: Behavior) -> Arc<dyn Capability> {
        Arc::new(Self {
            name: name.to_string(),
            signature: Signature::default(),
            behavior,
        })
    }
}

#[async_trait]
impl Capability for TestCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "test capability"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    async fn call(
        &self,
        args: Map<String, Value>,
        _ctx: &CapabilityContext,
    ) -> Result<Value, CapabilityError> {
        match &self.behavior {
            Behavior::Echo => Ok(Value::Object(args)),
            Behavior::Sleep(delay, value) => {
                tokio::time::sleep(*delay).await;
                Ok(value.clone())
            }
            Behavior::Fail(reason) => Err(CapabilityError::failed(reason.clone())),
            Behavior::Panic => panic!("kaboom"),
            Behavior::Count(counter) => {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(json!({"count": n}))
            }
        }
    }
}

/// Delegation client with queued outcomes; records every `(peer, payload)`.
pub(crate) struct ScriptedDelegation {
    outcomes: Mutex<VecDeque<Result<Value, DelegationError>>>,
    calls: Mutex<Vec<(String, Map<String, Value>)>>,
}

impl ScriptedDelegation {
    pub(crate) fn arc(outcomes: Vec<Result<Value, DelegationError>>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn calls(&self) -> Vec<(String, Map<String, Value>)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl DelegationClient for ScriptedDelegation {
    async fn delegate(
        &self,
        peer: &str,
        payload: &Map<String, Value>,
    ) -> Result<DelegationReply, DelegationError> {
        self.calls.lock().push((peer.to_string(), payload.clone()));
        let outcome = self
            .outcomes
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(json!({"status": "success"})));
        outcome.map(|payload| DelegationReply {
            session: DelegationSession {
                peer: peer.to_string(),
                session_id: SessionId::new(),
                created_at: Utc::now(),
            },
            payload,
        })
    }
}

pub(crate) struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    pub(crate) fn new() -> Self {
        Self(Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).single().unwrap_or_default())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
