use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use concierge_core::capability::{
    Capability, CapabilityContext, CapabilityDefinition, CapabilityError, Signature,
};
use concierge_core::messages::{CapabilityCall, CapabilityResult};

use crate::delegation::DelegationClient;

pub const DEFAULT_LOCAL_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_DELEGATION_TIMEOUT: Duration = Duration::from_secs(600);

/// Forwards bound arguments to a peer agent through the registry's delegation client.
#[derive(Clone, Debug)]
pub struct DelegationProxy {
    pub name: String,
    pub description: String,
    pub peer: String,
    pub signature: Signature,
}

impl DelegationProxy {
    pub fn new(name: &str, description: &str, peer: &str, signature: Signature) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            peer: peer.to_string(),
            signature,
        }
    }

    pub fn to_definition(&self) -> CapabilityDefinition {
        CapabilityDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters_schema: self.signature.json_schema(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapabilityKind {
    Local,
    Delegation,
}

enum CapabilityEntry {
    Local(Arc<dyn Capability>),
    Delegation(DelegationProxy),
}

impl CapabilityEntry {
    fn kind(&self) -> CapabilityKind {
        match self {
            Self::Local(_) => CapabilityKind::Local,
            Self::Delegation(_) => CapabilityKind::Delegation,
        }
    }

    fn signature(&self) -> &Signature {
        match self {
            Self::Local(capability) => capability.signature(),
            Self::Delegation(proxy) => &proxy.signature,
        }
    }

    fn to_definition(&self) -> CapabilityDefinition {
        match self {
            Self::Local(capability) => capability.to_definition(),
            Self::Delegation(proxy) => proxy.to_definition(),
        }
    }
}

/// Per-capability deadlines. Name overrides win over the per-kind default.
#[derive(Clone, Debug)]
pub struct CapabilityTimeouts {
    pub local: Duration,
    pub delegation: Duration,
    pub overrides: HashMap<String, Duration>,
}

impl Default for CapabilityTimeouts {
    fn default() -> Self {
        Self {
            local: DEFAULT_LOCAL_TIMEOUT,
            delegation: DEFAULT_DELEGATION_TIMEOUT,
            overrides: HashMap::new(),
        }
    }
}

impl CapabilityTimeouts {
    pub fn resolve(&self, name: &str, kind: CapabilityKind) -> Duration {
        if let Some(timeout) = self.overrides.get(name) {
            return *timeout;
        }
        match kind {
            CapabilityKind::Local => self.local,
            CapabilityKind::Delegation => self.delegation,
        }
    }
}

/// Attempts allowed for one call. Only retryable errors are retried.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        exp.min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct RetryPolicies {
    pub local: RetryPolicy,
    pub delegation: RetryPolicy,
}

impl RetryPolicies {
    fn for_kind(&self, kind: CapabilityKind) -> &RetryPolicy {
        match kind {
            CapabilityKind::Local => &self.local,
            CapabilityKind::Delegation => &self.delegation,
        }
    }
}

/// Name → local capability or delegation proxy. Read-only once shared.
pub struct CapabilityRegistry {
    entries: HashMap<String, CapabilityEntry>,
    delegation: Arc<dyn DelegationClient>,
    timeouts: CapabilityTimeouts,
    retries: RetryPolicies,
}

impl CapabilityRegistry {
    pub fn new(delegation: Arc<dyn DelegationClient>) -> Self {
        Self {
            entries: HashMap::new(),
            delegation,
            timeouts: CapabilityTimeouts::default(),
            retries: RetryPolicies::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: CapabilityTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_retries(mut self, retries: RetryPolicies) -> Self {
        self.retries = retries;
        self
    }

    /// Register a local capability, replacing any entry with the same name.
    pub fn register_local(&mut self, capability: Arc<dyn Capability>) {
        let name = capability.name().to_string();
        self.entries.insert(name, CapabilityEntry::Local(capability));
    }

    /// Register a delegation proxy, replacing any entry with the same name.
    pub fn register_delegation(&mut self, proxy: DelegationProxy) {
        self.entries
            .insert(proxy.name.clone(), CapabilityEntry::Delegation(proxy));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn kind(&self, name: &str) -> Option<CapabilityKind> {
        self.entries.get(name).map(CapabilityEntry::kind)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Definitions for the oracle, sorted by name.
    pub fn definitions(&self) -> Vec<CapabilityDefinition> {
        let mut defs: Vec<CapabilityDefinition> =
            self.entries.values().map(CapabilityEntry::to_definition).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Resolve, bind and run one call. Always produces a result; failures are
    /// recorded as error results.
    pub async fn invoke(&self, call: &CapabilityCall, ctx: &CapabilityContext) -> CapabilityResult {
        match self.try_invoke(call, ctx).await {
            Ok(payload) => CapabilityResult::success(call, payload),
            Err(error) => {
                debug!(
                    capability = %call.name,
                    kind = error.kind(),
                    error = %error,
                    "capability failed"
                );
                CapabilityResult::failure(call, error)
            }
        }
    }

    async fn try_invoke(
        &self,
        call: &CapabilityCall,
        ctx: &CapabilityContext,
    ) -> Result<Value, CapabilityError> {
        if call.name.trim().is_empty() {
            return Err(CapabilityError::invalid("capability call has an empty name"));
        }
        let entry = self
            .entries
            .get(&call.name)
            .ok_or_else(|| CapabilityError::UnknownCapability {
                name: call.name.clone(),
            })?;
        let args = entry.signature().bind(&call.arguments)?;

        let kind = entry.kind();
        let timeout = self.timeouts.resolve(&call.name, kind);
        let policy = self.retries.for_kind(kind);
        let max_attempts = policy.max_attempts.max(1);

        let mut attempt = 1;
        loop {
            let dispatching = self.dispatch(entry, &args, ctx);
            let outcome = match tokio::time::timeout(timeout, dispatching).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(
                        capability = %call.name,
                        timeout_secs = timeout.as_secs_f64(),
                        "capability timed out"
                    );
                    Err(CapabilityError::timeout(timeout))
                }
            };

            match outcome {
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = policy.backoff(attempt);
                    warn!(
                        capability = %call.name,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying capability"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn dispatch(
        &self,
        entry: &CapabilityEntry,
        args: &Map<String, Value>,
        ctx: &CapabilityContext,
    ) -> Result<Value, CapabilityError> {
        match entry {
            CapabilityEntry::Local(capability) => {
                match AssertUnwindSafe(capability.call(args.clone(), ctx))
                    .catch_unwind()
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(panic) => {
                        let msg = panic_message(&*panic);
                        error!(capability = capability.name(), panic = %msg, "capability panicked");
                        Err(CapabilityError::failed(format!("capability crashed: {msg}")))
                    }
                }
            }
            CapabilityEntry::Delegation(proxy) => self
                .delegation
                .delegate(&proxy.peer, args)
                .await
                .map(|reply| reply.payload)
                .map_err(CapabilityError::from),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegation::DelegationError;
    use crate::test_support::{ctx, Behavior, ScriptedDelegation, TestCapability};
    use concierge_core::capability::{ParamKind, ParamSpec};
    use serde_json::json;

    fn hotel_proxy() -> DelegationProxy {
        DelegationProxy::new(
            "delegate_to_hotel_agent",
            "Search hotels",
            "hotel_agent",
            Signature::new(vec![
                ParamSpec::required("location", ParamKind::String, "City"),
                ParamSpec::with_default("guests", ParamKind::Integer, "Guests", json!(1)),
                ParamSpec::optional("price_range", ParamKind::String, "Budget"),
            ]),
        )
    }

    fn unreachable() -> DelegationError {
        DelegationError::Unreachable {
            peer: "hotel_agent".into(),
            reason: "connection refused".into(),
        }
    }

    fn registry(delegation: Arc<ScriptedDelegation>) -> CapabilityRegistry {
        let mut registry = CapabilityRegistry::new(delegation);
        registry.register_local(TestCapability::arc("echo", Behavior::Echo));
        registry.register_delegation(hotel_proxy());
        registry
    }

    #[tokio::test]
    async fn unknown_capability_is_a_result() {
        let registry = registry(ScriptedDelegation::arc(vec![]));
        let call = CapabilityCall::new("book_yacht", json!({}));
        let result = registry.invoke(&call, &ctx(&call)).await;
        assert_eq!(
            result.error(),
            Some(&CapabilityError::UnknownCapability {
                name: "book_yacht".into()
            })
        );
        assert_eq!(result.call_id, call.id);
    }

    #[tokio::test]
    async fn malformed_calls_are_invalid_arguments() {
        let registry = registry(ScriptedDelegation::arc(vec![]));

        let call = CapabilityCall::new("", json!({}));
        let result = registry.invoke(&call, &ctx(&call)).await;
        assert_eq!(result.error().map(CapabilityError::kind), Some("invalid_arguments"));

        let call = CapabilityCall::new("delegate_to_hotel_agent", json!("Lisbon"));
        let result = registry.invoke(&call, &ctx(&call)).await;
        assert_eq!(result.error().map(CapabilityError::kind), Some("invalid_arguments"));

        let call = CapabilityCall::new("delegate_to_hotel_agent", json!({"guests": 2}));
        let result = registry.invoke(&call, &ctx(&call)).await;
        assert!(result.error().unwrap().to_string().contains("location"));
    }

    #[tokio::test]
    async fn proxy_forwards_bound_arguments() {
        let delegation = ScriptedDelegation::arc(vec![Ok(json!({"hotels": ["HTL001"]}))]);
        let registry = registry(delegation.clone());
        let call = CapabilityCall::new("delegate_to_hotel_agent", json!({"location": "Lisbon"}));

        let result = registry.invoke(&call, &ctx(&call)).await;
        assert_eq!(result.payload(), Some(&json!({"hotels": ["HTL001"]})));

        let calls = delegation.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "hotel_agent");
        assert_eq!(
            Value::Object(calls[0].1.clone()),
            json!({"location": "Lisbon", "guests": 1, "price_range": null})
        );
    }

    #[tokio::test]
    async fn delegation_not_retried_by_default() {
        let delegation = ScriptedDelegation::arc(vec![Err(unreachable()), Ok(json!({}))]);
        let registry = registry(delegation.clone());
        let call = CapabilityCall::new("delegate_to_hotel_agent", json!({"location": "Lisbon"}));

        let result = registry.invoke(&call, &ctx(&call)).await;
        assert_eq!(result.error().map(CapabilityError::kind), Some("peer_unreachable"));
        assert_eq!(delegation.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_peer_retried_per_policy() {
        let delegation = ScriptedDelegation::arc(vec![
            Err(unreachable()),
            Err(unreachable()),
            Ok(json!({"ok": true})),
        ]);
        let registry = registry(delegation.clone()).with_retries(RetryPolicies {
            delegation: RetryPolicy {
                max_attempts: 3,
                ..RetryPolicy::default()
            },
            ..RetryPolicies::default()
        });
        let call = CapabilityCall::new("delegate_to_hotel_agent", json!({"location": "Lisbon"}));

        let result = registry.invoke(&call, &ctx(&call)).await;
        assert_eq!(result.payload(), Some(&json!({"ok": true})));
        assert_eq!(delegation.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn protocol_errors_are_not_retried() {
        let delegation = ScriptedDelegation::arc(vec![
            Err(DelegationError::Protocol {
                peer: "hotel_agent".into(),
                reason: "HTTP 500".into(),
            }),
            Ok(json!({})),
        ]);
        let registry = registry(delegation.clone()).with_retries(RetryPolicies {
            delegation: RetryPolicy {
                max_attempts: 5,
                ..RetryPolicy::default()
            },
            ..RetryPolicies::default()
        });
        let call = CapabilityCall::new("delegate_to_hotel_agent", json!({"location": "Lisbon"}));
        let result = registry.invoke(&call, &ctx(&call)).await;
        assert_eq!(result.error().map(CapabilityError::kind), Some("peer_protocol_error"));
        assert_eq!(delegation.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_override_applies() {
        let mut registry = CapabilityRegistry::new(ScriptedDelegation::arc(vec![]))
            .with_timeouts(CapabilityTimeouts {
                overrides: HashMap::from([("slow".to_string(), Duration::from_secs(1))]),
                ..CapabilityTimeouts::default()
            });
        registry.register_local(TestCapability::arc(
            "slow",
            Behavior::Sleep(Duration::from_secs(30), json!("late")),
        ));
        let call = CapabilityCall::new("slow", json!({}));
        let result = registry.invoke(&call, &ctx(&call)).await;
        assert_eq!(result.error(), Some(&CapabilityError::Timeout { after_ms: 1000 }));
    }

    #[tokio::test]
    async fn panicking_capability_becomes_execution_failed() {
        let mut registry = CapabilityRegistry::new(ScriptedDelegation::arc(vec![]));
        registry.register_local(TestCapability::arc("boom", Behavior::Panic));
        let call = CapabilityCall::new("boom", json!({}));
        let result = registry.invoke(&call, &ctx(&call)).await;
        let err = result.error().unwrap();
        assert_eq!(err.kind(), "execution_failed");
        assert!(err.to_string().contains("kaboom"));
    }

    #[test]
    fn definitions_sorted_and_kinds_reported() {
        let registry = registry(ScriptedDelegation::arc(vec![]));
        let names: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["delegate_to_hotel_agent", "echo"]);
        assert_eq!(registry.kind("echo"), Some(CapabilityKind::Local));
        assert_eq!(
            registry.kind("delegate_to_hotel_agent"),
            Some(CapabilityKind::Delegation)
        );
        assert_eq!(registry.count(), 2);
        assert!(!registry.contains("book_yacht"));
    }

    #[test]
    fn timeouts_resolve_by_kind() {
        let timeouts = CapabilityTimeouts::default();
        assert_eq!(timeouts.resolve("x", CapabilityKind::Local), Duration::from_secs(120));
        assert_eq!(
            timeouts.resolve("x", CapabilityKind::Delegation),
            Duration::from_secs(600)
        );
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(300));
        assert_eq!(RetryPolicy::none().max_attempts, 1);
    }
}
