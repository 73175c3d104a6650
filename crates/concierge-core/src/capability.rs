use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::ids::{CallId, RunId};

/// Declared type of a capability parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    StringList,
    Object,
}

impl ParamKind {
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::StringList => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
            Self::Object => value.is_object(),
        }
    }

    fn schema(&self) -> Value {
        match self {
            Self::String => serde_json::json!({"type": "string"}),
            Self::Integer => serde_json::json!({"type": "integer"}),
            Self::Number => serde_json::json!({"type": "number"}),
            Self::Boolean => serde_json::json!({"type": "boolean"}),
            Self::StringList => serde_json::json!({"type": "array", "items": {"type": "string"}}),
            Self::Object => serde_json::json!({"type": "object"}),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::StringList => "list of strings",
            Self::Object => "object",
        }
    }
}

/// What happens when a parameter is absent from the call.
#[derive(Clone, Debug, PartialEq)]
pub enum Presence {
    Required,
    /// Absent → `null`.
    Optional,
    /// Absent → this value.
    Default(Value),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub description: String,
    pub presence: Presence,
}

impl ParamSpec {
    pub fn required(name: &str, kind: ParamKind, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            presence: Presence::Required,
        }
    }

    pub fn optional(name: &str, kind: ParamKind, description: &str) -> Self {
        Self {
            presence: Presence::Optional,
            ..Self::required(name, kind, description)
        }
    }

    pub fn with_default(name: &str, kind: ParamKind, description: &str, default: Value) -> Self {
        Self {
            presence: Presence::Default(default),
            ..Self::required(name, kind, description)
        }
    }
}

/// Ordered parameter list a capability accepts.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Signature {
    params: Vec<ParamSpec>,
}

impl Signature {
    pub fn new(params: Vec<ParamSpec>) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    /// Validate raw call arguments and fill in defaults.
    ///
    /// The result holds every declared parameter in declaration order. `null`
    /// arguments are treated as an empty mapping.
    pub fn bind(&self, arguments: &Value) -> Result<Map<String, Value>, CapabilityError> {
        let empty = Map::new();
        let supplied = match arguments {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(CapabilityError::invalid(format!(
                    "arguments must be an object, got {}",
                    json_kind(other)
                )))
            }
        };

        if let Some(unknown) = supplied
            .keys()
            .find(|k| !self.params.iter().any(|p| &p.name == *k))
        {
            return Err(CapabilityError::invalid(format!("unexpected argument '{unknown}'")));
        }

        let mut bound = Map::new();
        for param in &self.params {
            let value = match (supplied.get(&param.name), &param.presence) {
                (Some(Value::Null), Presence::Optional) => Value::Null,
                (Some(v), _) => {
                    if !param.kind.accepts(v) {
                        return Err(CapabilityError::invalid(format!(
                            "'{}' must be {}, got {}",
                            param.name,
                            param.kind.name(),
                            json_kind(v)
                        )));
                    }
                    v.clone()
                }
                (None, Presence::Required) => {
                    return Err(CapabilityError::invalid(format!(
                        "missing required argument '{}'",
                        param.name
                    )))
                }
                (None, Presence::Optional) => Value::Null,
                (None, Presence::Default(d)) => d.clone(),
            };
            bound.insert(param.name.clone(), value);
        }
        Ok(bound)
    }

    /// JSON schema describing the parameters, for the oracle.
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in &self.params {
            let mut schema = param.kind.schema();
            schema["description"] = Value::String(param.description.clone());
            if let Presence::Default(d) = &param.presence {
                schema["default"] = d.clone();
            }
            if param.presence == Presence::Required {
                required.push(Value::String(param.name.clone()));
            }
            properties.insert(param.name.clone(), schema);
        }
        serde_json::json!({
            "type": "object",
            "required": required,
            "properties": properties,
        })
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Capability description sent to the oracle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: Value,
}

/// Context available to a capability while it runs.
#[derive(Clone, Debug)]
pub struct CapabilityContext {
    pub run_id: RunId,
    pub call_id: CallId,
    pub cancel: CancellationToken,
}

/// A capability executed inside the orchestrator process.
#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn signature(&self) -> &Signature;

    /// Run with arguments already bound against [`Capability::signature`].
    async fn call(
        &self,
        args: Map<String, Value>,
        ctx: &CapabilityContext,
    ) -> Result<Value, CapabilityError>;

    fn to_definition(&self) -> CapabilityDefinition {
        CapabilityDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters_schema: self.signature().json_schema(),
        }
    }
}

/// Failure of a single capability call. Recorded in the transcript, never fatal to a run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CapabilityError {
    #[error("unknown capability: {name}")]
    UnknownCapability { name: String },
    #[error("invalid arguments: {reason}")]
    InvalidArguments { reason: String },
    #[error("timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
    #[error("peer '{peer}' unreachable: {reason}")]
    PeerUnreachable { peer: String, reason: String },
    #[error("peer '{peer}' protocol error: {reason}")]
    PeerProtocolError { peer: String, reason: String },
    #[error("execution failed: {reason}")]
    ExecutionFailed { reason: String },
}

impl CapabilityError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            reason: reason.into(),
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::Timeout {
            after_ms: after.as_millis() as u64,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            reason: reason.into(),
        }
    }

    /// Only unreachable peers are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PeerUnreachable { .. })
    }

    /// Short classification string for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownCapability { .. } => "unknown_capability",
            Self::InvalidArguments { .. } => "invalid_arguments",
            Self::Timeout { .. } => "timeout",
            Self::PeerUnreachable { .. } => "peer_unreachable",
            Self::PeerProtocolError { .. } => "peer_protocol_error",
            Self::ExecutionFailed { .. } => "execution_failed",
        }
    }
}
