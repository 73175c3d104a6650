use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capability::CapabilityError;
use crate::ids::CallId;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role")]
pub enum Message {
    #[serde(rename = "system")]
    System(SystemMessage),
    #[serde(rename = "user")]
    User(UserMessage),
    #[serde(rename = "assistant")]
    Assistant(AssistantMessage),
    #[serde(rename = "tool_result")]
    ToolResult(CapabilityResult),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    ToolResult,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::ToolResult => "tool_result",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystemMessage {
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calls: Vec<CapabilityCall>,
}

/// A capability invocation requested by the oracle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapabilityCall {
    pub id: CallId,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// The single result recorded for one [`CapabilityCall`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapabilityResult {
    pub call_id: CallId,
    pub name: String,
    pub outcome: CapabilityOutcome,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CapabilityOutcome {
    Success { payload: serde_json::Value },
    Error { error: CapabilityError },
}

// --- Convenience constructors ---

impl Message {
    pub fn system_text(text: impl Into<String>) -> Self {
        Message::System(SystemMessage {
            content: text.into(),
        })
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Message::User(UserMessage {
            content: text.into(),
        })
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Message::Assistant(AssistantMessage::text(text))
    }

    pub fn role(&self) -> Role {
        match self {
            Message::System(_) => Role::System,
            Message::User(_) => Role::User,
            Message::Assistant(_) => Role::Assistant,
            Message::ToolResult(_) => Role::ToolResult,
        }
    }

    pub fn as_assistant(&self) -> Option<&AssistantMessage> {
        match self {
            Message::Assistant(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_result(&self) -> Option<&CapabilityResult> {
        match self {
            Message::ToolResult(r) => Some(r),
            _ => None,
        }
    }
}

impl AssistantMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: text.into(),
            calls: Vec::new(),
        }
    }

    pub fn with_calls(text: impl Into<String>, calls: Vec<CapabilityCall>) -> Self {
        Self {
            content: text.into(),
            calls,
        }
    }

    pub fn has_calls(&self) -> bool {
        !self.calls.is_empty()
    }
}

impl CapabilityCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: CallId::new(),
            name: name.into(),
            arguments,
        }
    }
}

impl CapabilityResult {
    pub fn success(call: &CapabilityCall, payload: serde_json::Value) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            outcome: CapabilityOutcome::Success { payload },
        }
    }

    pub fn failure(call: &CapabilityCall, error: CapabilityError) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            outcome: CapabilityOutcome::Error { error },
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, CapabilityOutcome::Error { .. })
    }

    pub fn payload(&self) -> Option<&serde_json::Value> {
        match &self.outcome {
            CapabilityOutcome::Success { payload } => Some(payload),
            CapabilityOutcome::Error { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&CapabilityError> {
        match &self.outcome {
            CapabilityOutcome::Error { error } => Some(error),
            CapabilityOutcome::Success { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_tags() {
        let json = serde_json::to_value(Message::user_text("hello")).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "hello");

        let json = serde_json::to_value(Message::system_text("rules")).unwrap();
        assert_eq!(json["role"], "system");
    }

    #[test]
    fn assistant_without_calls_omits_field() {
        let json = serde_json::to_value(Message::assistant_text("done")).unwrap();
        assert_eq!(json["role"], "assistant");
        assert!(json.get("calls").is_none());

        let parsed: Message =
            serde_json::from_str(r#"{"role":"assistant","content":"hi"}"#).unwrap();
        assert!(!parsed.as_assistant().unwrap().has_calls());
    }

    #[test]
    fn result_outcome_is_tagged() {
        let call = CapabilityCall::new("delegate_to_flight_agent", serde_json::json!({}));
        let ok = CapabilityResult::success(&call, serde_json::json!({"flights": []}));
        let json = serde_json::to_value(Message::ToolResult(ok)).unwrap();
        assert_eq!(json["role"], "tool_result");
        assert_eq!(json["outcome"]["status"], "success");
        assert_eq!(json["call_id"], call.id.as_str());

        let err = CapabilityResult::failure(
            &call,
            CapabilityError::UnknownCapability {
                name: "book_yacht".into(),
            },
        );
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["outcome"]["status"], "error");
        assert_eq!(json["outcome"]["error"]["kind"], "unknown_capability");
        assert!(err.is_error());
        assert!(err.payload().is_none());
    }

    #[test]
    fn call_arguments_default_to_null() {
        let call: CapabilityCall =
            serde_json::from_str(r#"{"id":"call_1","name":"analyze_travel_request"}"#).unwrap();
        assert!(call.arguments.is_null());
    }

    #[test]
    fn roles_reported() {
        assert_eq!(Message::user_text("x").role(), Role::User);
        assert_eq!(Message::assistant_text("x").role(), Role::Assistant);
        assert_eq!(Role::ToolResult.to_string(), "tool_result");
    }
}
