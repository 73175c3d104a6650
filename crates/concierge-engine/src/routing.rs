use concierge_core::messages::{CapabilityCall, Message, Role};

/// What the loop does after an oracle step.
#[derive(Clone, Debug, PartialEq)]
pub enum RouteDecision {
    Terminate,
    /// Calls in the exact order the oracle issued them.
    Execute(Vec<CapabilityCall>),
}

#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("expected an assistant message to route, got {role}")]
    NotAssistant { role: Role },
}

/// Decide whether the latest message ends the run or requests capability calls.
pub fn route(latest: &Message) -> Result<RouteDecision, RoutingError> {
    let Message::Assistant(assistant) = latest else {
        return Err(RoutingError::NotAssistant {
            role: latest.role(),
        });
    };
    if assistant.calls.is_empty() {
        Ok(RouteDecision::Terminate)
    } else {
        Ok(RouteDecision::Execute(assistant.calls.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_core::messages::AssistantMessage;
    use serde_json::json;

    #[test]
    fn no_calls_terminates() {
        let decision = route(&Message::assistant_text("Here is your itinerary.")).unwrap();
        assert_eq!(decision, RouteDecision::Terminate);
    }

    #[test]
    fn calls_kept_in_order_without_dedup() {
        let calls = vec![
            CapabilityCall::new("delegate_to_hotel_agent", json!({"location": "Lisbon"})),
            CapabilityCall::new("delegate_to_flight_agent", json!({"origin": "SFO"})),
            CapabilityCall::new("delegate_to_hotel_agent", json!({"location": "Lisbon"})),
        ];
        let msg = Message::Assistant(AssistantMessage::with_calls("", calls.clone()));
        match route(&msg).unwrap() {
            RouteDecision::Execute(routed) => assert_eq!(routed, calls),
            other => panic!("expected Execute, got {other:?}"),
        }
    }

    #[test]
    fn non_assistant_rejected() {
        let err = route(&Message::user_text("hello")).unwrap_err();
        assert!(matches!(err, RoutingError::NotAssistant { role: Role::User }));
        assert!(err.to_string().contains("user"));
    }
}
