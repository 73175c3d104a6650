use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use concierge_core::capability::{
    Capability, CapabilityContext, CapabilityError, ParamKind, ParamSpec, Signature,
};

use crate::intent::{IntentAnalyzer, KeywordIntentAnalyzer};

/// Exposes the intent analyzer to the oracle as `analyze_travel_request`.
pub struct AnalyzeTravelRequest {
    analyzer: Arc<dyn IntentAnalyzer>,
    signature: Signature,
}

impl AnalyzeTravelRequest {
    pub fn new(analyzer: Arc<dyn IntentAnalyzer>) -> Self {
        Self {
            analyzer,
            signature: Signature::new(vec![ParamSpec::required(
                "user_message",
                ParamKind::String,
                "The traveller's request, verbatim",
            )]),
        }
    }
}

impl Default for AnalyzeTravelRequest {
    fn default() -> Self {
        Self::new(Arc::new(KeywordIntentAnalyzer::travel()))
    }
}

#[async_trait]
impl Capability for AnalyzeTravelRequest {
    fn name(&self) -> &str {
        "analyze_travel_request"
    }

    fn description(&self) -> &str {
        "Identify which travel services (flights, hotels, eSIM, activities) a request needs"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    async fn call(
        &self,
        args: Map<String, Value>,
        _ctx: &CapabilityContext,
    ) -> Result<Value, CapabilityError> {
        let text = args
            .get("user_message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let analysis = self.analyzer.analyze(text);

        let mut out = Map::new();
        for (category, required) in &analysis.flags {
            out.insert(format!("requires_{category}"), Value::Bool(*required));
        }
        out.insert("extracted_entities".into(), json!({}));
        out.insert("confidence".into(), json!(analysis.confidence));
        Ok(Value::Object(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ctx;
    use concierge_core::messages::CapabilityCall;

    #[tokio::test]
    async fn reports_flags_and_confidence() {
        let capability = AnalyzeTravelRequest::default();
        let call = CapabilityCall::new(capability.name(), json!({}));
        let args = capability
            .signature()
            .bind(&json!({"user_message": "Find me a hotel and a city tour"}))
            .unwrap();

        let out = capability.call(args, &ctx(&call)).await.unwrap();
        assert_eq!(
            out,
            json!({
                "requires_activities": true,
                "requires_esim": false,
                "requires_flights": false,
                "requires_hotels": true,
                "extracted_entities": {},
                "confidence": 0.5,
            })
        );
    }

    #[test]
    fn user_message_is_required() {
        let capability = AnalyzeTravelRequest::default();
        assert!(capability.signature().bind(&json!({})).is_err());
        let def = capability.to_definition();
        assert_eq!(def.name, "analyze_travel_request");
        assert_eq!(def.parameters_schema["required"], json!(["user_message"]));
    }
}
