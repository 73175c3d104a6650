use std::sync::Arc;

use serde_json::json;

use concierge_core::capability::{ParamKind, ParamSpec, Signature};

use crate::capabilities::AnalyzeTravelRequest;
use crate::delegation::DelegationClient;
use crate::intent::IntentAnalyzer;
use crate::registry::{CapabilityRegistry, DelegationProxy};

/// Delegation proxies for the four specialist peers.
pub fn travel_proxies() -> Vec<DelegationProxy> {
    vec![
        DelegationProxy::new(
            "delegate_to_flight_agent",
            "Delegate flight search and booking to the flight specialist",
            "flight_agent",
            Signature::new(vec![
                ParamSpec::required("origin", ParamKind::String, "Departure city or airport code"),
                ParamSpec::required(
                    "destination",
                    ParamKind::String,
                    "Arrival city or airport code",
                ),
                ParamSpec::required(
                    "departure_date",
                    ParamKind::String,
                    "Departure date, YYYY-MM-DD",
                ),
                ParamSpec::optional(
                    "return_date",
                    ParamKind::String,
                    "Return date for round trips, YYYY-MM-DD",
                ),
                ParamSpec::with_default(
                    "passengers",
                    ParamKind::Integer,
                    "Number of passengers",
                    json!(1),
                ),
                ParamSpec::with_default(
                    "class_preference",
                    ParamKind::String,
                    "Cabin class: economy, business or first",
                    json!("economy"),
                ),
            ]),
        ),
        DelegationProxy::new(
            "delegate_to_hotel_agent",
            "Delegate hotel search and booking to the hotel specialist",
            "hotel_agent",
            Signature::new(vec![
                ParamSpec::required("location", ParamKind::String, "City, address or landmark"),
                ParamSpec::required(
                    "check_in_date",
                    ParamKind::String,
                    "Check-in date, YYYY-MM-DD",
                ),
                ParamSpec::required(
                    "check_out_date",
                    ParamKind::String,
                    "Check-out date, YYYY-MM-DD",
                ),
                ParamSpec::with_default("guests", ParamKind::Integer, "Number of guests", json!(1)),
                ParamSpec::with_default("rooms", ParamKind::Integer, "Number of rooms", json!(1)),
                ParamSpec::optional(
                    "price_range",
                    ParamKind::String,
                    "budget, mid-range or luxury",
                ),
            ]),
        ),
        DelegationProxy::new(
            "delegate_to_esim_agent",
            "Delegate eSIM plan search and activation to the eSIM specialist",
            "esim_agent",
            Signature::new(vec![
                ParamSpec::required(
                    "destination_country",
                    ParamKind::String,
                    "Country or region to cover",
                ),
                ParamSpec::required("travel_duration", ParamKind::Integer, "Trip length in days"),
                ParamSpec::with_default(
                    "data_needs",
                    ParamKind::String,
                    "Expected usage: light, moderate or heavy",
                    json!("moderate"),
                ),
            ]),
        ),
        DelegationProxy::new(
            "delegate_to_activities_agent",
            "Delegate activity search and booking to the activities specialist",
            "activities_agent",
            Signature::new(vec![
                ParamSpec::required(
                    "location",
                    ParamKind::String,
                    "Where the activities take place",
                ),
                ParamSpec::required(
                    "travel_dates",
                    ParamKind::StringList,
                    "Available dates, YYYY-MM-DD",
                ),
                ParamSpec::required("interests", ParamKind::StringList, "Kinds of activity wanted"),
                ParamSpec::optional(
                    "budget_per_activity",
                    ParamKind::String,
                    "Budget per activity",
                ),
            ]),
        ),
    ]
}

/// Registry with `analyze_travel_request` and the four delegation proxies.
pub fn travel_registry(
    delegation: Arc<dyn DelegationClient>,
    analyzer: Arc<dyn IntentAnalyzer>,
) -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new(delegation);
    registry.register_local(Arc::new(AnalyzeTravelRequest::new(analyzer)));
    for proxy in travel_proxies() {
        registry.register_delegation(proxy);
    }
    registry
}
