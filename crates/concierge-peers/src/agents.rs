//! Specialist peer agents and request decoding.
//!
//! Each agent receives the delegation document the orchestrator sent as the
//! text of a human message and returns deterministic search results.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum AgentError {
    #[error("run input has no human message")]
    NoHumanMessage,
    #[error("human message is not a JSON object: {0}")]
    UndecodableRequest(String),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` must be {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },
}

#[async_trait]
pub trait PeerAgent: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, request: &Map<String, Value>) -> Result<Value, AgentError>;
}

/// Pull the request object out of a run `input`.
///
/// Uses the last `human` message. Its content may be a plain string or a
/// list of `{"type": "text", "text": ...}` parts, which are concatenated.
pub fn decode_request(input: &Value) -> Result<Map<String, Value>, AgentError> {
    let message = input
        .get("messages")
        .and_then(Value::as_array)
        .and_then(|messages| {
            messages
                .iter()
                .rev()
                .find(|m| m.get("type").and_then(Value::as_str) == Some("human"))
        })
        .ok_or(AgentError::NoHumanMessage)?;

    let text = match message.get("content") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect(),
        _ => return Err(AgentError::NoHumanMessage),
    };

    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(AgentError::UndecodableRequest(format!(
            "expected object, got {other}"
        ))),
        Err(e) => Err(AgentError::UndecodableRequest(e.to_string())),
    }
}

fn required_str<'a>(
    request: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a str, AgentError> {
    match request.get(field) {
        None | Some(Value::Null) => Err(AgentError::MissingField(field)),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(AgentError::InvalidField {
            field,
            expected: "a string",
        }),
    }
}

fn required_list(request: &Map<String, Value>, field: &'static str) -> Result<Value, AgentError> {
    match request.get(field) {
        None | Some(Value::Null) => Err(AgentError::MissingField(field)),
        Some(Value::Array(items)) if items.iter().all(Value::is_string) => {
            Ok(Value::Array(items.clone()))
        }
        Some(_) => Err(AgentError::InvalidField {
            field,
            expected: "a list of strings",
        }),
    }
}

fn required_int(request: &Map<String, Value>, field: &'static str) -> Result<i64, AgentError> {
    match request.get(field) {
        None | Some(Value::Null) => Err(AgentError::MissingField(field)),
        Some(v) => v.as_i64().ok_or(AgentError::InvalidField {
            field,
            expected: "an integer",
        }),
    }
}

fn or_default(request: &Map<String, Value>, field: &str, default: Value) -> Value {
    match request.get(field) {
        None | Some(Value::Null) => default,
        Some(v) => v.clone(),
    }
}

fn optional(request: &Map<String, Value>, field: &str) -> Value {
    or_default(request, field, Value::Null)
}

pub struct FlightAgent;

#[async_trait]
impl PeerAgent for FlightAgent {
    fn name(&self) -> &str {
        "flight_agent"
    }

    async fn handle(&self, request: &Map<String, Value>) -> Result<Value, AgentError> {
        let origin = required_str(request, "origin")?;
        let destination = required_str(request, "destination")?;
        let departure_date = required_str(request, "departure_date")?;
        let class = or_default(request, "class_preference", json!("economy"));

        let flights = vec![
            json!({
                "flight_id": "FL001",
                "airline": "SkyLine Airways",
                "origin": origin,
                "destination": destination,
                "departure_time": "08:30",
                "arrival_time": "14:45",
                "duration": "6h 15m",
                "price": 450,
                "class": class,
                "stops": 0,
                "aircraft": "Boeing 737",
            }),
            json!({
                "flight_id": "FL002",
                "airline": "Global Wings",
                "origin": origin,
                "destination": destination,
                "departure_time": "15:20",
                "arrival_time": "21:10",
                "duration": "5h 50m",
                "price": 520,
                "class": class,
                "stops": 0,
                "aircraft": "Airbus A320",
            }),
        ];

        Ok(json!({
            "search_criteria": {
                "origin": origin,
                "destination": destination,
                "departure_date": departure_date,
                "return_date": optional(request, "return_date"),
                "passengers": or_default(request, "passengers", json!(1)),
                "class": class,
            },
            "total_results": flights.len(),
            "flights": flights,
        }))
    }
}

pub struct HotelAgent;

#[async_trait]
impl PeerAgent for HotelAgent {
    fn name(&self) -> &str {
        "hotel_agent"
    }

    async fn handle(&self, request: &Map<String, Value>) -> Result<Value, AgentError> {
        let location = required_str(request, "location")?;
        let check_in_date = required_str(request, "check_in_date")?;
        let check_out_date = required_str(request, "check_out_date")?;

        let hotels = vec![
            json!({
                "hotel_id": "HTL001",
                "name": "Grand Plaza Hotel",
                "location": location,
                "rating": 4.5,
                "price_per_night": 180,
                "total_price": 540,
                "amenities": ["Pool", "Gym", "WiFi", "Restaurant", "Spa"],
                "room_type": "Deluxe King Room",
                "cancellation": "Free cancellation until 24h before check-in",
                "distance_to_center": "0.5 km",
            }),
            json!({
                "hotel_id": "HTL002",
                "name": "City Center Inn",
                "location": location,
                "rating": 4.2,
                "price_per_night": 120,
                "total_price": 360,
                "amenities": ["WiFi", "Restaurant", "24h Front Desk"],
                "room_type": "Standard Double Room",
                "cancellation": "Free cancellation until 48h before check-in",
                "distance_to_center": "0.2 km",
            }),
        ];

        Ok(json!({
            "search_criteria": {
                "location": location,
                "check_in_date": check_in_date,
                "check_out_date": check_out_date,
                "guests": or_default(request, "guests", json!(1)),
                "rooms": or_default(request, "rooms", json!(1)),
                "price_range": optional(request, "price_range"),
            },
            "total_results": hotels.len(),
            "hotels": hotels,
        }))
    }
}

pub struct EsimAgent;

#[async_trait]
impl PeerAgent for EsimAgent {
    fn name(&self) -> &str {
        "esim_agent"
    }

    async fn handle(&self, request: &Map<String, Value>) -> Result<Value, AgentError> {
        let country = required_str(request, "destination_country")?;
        let travel_duration = required_int(request, "travel_duration")?;

        let plans = vec![
            json!({
                "plan_id": "ESIM001",
                "provider": "ConnectData",
                "country": country,
                "data_allowance": "10 GB",
                "validity_days": 30,
                "price": 25,
            }),
            json!({
                "plan_id": "ESIM002",
                "provider": "GlobalRoam",
                "country": country,
                "data_allowance": "5 GB",
                "validity_days": 15,
                "price": 15,
            }),
        ];

        Ok(json!({
            "search_criteria": {
                "destination_country": country,
                "travel_duration": travel_duration,
                "data_needs": or_default(request, "data_needs", json!("moderate")),
            },
            "total_results": plans.len(),
            "plans": plans,
        }))
    }
}

pub struct ActivitiesAgent;

#[async_trait]
impl PeerAgent for ActivitiesAgent {
    fn name(&self) -> &str {
        "activities_agent"
    }

    async fn handle(&self, request: &Map<String, Value>) -> Result<Value, AgentError> {
        let location = required_str(request, "location")?;
        let travel_dates = required_list(request, "travel_dates")?;
        let interests = required_list(request, "interests")?;

        let activities = vec![
            json!({
                "activity_id": "ACT001",
                "name": "City Tour",
                "location": location,
                "price": 50,
                "rating": 4.8,
                "duration": "3 hours",
            }),
            json!({
                "activity_id": "ACT002",
                "name": "Museum Visit",
                "location": location,
                "price": 20,
                "rating": 4.6,
                "duration": "2 hours",
            }),
        ];

        Ok(json!({
            "search_criteria": {
                "location": location,
                "travel_dates": travel_dates,
                "interests": interests,
                "budget_per_activity": optional(request, "budget_per_activity"),
            },
            "total_results": activities.len(),
            "activities": activities,
        }))
    }
}

/// Agents hosted by one server, keyed by assistant id.
#[derive(Clone, Default)]
pub struct AgentRoster {
    agents: HashMap<String, Arc<dyn PeerAgent>>,
}

impl AgentRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// The four travel specialists.
    pub fn travel() -> Self {
        let mut roster = Self::new();
        roster.register(Arc::new(FlightAgent));
        roster.register(Arc::new(HotelAgent));
        roster.register(Arc::new(EsimAgent));
        roster.register(Arc::new(ActivitiesAgent));
        roster
    }

    pub fn register(&mut self, agent: Arc<dyn PeerAgent>) {
        let _ = self.agents.insert(agent.name().to_string(), agent);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PeerAgent>> {
        self.agents.get(name).cloned()
    }

    /// Sorted agent names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }
}
