//! Wiring between layered settings and the orchestrator, delegation client
//! and telemetry. Embedders pass their own [`concierge_core::oracle::Oracle`]
//! to [`wiring::orchestrator`].

pub mod wiring;
