pub mod analyze;
pub mod travel;

pub use analyze::AnalyzeTravelRequest;
pub use travel::{travel_proxies, travel_registry};
