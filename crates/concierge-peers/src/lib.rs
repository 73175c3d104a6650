pub mod agents;
pub mod server;
pub mod threads;

pub use agents::{AgentError, AgentRoster, PeerAgent};
pub use server::{build_router, start, PeerServerConfig, ServerHandle};
