//! Oracle implementations that ship with the workspace. Production oracles
//! live outside it and implement [`concierge_core::oracle::Oracle`].

pub mod mock;

pub use mock::{ScriptedOracle, ScriptedResponse};
