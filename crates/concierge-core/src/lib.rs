pub mod capability;
pub mod conversation;
pub mod errors;
pub mod events;
pub mod ids;
pub mod messages;
pub mod oracle;
