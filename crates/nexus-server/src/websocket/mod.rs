//! Subscriber connections: state, registry, and socket lifecycle.

pub mod connection;
pub mod heartbeat;
pub mod registry;
pub mod socket;
