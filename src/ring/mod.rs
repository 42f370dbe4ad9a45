//! DHT Ring Module
//!
//! Turns the gossip membership view into a consistent-hashing ring and
//! resolves which peer owns a routing key.
//!
//! - **`server`**: the `ServerInstance` facade the storage layer injects;
//!   owns successor resolution.
//! - **`node`**: the resolved peer handle, local short-circuit or remote
//!   record RPC client.

pub mod node;
pub mod server;
