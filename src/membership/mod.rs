//! Ring Membership Module
//!
//! Maintains the ring's member table via a Gossip-based protocol
//! (inspired by SWIM). Successor resolution reads the alive-member view
//! this service keeps converged.
//!
//! ## Core Mechanisms
//! - **Gossip Protocol**: nodes periodically exchange status updates via
//!   UDP; information spreads epidemically with O(log N) convergence.
//! - **Failure Detection**: an Alive -> Suspect -> Dead transition model
//!   with timeouts handles crashes while tolerating transient hiccups.
//! - **Incarnation Numbers**: a logical clock resolving disputed node
//!   states (e.g. refuting a stale Suspect claim).
//! - **Leader Heartbeats**: the elected leader's periodic beat travels on
//!   the same socket; its receipt timestamp feeds the leader checker.

pub mod service;
pub mod types;

#[cfg(test)]
mod tests;
