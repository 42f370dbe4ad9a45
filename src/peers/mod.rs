//! Peer Supervision Module
//!
//! The leader side of cluster coordination: each peer keeps a clock of
//! the last leader heartbeat, a checker trips when the clock goes stale
//! past the 30%-grace threshold, and the manager performs the takeover
//! transition (Follower -> TakingLeadership -> Leader) and starts
//! broadcasting heartbeats of its own.
//!
//! One timeout is enough to trigger a takeover; there is no quorum at
//! this layer. The election protocol above it debounces concurrent
//! claims.

pub mod checker;
pub mod manager;
pub mod types;

#[cfg(test)]
mod tests;
