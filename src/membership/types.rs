use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

/// Ring identity of a node: a 64-bit point on the circular keyspace.
/// Successor resolution compares these as unsigned integers, wrapping at
/// the top of the keyspace.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Draws a random ring position for a newly started node.
    pub fn random() -> Self {
        Self(rand::random::<u64>())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Lifecycle state of a node as seen by the local failure detector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeState {
    /// The node is healthy and responsive.
    Alive,
    /// The node has missed the gossip window and is suspected to be
    /// down. It can refute the suspicion or time out into `Dead`.
    Suspect,
    /// The node is confirmed failed and excluded from the ring view.
    Dead,
}

/// A single member of the cluster: ring identity, network addressing and
/// current lifecycle state. `incarnation` is the logical clock used to
/// order state updates and refute stale suspicions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// UDP address used for the gossip protocol.
    pub gossip_addr: SocketAddr,
    /// TCP address of the record RPC / HTTP API.
    pub http_addr: SocketAddr,
    pub state: NodeState,
    pub incarnation: u64,

    /// Local timestamp of the last contact; never sent over the wire.
    #[serde(skip)]
    pub last_seen: Option<Instant>,
}

/// The UDP wire protocol for inter-node coordination: SWIM-style
/// membership messages plus the leader heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GossipMessage {
    /// Direct health check carrying the sender's incarnation.
    Ping { from: NodeId, incarnation: u64 },

    /// Response to a ping; carries the responder's member list so state
    /// spreads epidemically.
    Ack {
        from: NodeId,
        incarnation: u64,
        members: Vec<Node>,
    },

    /// Sent by a new node to a seed node to enter the cluster.
    Join { node: Node },

    /// Broadcast claiming a node is suspected dead.
    Suspect { node_id: NodeId, incarnation: u64 },

    /// Broadcast refuting a suspicion (or announcing recovery).
    Alive { node_id: NodeId, incarnation: u64 },

    /// Periodic heartbeat from the current leader. Receipt refreshes the
    /// peer's `last_heart_beat`, which the leader checker watches.
    LeaderBeat { from: NodeId, incarnation: u64 },
}
