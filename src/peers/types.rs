use crate::membership::types::NodeId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Role of this node in the leader protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Follower,
    TakingLeadership,
    Leader,
}

/// Per-peer leader supervision state: when the leader was last heard and
/// who it was. Updated by the gossip receive loop, read by the checker.
pub struct PeerState {
    last_heart_beat: AtomicU64,
    leader: Mutex<Option<NodeId>>,
}

impl PeerState {
    /// Starts with the clock at "now" so a freshly booted peer gives the
    /// leader a full window before suspecting it.
    pub fn new() -> Self {
        Self {
            last_heart_beat: AtomicU64::new(now_ms()),
            leader: Mutex::new(None),
        }
    }

    pub fn record_heart_beat(&self, from: NodeId) {
        self.last_heart_beat.store(now_ms(), Ordering::Release);
        *self.leader.lock() = Some(from);
    }

    pub fn last_heart_beat(&self) -> u64 {
        self.last_heart_beat.load(Ordering::Acquire)
    }

    /// Rewinds or pins the heartbeat clock to an explicit timestamp.
    pub fn set_last_heart_beat(&self, millis: u64) {
        self.last_heart_beat.store(millis, Ordering::Release);
    }

    pub fn leader(&self) -> Option<NodeId> {
        *self.leader.lock()
    }
}

impl Default for PeerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Transition target the leader checker fires into when the heartbeat
/// times out. The cluster manager implements it; the seam keeps the
/// takeover side swappable.
pub trait LeaderTransition: Send + Sync {
    fn became_leader(&self);
}
