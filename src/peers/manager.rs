//! Cluster role management.
//!
//! Tracks this node's role in the leader protocol and owns the two
//! periodic duties attached to it: followers run a [`LeaderChecker`]
//! against the heartbeat clock, the leader broadcasts `LeaderBeat`
//! messages over the gossip socket.

use super::checker::LeaderChecker;
use super::types::{LeaderTransition, NodeRole, PeerState};
use crate::membership::service::MembershipService;
use crate::membership::types::GossipMessage;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;

pub struct ClusterManager {
    membership: Arc<MembershipService>,
    peer: Arc<PeerState>,
    heartbeat_delay_ms: u64,
    role: Mutex<NodeRole>,
    /// Back-reference for spawning the heartbeat loop from the
    /// `LeaderTransition` callback, which only sees `&self`.
    self_ref: Weak<Self>,
}

impl ClusterManager {
    pub fn new(
        membership: Arc<MembershipService>,
        peer: Arc<PeerState>,
        heartbeat_delay_ms: u64,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            membership,
            peer,
            heartbeat_delay_ms,
            role: Mutex::new(NodeRole::Follower),
            self_ref: self_ref.clone(),
        })
    }

    pub fn role(&self) -> NodeRole {
        *self.role.lock()
    }

    pub fn is_leader(&self) -> bool {
        self.role() == NodeRole::Leader
    }

    /// Starts supervision as a follower: the leader checker watches the
    /// heartbeat clock and calls back into `became_leader` on timeout.
    pub fn start(&self) {
        let Some(manager) = self.self_ref.upgrade() else {
            return;
        };

        let checker = LeaderChecker::new(
            self.peer.clone(),
            manager as Arc<dyn LeaderTransition>,
            self.heartbeat_delay_ms,
        );
        checker.start(self.heartbeat_delay_ms);

        tracing::info!(
            "Leader supervision started (threshold {} ms)",
            self.heartbeat_delay_ms * 130 / 100
        );
    }

    fn start_heartbeat_loop(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(self.heartbeat_delay_ms));

            loop {
                interval.tick().await;

                if self.role() != NodeRole::Leader {
                    break;
                }

                let msg = GossipMessage::LeaderBeat {
                    from: self.membership.local_node.id,
                    incarnation: self.membership.local_node.incarnation,
                };
                self.membership.broadcast_message(msg).await;

                // The leader's own beat also refreshes the local clock,
                // so a checker restarted on this node stays quiet.
                self.peer.record_heart_beat(self.membership.local_node.id);
            }
        });
    }
}

impl LeaderTransition for ClusterManager {
    /// Takes leadership after a heartbeat timeout. The election protocol
    /// above this layer reconciles concurrent takeovers; here the node
    /// transitions and starts beating.
    fn became_leader(&self) {
        {
            let mut role = self.role.lock();
            if *role == NodeRole::Leader {
                return;
            }
            *role = NodeRole::TakingLeadership;
            tracing::warn!(
                "Node {} is taking cluster leadership",
                self.membership.local_node.id
            );
            *role = NodeRole::Leader;
        }

        self.peer.record_heart_beat(self.membership.local_node.id);

        if let Some(manager) = self.self_ref.upgrade() {
            manager.start_heartbeat_loop();
        }
    }
}
