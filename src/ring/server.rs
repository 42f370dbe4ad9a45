//! Successor resolution over the membership view.
//!
//! The ring is the alive-member table ordered by ring id. The successor
//! of a key is the first alive node whose id is greater than or equal to
//! the key, wrapping to the smallest alive id at the top of the
//! keyspace. Membership changes reshape the ring implicitly; nothing is
//! rebalanced here, only the lookup is dynamic.

use super::node::{DhtNode, RemoteNode};
use crate::membership::service::MembershipService;
use crate::membership::types::NodeId;
use std::sync::Arc;

pub struct ServerInstance {
    membership: Arc<MembershipService>,
    client: reqwest::Client,
}

impl ServerInstance {
    pub fn new(membership: Arc<MembershipService>) -> Arc<Self> {
        Arc::new(Self {
            membership,
            client: reqwest::Client::new(),
        })
    }

    pub fn local_node_id(&self) -> NodeId {
        self.membership.local_node.id
    }

    /// Resolves the node responsible for `key`: the first alive member
    /// with ring id >= key, wrapping to the smallest. A one-node ring
    /// always resolves locally.
    pub fn find_successor(&self, key: u64) -> DhtNode {
        let mut members = self.membership.get_alive_members();
        members.sort_by_key(|node| node.id);

        let successor = members
            .iter()
            .find(|node| node.id.0 >= key)
            .or_else(|| members.first());

        match successor {
            Some(node) if node.id != self.local_node_id() => DhtNode::Remote(RemoteNode::new(
                node.id,
                node.http_addr,
                self.client.clone(),
            )),
            _ => DhtNode::Local(self.local_node_id()),
        }
    }
}
