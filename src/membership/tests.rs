//! Membership Module Tests
//!
//! Validates the fundamental components of the ring membership system.
//!
//! ## Test Scopes
//! - **Data Structures**: ring id ordering and correct serialization of
//!   wire protocol messages.
//! - **Service Logic**: initialization, member management, liveness
//!   filtering.

#[cfg(test)]
mod tests {
    use crate::membership::service::MembershipService;
    use crate::membership::types::{GossipMessage, Node, NodeId, NodeState};
    use crate::peers::types::PeerState;
    use std::sync::Arc;
    use std::time::Instant;

    // ============================================================
    // NODE ID TESTS
    // ============================================================

    #[test]
    fn node_ids_order_as_ring_positions() {
        let mut ids = vec![NodeId(300), NodeId(100), NodeId(u64::MAX), NodeId(0)];
        ids.sort();

        assert_eq!(ids, vec![NodeId(0), NodeId(100), NodeId(300), NodeId(u64::MAX)]);
    }

    #[test]
    fn node_id_displays_as_fixed_width_hex() {
        assert_eq!(NodeId(0).to_string(), "0000000000000000");
        assert_eq!(NodeId(1 << 62).to_string(), "4000000000000000");
    }

    // ============================================================
    // WIRE PROTOCOL TESTS
    // ============================================================

    #[test]
    fn gossip_messages_roundtrip_through_bincode() {
        let node = Node {
            id: NodeId(17),
            gossip_addr: "127.0.0.1:5000".parse().unwrap(),
            http_addr: "127.0.0.1:6000".parse().unwrap(),
            state: NodeState::Alive,
            incarnation: 3,
            last_seen: Some(Instant::now()),
        };

        let messages = vec![
            GossipMessage::Ping {
                from: NodeId(17),
                incarnation: 3,
            },
            GossipMessage::Join { node: node.clone() },
            GossipMessage::Suspect {
                node_id: NodeId(17),
                incarnation: 3,
            },
            GossipMessage::LeaderBeat {
                from: NodeId(17),
                incarnation: 3,
            },
        ];

        for msg in messages {
            let encoded = bincode::serialize(&msg).unwrap();
            let decoded: GossipMessage = bincode::deserialize(&encoded).unwrap();

            match (&msg, &decoded) {
                (
                    GossipMessage::Ping { from: a, .. },
                    GossipMessage::Ping { from: b, .. },
                ) => assert_eq!(a, b),
                (GossipMessage::Join { node: a }, GossipMessage::Join { node: b }) => {
                    assert_eq!(a.id, b.id);
                    assert_eq!(a.http_addr, b.http_addr);
                    assert!(b.last_seen.is_none(), "local timestamps must not travel");
                }
                (
                    GossipMessage::Suspect { node_id: a, .. },
                    GossipMessage::Suspect { node_id: b, .. },
                ) => assert_eq!(a, b),
                (
                    GossipMessage::LeaderBeat { from: a, .. },
                    GossipMessage::LeaderBeat { from: b, .. },
                ) => assert_eq!(a, b),
                (sent, received) => panic!("variant changed in flight: {sent:?} -> {received:?}"),
            }
        }
    }

    // ============================================================
    // SERVICE TESTS
    // ============================================================

    #[tokio::test]
    async fn new_service_knows_only_itself() {
        let service = MembershipService::new(
            "127.0.0.1:0".parse().unwrap(),
            "127.0.0.1:0".parse().unwrap(),
            vec![],
            Arc::new(PeerState::new()),
        )
        .await
        .expect("failed to create service");

        assert_eq!(service.members.len(), 1);

        let members = service.get_alive_members();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].state, NodeState::Alive);
        assert_eq!(members[0].id, service.local_node.id);
    }

    #[tokio::test]
    async fn explicit_ring_id_is_kept() {
        let service = MembershipService::new_with_ring_id(
            NodeId(77),
            "127.0.0.1:0".parse().unwrap(),
            "127.0.0.1:0".parse().unwrap(),
            vec![],
            Arc::new(PeerState::new()),
        )
        .await
        .unwrap();

        assert_eq!(service.local_node.id, NodeId(77));
        assert!(service.get_member(&NodeId(77)).is_some());
    }

    #[tokio::test]
    async fn alive_filter_excludes_failed_members() {
        let service = MembershipService::new(
            "127.0.0.1:0".parse().unwrap(),
            "127.0.0.1:0".parse().unwrap(),
            vec![],
            Arc::new(PeerState::new()),
        )
        .await
        .unwrap();

        for (id, state) in [(2, NodeState::Alive), (3, NodeState::Suspect), (4, NodeState::Dead)] {
            service.members.insert(
                NodeId(id),
                Node {
                    id: NodeId(id),
                    gossip_addr: "127.0.0.1:1".parse().unwrap(),
                    http_addr: "127.0.0.1:2".parse().unwrap(),
                    state,
                    incarnation: 1,
                    last_seen: Some(Instant::now()),
                },
            );
        }

        let alive = service.get_alive_members();
        assert_eq!(alive.len(), 2, "local node plus the one alive peer");
        assert!(alive.iter().any(|node| node.id == NodeId(2)));
    }
}
