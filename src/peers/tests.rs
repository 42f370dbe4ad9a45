//! Peer Supervision Tests
//!
//! Validates the leader checker's timeout math and its single-shot
//! takeover guarantee.

#[cfg(test)]
mod tests {
    use crate::peers::checker::LeaderChecker;
    use crate::peers::types::{LeaderTransition, PeerState, now_ms};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTransition {
        calls: AtomicUsize,
    }

    impl CountingTransition {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl LeaderTransition for CountingTransition {
        fn became_leader(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn stale_heartbeat_triggers_takeover_once() {
        let peer = Arc::new(PeerState::new());
        let manager = CountingTransition::new();
        let checker = LeaderChecker::new(peer.clone(), manager.clone(), 100);

        // Last heartbeat 200ms ago, threshold is 130ms.
        peer.set_last_heart_beat(now_ms() - 200);

        assert!(checker.check_once(), "first tick must take over");
        assert_eq!(manager.calls(), 1);
        assert!(checker.is_cancelled(), "takeover must cancel the task");

        // A second tick against the same stale clock stays silent.
        assert!(!checker.check_once());
        assert_eq!(manager.calls(), 1);
    }

    #[test]
    fn fresh_heartbeat_keeps_follower_quiet() {
        let peer = Arc::new(PeerState::new());
        let manager = CountingTransition::new();
        let checker = LeaderChecker::new(peer.clone(), manager.clone(), 100);

        peer.set_last_heart_beat(now_ms());

        assert!(!checker.check_once());
        assert_eq!(manager.calls(), 0);
        assert!(!checker.is_cancelled());
    }

    #[test]
    fn gap_within_grace_window_does_not_fire() {
        let peer = Arc::new(PeerState::new());
        let manager = CountingTransition::new();
        let checker = LeaderChecker::new(peer.clone(), manager.clone(), 100);

        // 105ms gap: beyond the base interval but inside the 30% grace.
        peer.set_last_heart_beat(now_ms() - 105);

        assert!(!checker.check_once());
        assert_eq!(manager.calls(), 0);
    }

    #[test]
    fn cancelled_checker_never_fires() {
        let peer = Arc::new(PeerState::new());
        let manager = CountingTransition::new();
        let checker = LeaderChecker::new(peer.clone(), manager.clone(), 100);

        peer.set_last_heart_beat(now_ms() - 10_000);
        checker.cancel();

        assert!(!checker.check_once());
        assert_eq!(manager.calls(), 0);
    }

    #[test]
    fn heart_beat_receipt_records_leader_identity() {
        use crate::membership::types::NodeId;

        let peer = PeerState::new();
        assert_eq!(peer.leader(), None);

        let before = peer.last_heart_beat();
        peer.record_heart_beat(NodeId(42));

        assert_eq!(peer.leader(), Some(NodeId(42)));
        assert!(peer.last_heart_beat() >= before);
    }
}
