//! Leader heartbeat supervision.
//!
//! Every follower runs one checker. Each tick compares the time since
//! the last leader heartbeat against the threshold (the configured
//! heartbeat interval plus a 30% grace). On timeout the checker cancels
//! itself first, then invokes the takeover transition, so the transition
//! fires at most once per checker instance regardless of tick timing.

use super::types::{LeaderTransition, PeerState, now_ms};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub struct LeaderChecker {
    peer: Arc<PeerState>,
    manager: Arc<dyn LeaderTransition>,
    /// Timeout threshold: configured heartbeat interval + 30% grace.
    heart_beat_delay: u64,
    cancelled: AtomicBool,
}

impl LeaderChecker {
    pub fn new(
        peer: Arc<PeerState>,
        manager: Arc<dyn LeaderTransition>,
        heartbeat_delay_ms: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            peer,
            manager,
            heart_beat_delay: heartbeat_delay_ms * 130 / 100,
            cancelled: AtomicBool::new(false),
        })
    }

    /// Spawns the periodic check, ticking once per heartbeat interval.
    /// The task exits after a takeover or an external `cancel`.
    pub fn start(self: Arc<Self>, tick_ms: u64) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(tick_ms));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                if self.is_cancelled() {
                    break;
                }
                self.check_once();
            }
        })
    }

    /// One supervision tick. Returns true when this tick performed the
    /// takeover transition.
    pub fn check_once(&self) -> bool {
        if self.is_cancelled() {
            return false;
        }

        let gap = now_ms().saturating_sub(self.peer.last_heart_beat());
        if gap <= self.heart_beat_delay {
            return false;
        }

        // Cancel before transitioning: a second tick racing past the gap
        // check must lose the swap and never fire the manager again.
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }

        tracing::warn!(
            "No heartbeat from the leader node (last was {} ms ago), taking leadership",
            gap
        );
        self.manager.became_leader();
        true
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
