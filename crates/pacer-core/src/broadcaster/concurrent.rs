use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use super::{count_stop_quorum, invoke, Broadcaster, CallResult, Round};
use crate::participant::{ParticipantError, RegisteredParticipant};
use crate::shutdown::RoundTracker;

/// Runs every participant call of a round on its own tokio task.
///
/// A round takes as long as its slowest participant, not the sum of all of
/// them. There is no per-round timeout: a participant that never returns
/// stalls the caller of that round.
#[derive(Debug)]
pub struct ConcurrentBroadcaster {
    participants: Vec<RegisteredParticipant>,
    stop_quorum: usize,
    tracker: Arc<RoundTracker>,
}

impl ConcurrentBroadcaster {
    /// Create a broadcaster over `participants`.
    pub fn new(participants: Vec<RegisteredParticipant>) -> Self {
        let stop_quorum = count_stop_quorum(&participants);
        Self {
            participants,
            stop_quorum,
            tracker: Arc::new(RoundTracker::new()),
        }
    }

    /// Number of participant calls still running.
    #[must_use]
    pub fn active_task_count(&self) -> u32 {
        self.tracker.active_task_count()
    }
}

#[async_trait]
impl Broadcaster for ConcurrentBroadcaster {
    fn participants(&self) -> &[RegisteredParticipant] {
        &self.participants
    }

    fn stop_quorum(&self) -> usize {
        self.stop_quorum
    }

    async fn run_round(&self, round: Round) -> Vec<CallResult> {
        let handles = self
            .participants
            .iter()
            .cloned()
            .map(|participant| {
                let round = round.clone();
                let guard = self.tracker.register_task();
                tokio::spawn(RoundTracker::scope(async move {
                    let result = invoke(&participant, &round).await;
                    guard.complete();
                    result
                }))
            })
            .collect::<Vec<_>>();

        join_all(handles)
            .await
            .into_iter()
            .map(|joined| {
                joined.unwrap_or_else(|e| {
                    Err(ParticipantError::failed(format!(
                        "participant task failed: {}",
                        e
                    )))
                })
            })
            .collect()
    }

    async fn shutdown(&self, timeout: Duration) {
        debug!(timeout_ms = timeout.as_millis() as u64, "shutdown concurrent broadcaster");
        if !self.tracker.drain(timeout).await {
            warn!(
                active_tasks = self.tracker.active_task_count(),
                "participant calls still running after shutdown timeout"
            );
        }
    }
}
