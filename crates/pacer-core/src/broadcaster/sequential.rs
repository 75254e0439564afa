use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{count_stop_quorum, invoke, Broadcaster, CallResult, Round};
use crate::participant::RegisteredParticipant;

/// Calls participants one at a time, strictly in registration order.
#[derive(Debug)]
pub struct SequentialBroadcaster {
    participants: Vec<RegisteredParticipant>,
    stop_quorum: usize,
}

impl SequentialBroadcaster {
    /// Create a broadcaster over `participants`.
    pub fn new(participants: Vec<RegisteredParticipant>) -> Self {
        let stop_quorum = count_stop_quorum(&participants);
        Self {
            participants,
            stop_quorum,
        }
    }
}

#[async_trait]
impl Broadcaster for SequentialBroadcaster {
    fn participants(&self) -> &[RegisteredParticipant] {
        &self.participants
    }

    fn stop_quorum(&self) -> usize {
        self.stop_quorum
    }

    async fn run_round(&self, round: Round) -> Vec<CallResult> {
        let mut results = Vec::with_capacity(self.participants.len());
        for participant in &self.participants {
            results.push(invoke(participant, &round).await);
        }
        results
    }

    async fn shutdown(&self, _timeout: Duration) {
        debug!("shutdown of sequential broadcaster is a no-op");
    }
}
