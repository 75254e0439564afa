use async_trait::async_trait;
use tracing::{debug, info};

use crate::bus::{Message, MessageBus};
use crate::config::{EventContext, TestContext};
use crate::participant::{CheckVerdict, Participant, ParticipantError, ParticipantResult};
use crate::schedule::CustomEventEntry;

/// Participant that only logs what happens to it.
///
/// When registered as ready-for-start it sends the ready token on the bus
/// right after before-test, so a session with only logging participants
/// starts on its own.
#[derive(Debug)]
pub struct LoggingParticipant {
    name: String,
    test_run_id: String,
    signal_ready: bool,
    bus: MessageBus,
}

impl LoggingParticipant {
    /// Create a logging participant from its config.
    pub fn new(event: &EventContext, test: &TestContext, bus: MessageBus) -> Self {
        Self {
            name: event.name.clone(),
            test_run_id: test.test_run_id.clone(),
            signal_ready: event.ready_for_start,
            bus,
        }
    }
}

#[async_trait]
impl Participant for LoggingParticipant {
    async fn before_test(&self) -> ParticipantResult {
        info!(test_run_id = %self.test_run_id, "before test");
        if self.signal_ready {
            self.bus
                .send(&Message::ready(&self.name))
                .map_err(|e| ParticipantError::Failed(e.into()))?;
        }
        Ok(())
    }

    async fn start_test(&self) -> ParticipantResult {
        info!(test_run_id = %self.test_run_id, "start test");
        Ok(())
    }

    async fn after_test(&self) -> ParticipantResult {
        info!(test_run_id = %self.test_run_id, "after test");
        Ok(())
    }

    async fn keep_alive(&self) -> ParticipantResult {
        debug!("keep alive");
        Ok(())
    }

    async fn abort_test(&self) -> ParticipantResult {
        info!(test_run_id = %self.test_run_id, "abort test");
        Ok(())
    }

    async fn check(&self) -> Result<CheckVerdict, ParticipantError> {
        Ok(CheckVerdict::success(format!("{} has nothing to check", self.name)))
    }

    async fn custom_event(&self, event: &CustomEventEntry) -> ParticipantResult {
        info!(event = %event, "custom event");
        Ok(())
    }
}
