//! Participant capability set
//!
//! A participant is a plugin that takes part in every lifecycle phase of a
//! test run. Control requests (abort, kill, stop vote) are returned as tagged
//! [`ParticipantError`] variants instead of being thrown.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schedule::CustomEventEntry;

/// Outcome of one participant call that does not produce a value.
pub type ParticipantResult = std::result::Result<(), ParticipantError>;

/// What a participant call can return besides success.
#[derive(Debug, Error)]
pub enum ParticipantError {
    /// Request to abort the whole test run, results are discarded
    #[error("abort requested: {0}")]
    Abort(String),
    /// Request to halt the load engine, results are still processed
    #[error("kill switch requested: {0}")]
    Kill(String),
    /// Cooperative vote to end the run, counted against the quorum
    #[error("stop test run requested: {0}")]
    StopVote(String),
    /// Any other failure
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl ParticipantError {
    /// Convenience constructor for a plain failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(anyhow::anyhow!(message.into()))
    }
}

/// Pass/fail status of a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckStatus {
    /// Requirements met
    Success,
    /// Requirements not met
    Failure,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "SUCCESS"),
            Self::Failure => write!(f, "FAILURE"),
        }
    }
}

/// Verdict returned by a participant's check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckVerdict {
    /// Pass or fail
    pub status: CheckStatus,
    /// Human-readable explanation
    pub message: String,
}

impl CheckVerdict {
    /// A passing verdict.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Success,
            message: message.into(),
        }
    }

    /// A failing verdict.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Failure,
            message: message.into(),
        }
    }
}

impl Default for CheckVerdict {
    fn default() -> Self {
        Self::success("no check implemented")
    }
}

/// A single participant's verdict from a check round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCheck {
    /// Registered participant name
    pub participant_name: String,
    /// Factory identifier the participant was built from
    pub participant_kind: String,
    /// Pass or fail
    pub status: CheckStatus,
    /// Explanation
    pub message: String,
}

impl EventCheck {
    /// Attach a verdict to the participant that produced it.
    pub fn from_verdict(participant: &RegisteredParticipant, verdict: CheckVerdict) -> Self {
        Self {
            participant_name: participant.name().to_string(),
            participant_kind: participant.kind().to_string(),
            status: verdict.status,
            message: verdict.message,
        }
    }

    /// Failure check for a participant whose check call itself failed.
    pub fn from_error(participant: &RegisteredParticipant, error: &dyn fmt::Display) -> Self {
        Self {
            participant_name: participant.name().to_string(),
            participant_kind: participant.kind().to_string(),
            status: CheckStatus::Failure,
            message: format!("check failed: {}", error),
        }
    }

    /// Whether this check reports a failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status == CheckStatus::Failure
    }
}

/// Lifecycle hooks implemented by every participant.
///
/// All hooks default to doing nothing, so a participant only overrides the
/// phases it cares about.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Participant: Send + Sync {
    /// Called before the test run starts.
    async fn before_test(&self) -> ParticipantResult {
        Ok(())
    }

    /// Called when the load actually starts.
    async fn start_test(&self) -> ParticipantResult {
        Ok(())
    }

    /// Called after a regular end of the test run.
    async fn after_test(&self) -> ParticipantResult {
        Ok(())
    }

    /// Called on every heartbeat while the run is active.
    async fn keep_alive(&self) -> ParticipantResult {
        Ok(())
    }

    /// Called when the test run is aborted.
    async fn abort_test(&self) -> ParticipantResult {
        Ok(())
    }

    /// Called to verify the results of the test run.
    async fn check(&self) -> std::result::Result<CheckVerdict, ParticipantError> {
        Ok(CheckVerdict::default())
    }

    /// Called for every scheduled custom event; ignore the ones that do not apply.
    async fn custom_event(&self, event: &CustomEventEntry) -> ParticipantResult {
        let _ = event;
        Ok(())
    }
}

/// A participant together with its registration data.
#[derive(Clone)]
pub struct RegisteredParticipant {
    name: String,
    kind: String,
    ready_for_start: bool,
    continue_on_keep_alive: bool,
    inner: Arc<dyn Participant>,
}

impl RegisteredParticipant {
    /// Register `inner` under `name`, built by the factory `kind`.
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        inner: Arc<dyn Participant>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            ready_for_start: false,
            continue_on_keep_alive: false,
            inner,
        }
    }

    /// Whether the session waits for a ready signal from this participant.
    pub fn with_ready_for_start(mut self, ready_for_start: bool) -> Self {
        self.ready_for_start = ready_for_start;
        self
    }

    /// Whether this participant counts toward the stop quorum.
    pub fn with_continue_on_keep_alive(mut self, continue_on_keep_alive: bool) -> Self {
        self.continue_on_keep_alive = continue_on_keep_alive;
        self
    }

    /// Unique participant name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Factory identifier
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Ready-for-start flag
    pub fn is_ready_for_start(&self) -> bool {
        self.ready_for_start
    }

    /// Continue-on-keep-alive flag
    pub fn is_continue_on_keep_alive(&self) -> bool {
        self.continue_on_keep_alive
    }

    /// The participant implementation
    pub fn participant(&self) -> &Arc<dyn Participant> {
        &self.inner
    }
}

impl fmt::Debug for RegisteredParticipant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredParticipant")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("ready_for_start", &self.ready_for_start)
            .field("continue_on_keep_alive", &self.continue_on_keep_alive)
            .finish_non_exhaustive()
    }
}
