//! Broadcaster - fans lifecycle calls out to every participant
//!
//! Each phase is one *round*: every registered participant is invoked once.
//! A failing participant never prevents the others from being called, and no
//! failure escapes a round except through [`Broadcaster::keep_alive`], which
//! resolves control requests into a [`ControlSignal`].
//!
//! Two implementations exist:
//! - [`SequentialBroadcaster`]: calls participants one by one, in registration order
//! - [`ConcurrentBroadcaster`]: one tokio task per participant per round

mod concurrent;
mod sequential;


pub use concurrent::ConcurrentBroadcaster;
pub use sequential::SequentialBroadcaster;

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::participant::{CheckVerdict, EventCheck, ParticipantError, RegisteredParticipant};
use crate::schedule::CustomEventEntry;

/// Which broadcaster implementation a session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcasterKind {
    /// Registration order, one participant at a time
    Sequential,
    /// Every participant on its own task
    #[default]
    Concurrent,
}

impl BroadcasterKind {
    /// Build a broadcaster of this kind over `participants`.
    pub fn create(self, participants: Vec<RegisteredParticipant>) -> Arc<dyn Broadcaster> {
        match self {
            Self::Sequential => Arc::new(SequentialBroadcaster::new(participants)),
            Self::Concurrent => Arc::new(ConcurrentBroadcaster::new(participants)),
        }
    }
}

/// One lifecycle phase to invoke on all participants.
#[derive(Debug, Clone)]
pub enum Round {
    /// Before the test starts
    BeforeTest,
    /// Load starts
    StartTest,
    /// Regular end of the run
    AfterTest,
    /// Run aborted
    AbortTest,
    /// Heartbeat
    KeepAlive,
    /// Result verification
    Check,
    /// Scheduled custom event
    CustomEvent(Arc<CustomEventEntry>),
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BeforeTest => write!(f, "before test"),
            Self::StartTest => write!(f, "start test"),
            Self::AfterTest => write!(f, "after test"),
            Self::AbortTest => write!(f, "abort test"),
            Self::KeepAlive => write!(f, "keep alive"),
            Self::Check => write!(f, "check"),
            Self::CustomEvent(event) => write!(f, "custom event {}", event.name()),
        }
    }
}

/// What a single participant call produced.
#[derive(Debug)]
pub enum CallOutcome {
    /// The hook returned normally
    Done,
    /// A check hook returned a verdict
    Checked(CheckVerdict),
}

/// Result of one participant call within a round.
pub type CallResult = std::result::Result<CallOutcome, ParticipantError>;

/// Classification of a participant failure during keep-alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionSignal {
    /// Abort the run
    Abort,
    /// Halt the load engine
    Kill,
    /// Cooperative stop vote
    StopVote,
    /// Anything else
    Generic,
}

impl ExceptionSignal {
    /// Classify a participant error.
    #[must_use]
    pub fn classify(error: &ParticipantError) -> Self {
        match error {
            ParticipantError::Abort(_) => Self::Abort,
            ParticipantError::Kill(_) => Self::Kill,
            ParticipantError::StopVote(_) => Self::StopVote,
            ParticipantError::Failed(_) => Self::Generic,
        }
    }
}

/// Control request resolved from one keep-alive round.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlSignal {
    /// A participant requested a full abort
    #[error("abort: {0}")]
    Abort(String),
    /// A participant requested the load engine to halt
    #[error("kill: {0}")]
    Kill(String),
    /// The stop quorum was reached
    #[error("stop: {0}")]
    Stop(String),
    /// More stop votes than quorum participants: misconfiguration
    #[error("{votes} stop votes exceed the quorum of {quorum}")]
    QuorumExceeded {
        /// Votes counted in the round
        votes: usize,
        /// Registered quorum
        quorum: usize,
    },
}

impl ControlSignal {
    /// Short label for logs and events.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Abort(_) => "abort",
            Self::Kill(_) => "kill",
            Self::Stop(_) => "stop",
            Self::QuorumExceeded { .. } => "quorum_exceeded",
        }
    }
}

/// Fan-out of lifecycle rounds to all registered participants.
///
/// Implementors provide [`run_round`](Broadcaster::run_round); the phase
/// methods are built on top of it.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Registered participants, in registration order.
    fn participants(&self) -> &[RegisteredParticipant];

    /// Number of participants flagged continue-on-keep-alive.
    fn stop_quorum(&self) -> usize;

    /// Invoke `round` on every participant. Results are returned in
    /// registration order, one per participant, and the call only returns
    /// once every participant call has returned.
    async fn run_round(&self, round: Round) -> Vec<CallResult>;

    /// Wait up to `timeout` for in-flight round tasks, then abandon them.
    async fn shutdown(&self, timeout: Duration);

    /// Broadcast before test
    async fn before_test(&self) {
        info!("broadcast before test event");
        self.broadcast(Round::BeforeTest).await;
    }

    /// Broadcast start test
    async fn start_test(&self) {
        info!("broadcast start test event");
        self.broadcast(Round::StartTest).await;
    }

    /// Broadcast after test
    async fn after_test(&self) {
        info!("broadcast after test event");
        self.broadcast(Round::AfterTest).await;
    }

    /// Broadcast abort test
    async fn abort_test(&self) {
        debug!("broadcast abort test event");
        self.broadcast(Round::AbortTest).await;
    }

    /// Broadcast a custom event
    async fn custom_event(&self, event: &CustomEventEntry) {
        info!(event = %event.name(), "broadcast custom event");
        self.broadcast(Round::CustomEvent(Arc::new(event.clone())))
            .await;
    }

    /// Collect one check per participant, in registration order.
    ///
    /// A participant whose check call fails gets a fabricated failure check.
    async fn check(&self) -> Vec<EventCheck> {
        info!("broadcast check test");
        let results = self.run_round(Round::Check).await;
        self.participants()
            .iter()
            .zip(results)
            .map(|(participant, result)| match result {
                Ok(CallOutcome::Checked(verdict)) => EventCheck::from_verdict(participant, verdict),
                Ok(CallOutcome::Done) => {
                    EventCheck::from_verdict(participant, CheckVerdict::default())
                }
                Err(e) => {
                    error!(participant = %participant.name(), error = %e, "check failed");
                    EventCheck::from_error(participant, &e)
                }
            })
            .collect()
    }

    /// Run a keep-alive round and resolve any control requests in it.
    async fn keep_alive(&self) -> std::result::Result<(), ControlSignal> {
        debug!("broadcast keep alive event");
        let results = self.run_round(Round::KeepAlive).await;
        let failures = self
            .participants()
            .iter()
            .zip(results)
            .filter_map(|(participant, result)| result.err().map(|e| (participant, e)))
            .collect::<Vec<_>>();
        debug!(failures = failures.len(), "keep alive round done");
        resolve_keep_alive(&failures, self.stop_quorum())
    }

    /// Run `round` and log every failure; nothing escapes.
    async fn broadcast(&self, round: Round) {
        let results = self.run_round(round.clone()).await;
        for (participant, result) in self.participants().iter().zip(results) {
            if let Err(e) = result {
                log_round_failure(&round, participant, &e);
            }
        }
    }
}

/// Count of participants flagged continue-on-keep-alive.
pub fn count_stop_quorum(participants: &[RegisteredParticipant]) -> usize {
    participants
        .iter()
        .filter(|p| p.is_continue_on_keep_alive())
        .count()
}

/// Resolve the failures of one keep-alive round, strictly by priority:
/// abort, then kill, then the stop-vote quorum. Generic failures are logged
/// and never block resolution.
pub fn resolve_keep_alive(
    failures: &[(&RegisteredParticipant, ParticipantError)],
    quorum: usize,
) -> std::result::Result<(), ControlSignal> {
    let mut abort = None;
    let mut kill = None;
    let mut voters = Vec::new();

    for (participant, error) in failures {
        match ExceptionSignal::classify(error) {
            ExceptionSignal::Abort => {
                abort.get_or_insert_with(|| error.to_string());
            }
            ExceptionSignal::Kill => {
                kill.get_or_insert_with(|| error.to_string());
            }
            ExceptionSignal::StopVote => voters.push(participant.name().to_string()),
            ExceptionSignal::Generic => {
                log_round_failure(&Round::KeepAlive, participant, error);
            }
        }
    }

    if let Some(message) = abort {
        return Err(ControlSignal::Abort(message));
    }
    if let Some(message) = kill {
        return Err(ControlSignal::Kill(message));
    }

    let votes = voters.len();
    if votes == 0 {
        return Ok(());
    }
    if votes > quorum {
        error!(votes, quorum, "more stop votes than continue-on-keep-alive participants");
        return Err(ControlSignal::QuorumExceeded { votes, quorum });
    }
    if votes == quorum {
        return Err(ControlSignal::Stop(format!(
            "all {} continue-on-keep-alive participants voted to stop: {}",
            quorum,
            voters.join(", ")
        )));
    }

    info!(
        votes,
        quorum,
        voters = %voters.join(", "),
        "not all continue-on-keep-alive participants voted to stop, continuing"
    );
    Ok(())
}

/// Invoke `round` on one participant inside a `participant` span.
///
/// Panics are caught and reported as a failure.
pub async fn invoke(participant: &RegisteredParticipant, round: &Round) -> CallResult {
    let span = info_span!("participant", name = %participant.name(), kind = %participant.kind());
    let p = participant.participant();

    let call = async {
        match round {
            Round::BeforeTest => p.before_test().await.map(|_| CallOutcome::Done),
            Round::StartTest => p.start_test().await.map(|_| CallOutcome::Done),
            Round::AfterTest => p.after_test().await.map(|_| CallOutcome::Done),
            Round::AbortTest => p.abort_test().await.map(|_| CallOutcome::Done),
            Round::KeepAlive => p.keep_alive().await.map(|_| CallOutcome::Done),
            Round::Check => p.check().await.map(CallOutcome::Checked),
            Round::CustomEvent(event) => p.custom_event(event).await.map(|_| CallOutcome::Done),
        }
    };

    AssertUnwindSafe(call.instrument(span))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(ParticipantError::failed(format!("participant panicked: {}", reason)))
        })
}

fn log_round_failure(round: &Round, participant: &RegisteredParticipant, error: &ParticipantError) {
    match ExceptionSignal::classify(error) {
        ExceptionSignal::Generic => error!(
            participant = %participant.name(),
            round = %round,
            error = %error,
            "exception in participant"
        ),
        _ => warn!(
            participant = %participant.name(),
            round = %round,
            signal = %error,
            "control request ignored outside keep-alive"
        ),
    }
}
