//! SessionFeed - broadcast-based stream of session lifecycle events.
//!
//! Observers (dashboards, the CLI, tests) subscribe to follow a session
//! without taking part in it. Slow subscribers miss events (lagged) rather
//! than blocking the session.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events emitted while a session runs.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The session went from inactive to active
    SessionStarted {
        /// Session identifier
        session_id: Uuid,
        /// Test run identifier from the test context
        test_run_id: String,
    },
    /// A ready signal was counted by the readiness barrier
    ReadySignal {
        /// Session identifier
        session_id: Uuid,
        /// Who sent the signal
        sender: String,
        /// Signals counted so far
        count: usize,
        /// Signals needed to start
        threshold: usize,
    },
    /// Start test was broadcast and background work scheduled
    StartRoutineCompleted {
        /// Session identifier
        session_id: Uuid,
    },
    /// A custom event timer fired
    CustomEventFired {
        /// Session identifier
        session_id: Uuid,
        /// Custom event name
        name: String,
        /// Configured offset in milliseconds
        offset_ms: u64,
    },
    /// A keep-alive round resolved to a control signal
    ControlSignal {
        /// Session identifier
        session_id: Uuid,
        /// `abort`, `kill`, `stop` or `quorum_exceeded`
        signal: String,
        /// Signal details
        message: String,
    },
    /// The session was stopped regularly
    SessionStopped {
        /// Session identifier
        session_id: Uuid,
    },
    /// The session was aborted
    SessionAborted {
        /// Session identifier
        session_id: Uuid,
    },
    /// A check round finished
    ChecksCompleted {
        /// Session identifier
        session_id: Uuid,
        /// Number of checks
        total: usize,
        /// Number of failed checks
        failures: usize,
    },
}

impl SessionEvent {
    /// Get the session_id from any event variant.
    #[must_use]
    pub fn session_id(&self) -> Uuid {
        match self {
            Self::SessionStarted { session_id, .. }
            | Self::ReadySignal { session_id, .. }
            | Self::StartRoutineCompleted { session_id }
            | Self::CustomEventFired { session_id, .. }
            | Self::ControlSignal { session_id, .. }
            | Self::SessionStopped { session_id }
            | Self::SessionAborted { session_id }
            | Self::ChecksCompleted { session_id, .. } => *session_id,
        }
    }
}

/// Broadcast channel carrying [`SessionEvent`]s.
#[derive(Debug, Clone)]
pub struct SessionFeed {
    sender: broadcast::Sender<SessionEvent>,
}

impl SessionFeed {
    /// Create a feed with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events. Returns a receiver that will get all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all active subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    pub fn publish(&self, event: SessionEvent) -> usize {
        // no subscribers is fine
        self.sender.send(event).unwrap_or(0)
    }

    /// Get the current number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for SessionFeed {
    fn default() -> Self {
        Self::new(256)
    }
}
