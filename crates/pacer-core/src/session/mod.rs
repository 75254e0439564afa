//! Session state machine
//!
//! A [`Session`] owns every component of one test run and moves between
//! inactive and active with compare-and-swap only:
//!
//! ```text
//! Inactive --start_session--> Active --stop_session/abort_session--> Inactive
//! ```
//!
//! Starting broadcasts before-test, publishes the test configuration and then
//! runs the start routine, either right away or once the readiness barrier
//! opens. The start routine broadcasts start-test and launches the keep-alive
//! heartbeat and the custom event timers. Stopping or aborting cancels that
//! background work first, without waiting for it, then broadcasts.

mod builder;
mod test_config;


pub use builder::SessionBuilder;
pub use test_config::{test_config_message, SCHEDULER_SENDER_ID, VALUE_LIST_DELIMITER};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broadcaster::Broadcaster;
use crate::bus::{Message, MessageBus};
use crate::config::SchedulerContext;
use crate::error::{Error, Result};
use crate::feed::{SessionEvent, SessionFeed};
use crate::keep_alive::{ExceptionHandler, HandlerSlot, KeepAlive};
use crate::participant::EventCheck;
use crate::readiness::ReadinessBarrier;
use crate::schedule::{CustomEventEntry, CustomEventScheduler};

/// One test run's orchestration. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: Uuid,
    context: SchedulerContext,
    broadcaster: Arc<dyn Broadcaster>,
    bus: MessageBus,
    handlers: HandlerSlot,
    // schedule text the custom events were parsed from
    schedule_script: String,
    custom_events: Arc<[CustomEventEntry]>,
    barrier: Option<Arc<ReadinessBarrier>>,
    feed: SessionFeed,
    runtime: Handle,
    active: AtomicBool,
    // per activation: set once setup is done, and once the start routine ran
    routine_armed: AtomicBool,
    routine_started: AtomicBool,
    cancel: Mutex<CancellationToken>,
}

impl Session {
    /// Start building a session for `context`.
    pub fn builder(context: SchedulerContext) -> SessionBuilder {
        SessionBuilder::new(context)
    }

    /// Move from inactive to active.
    ///
    /// Broadcasts before-test and publishes the test configuration. The start
    /// routine runs immediately when no ready signals are needed (or all of
    /// them already arrived), otherwise once the barrier opens. Calling this
    /// on an active session logs a warning and does nothing.
    ///
    /// Fails when a bus receiver rejects the test configuration message.
    pub async fn start_session(&self) -> Result<()> {
        let inner = &self.inner;
        if inner
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(
                session_id = %inner.id,
                "start session called while session is already active, ignoring"
            );
            return Ok(());
        }

        inner.routine_armed.store(false, Ordering::SeqCst);
        inner.routine_started.store(false, Ordering::SeqCst);
        *inner.cancel.lock().unwrap_or_else(PoisonError::into_inner) = CancellationToken::new();

        info!(
            session_id = %inner.id,
            test_run_id = %inner.context.test.test_run_id,
            participants = inner.broadcaster.participants().len(),
            "start session"
        );
        inner.feed.publish(SessionEvent::SessionStarted {
            session_id: inner.id,
            test_run_id: inner.context.test.test_run_id.clone(),
        });

        inner.broadcaster.before_test().await;

        let message = test_config_message(
            &inner.context,
            &inner.schedule_script,
            inner.broadcaster.participants().iter().map(|p| p.name()),
        );
        inner.bus.send(&message)?;

        inner.routine_armed.store(true, Ordering::SeqCst);

        match &inner.barrier {
            Some(barrier) if !barrier.is_released() => {
                info!(
                    received = barrier.count(),
                    threshold = barrier.threshold(),
                    "waiting for ready signals before starting the test"
                );
            }
            _ => inner.run_start_routine().await,
        }
        Ok(())
    }

    /// Move from active to inactive and broadcast after-test.
    ///
    /// Calling this on an inactive session logs a warning and does nothing.
    pub async fn stop_session(&self) {
        let inner = &self.inner;
        if !inner.deactivate() {
            warn!(
                session_id = %inner.id,
                "stop session called while session is not active, ignoring"
            );
            return;
        }

        info!(session_id = %inner.id, "stop session");
        inner.broadcaster.after_test().await;
        inner.feed.publish(SessionEvent::SessionStopped { session_id: inner.id });
    }

    /// Move from active to inactive and broadcast abort-test.
    ///
    /// Calling this on an inactive session logs a warning and does nothing.
    pub async fn abort_session(&self) {
        let inner = &self.inner;
        if !inner.deactivate() {
            warn!(
                session_id = %inner.id,
                "abort session called while session is not active, ignoring"
            );
            return;
        }

        info!(session_id = %inner.id, "abort session");
        inner.broadcaster.abort_test().await;
        inner.feed.publish(SessionEvent::SessionAborted { session_id: inner.id });
    }

    /// Gather one check per participant.
    ///
    /// With the scheduler enabled, any failed check turns into one
    /// [`Error::CheckFailed`] naming every failing participant. With it
    /// disabled the failures are only logged.
    pub async fn check_results(&self) -> Result<Vec<EventCheck>> {
        let inner = &self.inner;
        let checks = inner.broadcaster.check().await;
        let failures: Vec<&EventCheck> = checks.iter().filter(|c| c.is_failure()).collect();

        inner.feed.publish(SessionEvent::ChecksCompleted {
            session_id: inner.id,
            total: checks.len(),
            failures: failures.len(),
        });

        if failures.is_empty() {
            info!(checks = checks.len(), "all event checks successful");
            return Ok(checks);
        }

        let message = format!(
            "event checks with failures found: [{}]",
            failures
                .iter()
                .map(|c| format!(
                    "kind: '{}' id: '{}' message: '{}'",
                    c.participant_kind, c.participant_name, c.message
                ))
                .collect::<Vec<_>>()
                .join(", ")
        );

        if inner.context.scheduler_enabled {
            error!(failures = failures.len(), "{}", message);
            Err(Error::CheckFailed(message))
        } else {
            warn!(
                failures = failures.len(),
                "{} (scheduler disabled, not failing the run)", message
            );
            Ok(checks)
        }
    }

    /// Send a message on the session's bus.
    pub fn send_message(&self, message: &Message) -> Result<()> {
        self.inner.bus.send(message)?;
        Ok(())
    }

    /// Attach the exception handler, replacing any previous one.
    ///
    /// A running heartbeat picks up the new handler on its next signal.
    pub fn add_kill_switch(&self, handler: Arc<dyn ExceptionHandler>) {
        debug!(session_id = %self.inner.id, "exception handler replaced");
        self.inner.handlers.replace(handler);
    }

    /// Whether the session is inactive
    #[must_use]
    pub fn is_session_stopped(&self) -> bool {
        !self.inner.active.load(Ordering::SeqCst)
    }

    /// Follow lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.feed.subscribe()
    }

    /// Session identifier
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// The immutable context this session was built from
    #[must_use]
    pub fn context(&self) -> &SchedulerContext {
        &self.inner.context
    }

    /// Schedule text the custom events were parsed from
    #[must_use]
    pub fn schedule_script(&self) -> &str {
        &self.inner.schedule_script
    }

    /// Parsed custom events, in schedule order
    #[must_use]
    pub fn custom_events(&self) -> &[CustomEventEntry] {
        &self.inner.custom_events
    }

    /// Ready signals needed before the start routine runs
    #[must_use]
    pub fn ready_threshold(&self) -> usize {
        self.inner.barrier.as_ref().map_or(0, |b| b.threshold())
    }

    /// Ready signals received so far
    #[must_use]
    pub fn ready_count(&self) -> usize {
        self.inner.barrier.as_ref().map_or(0, |b| b.count())
    }

    /// The session's message bus
    #[must_use]
    pub fn message_bus(&self) -> &MessageBus {
        &self.inner.bus
    }

    /// Names of the registered participants, in registration order
    #[must_use]
    pub fn participant_names(&self) -> Vec<&str> {
        self.inner
            .broadcaster
            .participants()
            .iter()
            .map(|p| p.name())
            .collect()
    }

    /// Wait up to `timeout` for running participant calls.
    pub async fn shutdown(&self, timeout: Duration) {
        info!(session_id = %self.inner.id, "shutdown session");
        self.inner.broadcaster.shutdown(timeout).await;
    }
}

impl SessionInner {
    /// Returns false when the session was not active.
    fn deactivate(&self) -> bool {
        if self
            .active
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.current_token().cancel();
        true
    }

    fn current_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Broadcast start-test, then launch heartbeat and custom events.
    ///
    /// Runs at most once per activation, and only after the session finished
    /// its own start-up.
    async fn run_start_routine(self: &Arc<Self>) {
        if !self.active.load(Ordering::SeqCst) || !self.routine_armed.load(Ordering::SeqCst) {
            debug!(session_id = %self.id, "session not started yet, start routine deferred");
            return;
        }
        if self
            .routine_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(session_id = %self.id, "start routine already ran");
            return;
        }

        let cancel = self.current_token();
        info!(session_id = %self.id, "start routine");
        self.broadcaster.start_test().await;

        if cancel.is_cancelled() {
            info!(
                session_id = %self.id,
                "session ended during start test, not scheduling background work"
            );
            return;
        }

        KeepAlive::new(
            Arc::clone(&self.broadcaster),
            self.handlers.clone(),
            self.context.keep_alive_interval,
        )
        .with_feed(self.feed.clone(), self.id)
        .spawn(cancel.child_token());

        if !self.custom_events.is_empty() {
            CustomEventScheduler::new(
                Arc::clone(&self.custom_events),
                Arc::clone(&self.broadcaster),
            )
            .with_feed(self.feed.clone(), self.id)
            .schedule(&cancel);
        }

        self.feed
            .publish(SessionEvent::StartRoutineCompleted { session_id: self.id });
    }

    /// Release callback for the readiness barrier.
    fn release_from_barrier(weak: &std::sync::Weak<Self>) {
        let Some(inner) = weak.upgrade() else {
            debug!("ready barrier released after session was dropped");
            return;
        };
        let runtime = inner.runtime.clone();
        runtime.spawn(async move { inner.run_start_routine().await });
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("active", &!self.is_session_stopped())
            .field("participants", &self.participant_names())
            .field("custom_events", &self.inner.custom_events.len())
            .field("ready_threshold", &self.ready_threshold())
            .finish_non_exhaustive()
    }
}
