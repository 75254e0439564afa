//! Keep-alive heartbeat
//!
//! Runs a keep-alive round on every tick and hands resolved control signals
//! to the currently attached [`ExceptionHandler`].

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broadcaster::{Broadcaster, ControlSignal};
use crate::error::Error;
use crate::feed::{SessionEvent, SessionFeed};

/// Receives control signals raised during a test run.
#[cfg_attr(test, mockall::automock)]
pub trait ExceptionHandler: Send + Sync {
    /// Halt the load engine; results are still processed.
    fn kill(&self, message: &str);

    /// Abort the run; results are discarded.
    fn abort(&self, message: &str);

    /// The stop quorum was reached. Stops the run like a kill.
    fn stop(&self, message: &str) {
        self.kill(message);
    }
}

/// Shared slot holding the current exception handler.
///
/// Last writer wins; readers always see the latest handler.
#[derive(Clone, Default)]
pub struct HandlerSlot {
    inner: Arc<RwLock<Option<Arc<dyn ExceptionHandler>>>>,
}

impl HandlerSlot {
    /// Create an empty slot
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current handler.
    pub fn replace(&self, handler: Arc<dyn ExceptionHandler>) {
        let mut slot = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(handler);
    }

    /// The handler attached right now, if any.
    #[must_use]
    pub fn current(&self) -> Option<Arc<dyn ExceptionHandler>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether a handler is attached
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.current().is_some()
    }
}

impl fmt::Debug for HandlerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerSlot")
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// How a heartbeat loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatExit {
    /// The session cancelled the heartbeat
    Cancelled,
    /// A control signal was delivered to the exception handler
    Signalled(ControlSignal),
}

/// Periodic keep-alive loop for one session activation.
pub struct KeepAlive {
    broadcaster: Arc<dyn Broadcaster>,
    handlers: HandlerSlot,
    interval: Duration,
    feed: SessionFeed,
    session_id: Uuid,
}

impl KeepAlive {
    /// Create a heartbeat ticking every `interval`.
    pub fn new(
        broadcaster: Arc<dyn Broadcaster>,
        handlers: HandlerSlot,
        interval: Duration,
    ) -> Self {
        Self {
            broadcaster,
            handlers,
            interval,
            feed: SessionFeed::default(),
            session_id: Uuid::nil(),
        }
    }

    /// Publish control signals on `feed`.
    pub fn with_feed(mut self, feed: SessionFeed, session_id: Uuid) -> Self {
        self.feed = feed;
        self.session_id = session_id;
        self
    }

    /// Run the heartbeat on its own task.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<HeartbeatExit> {
        tokio::spawn(self.run(cancel))
    }

    /// Tick until cancelled or until a control signal reaches the handler.
    ///
    /// The first round runs one interval after the call. A signal resolved by
    /// a round that finished after cancellation is dropped. Rounds that
    /// exceed the stop quorum, and signals raised while no handler is
    /// attached, are logged and the heartbeat keeps ticking.
    pub async fn run(self, cancel: CancellationToken) -> HeartbeatExit {
        let Some(first_tick) = Instant::now().checked_add(self.interval) else {
            warn!(
                interval_secs = self.interval.as_secs(),
                "keep-alive interval is beyond the timer range, heartbeat disabled"
            );
            cancel.cancelled().await;
            return HeartbeatExit::Cancelled;
        };
        let mut ticker = interval_at(first_tick, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_ms = self.interval.as_millis() as u64, "keep-alive heartbeat started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("keep-alive heartbeat cancelled");
                    return HeartbeatExit::Cancelled;
                }
                _ = ticker.tick() => {}
            }

            let outcome = self.broadcaster.keep_alive().await;

            if cancel.is_cancelled() {
                if let Err(signal) = outcome {
                    debug!(signal = %signal, "session already ended, dropping control signal");
                }
                return HeartbeatExit::Cancelled;
            }

            if let Err(signal) = outcome {
                if let Some(exit) = self.deliver(signal) {
                    return exit;
                }
            }
        }
    }

    /// Hand `signal` to the current handler. `None` keeps the heartbeat going.
    fn deliver(&self, signal: ControlSignal) -> Option<HeartbeatExit> {
        self.feed.publish(SessionEvent::ControlSignal {
            session_id: self.session_id,
            signal: signal.label().to_string(),
            message: signal.to_string(),
        });

        if let ControlSignal::QuorumExceeded { votes, quorum } = signal {
            let error = Error::QuorumExceeded { votes, quorum };
            error!(error = %error, "keep-alive round rejected, heartbeat continues");
            return None;
        }

        // read fresh: the handler may have been replaced since the heartbeat started
        let Some(handler) = self.handlers.current() else {
            let error = Error::NoExceptionHandler(signal.label().to_string());
            error!(error = %error, signal = %signal, "control signal dropped, heartbeat continues");
            return None;
        };

        match &signal {
            ControlSignal::Abort(message) => {
                warn!(message = %message, "abort requested by participant");
                handler.abort(message);
            }
            ControlSignal::Kill(message) => {
                warn!(message = %message, "kill switch requested by participant");
                handler.kill(message);
            }
            ControlSignal::Stop(message) => {
                info!(message = %message, "stop quorum reached");
                handler.stop(message);
            }
            ControlSignal::QuorumExceeded { .. } => {}
        }
        Some(HeartbeatExit::Signalled(signal))
    }
}

impl fmt::Debug for KeepAlive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeepAlive")
            .field("interval", &self.interval)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcaster::SequentialBroadcaster;
    use crate::participant::{
        Participant, ParticipantError, ParticipantResult, RegisteredParticipant,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const TICK: Duration = Duration::from_millis(20);

    type Respond = Box<dyn Fn(usize) -> ParticipantResult + Send + Sync>;

    struct Heartbeat {
        calls: AtomicUsize,
        respond: Respond,
    }

    impl Heartbeat {
        fn new(respond: impl Fn(usize) -> ParticipantResult + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                respond: Box::new(respond),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Participant for Heartbeat {
        async fn keep_alive(&self) -> ParticipantResult {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            (self.respond)(call)
        }
    }

    #[derive(Default)]
    struct RecordingHandler {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingHandler {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ExceptionHandler for RecordingHandler {
        fn kill(&self, message: &str) {
            self.calls.lock().unwrap().push(format!("kill:{}", message));
        }

        fn abort(&self, message: &str) {
            self.calls.lock().unwrap().push(format!("abort:{}", message));
        }
    }

    fn heartbeat(participants: Vec<RegisteredParticipant>, handlers: HandlerSlot) -> KeepAlive {
        let broadcaster: Arc<dyn Broadcaster> = Arc::new(SequentialBroadcaster::new(participants));
        KeepAlive::new(broadcaster, handlers, TICK)
    }

    fn registered(name: &str, participant: Arc<Heartbeat>) -> RegisteredParticipant {
        RegisteredParticipant::new(name, "test", participant)
    }

    fn attached(handler: Arc<RecordingHandler>) -> HandlerSlot {
        let handlers = HandlerSlot::new();
        handlers.replace(handler);
        handlers
    }

    #[tokio::test]
    async fn test_cancel_before_first_tick() {
        let participant = Heartbeat::new(|_| Ok(()));
        let broadcaster: Arc<dyn Broadcaster> = Arc::new(SequentialBroadcaster::new(vec![
            registered("a", participant.clone()),
        ]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let exit = KeepAlive::new(broadcaster, HandlerSlot::new(), Duration::from_secs(60))
            .run(cancel)
            .await;
        assert_eq!(exit, HeartbeatExit::Cancelled);
        assert_eq!(participant.calls(), 0);
    }

    #[tokio::test]
    async fn test_kill_reaches_handler() {
        let participant = Heartbeat::new(|call| {
            if call == 2 {
                Err(ParticipantError::Kill("response times too high".to_string()))
            } else {
                Ok(())
            }
        });
        let handler = Arc::new(RecordingHandler::default());

        let exit = heartbeat(vec![registered("a", participant.clone())], attached(handler.clone()))
            .run(CancellationToken::new())
            .await;

        assert!(matches!(exit, HeartbeatExit::Signalled(ControlSignal::Kill(_))));
        assert_eq!(participant.calls(), 2);
        let calls = handler.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("kill:"));
        assert!(calls[0].contains("response times too high"));
    }

    #[tokio::test]
    async fn test_abort_reaches_handler() {
        let participant = Heartbeat::new(|_| Err(ParticipantError::Abort("disk full".to_string())));
        let mut handler = MockExceptionHandler::new();
        handler
            .expect_abort()
            .withf(|message| message.contains("disk full"))
            .times(1)
            .return_const(());
        handler.expect_kill().never();
        let handlers = HandlerSlot::new();
        handlers.replace(Arc::new(handler));

        let exit = heartbeat(vec![registered("a", participant)], handlers)
            .run(CancellationToken::new())
            .await;
        assert!(matches!(exit, HeartbeatExit::Signalled(ControlSignal::Abort(_))));
    }

    #[tokio::test]
    async fn test_stop_defaults_to_kill() {
        let voter = Heartbeat::new(|_| Err(ParticipantError::StopVote("done".to_string())));
        let handler = Arc::new(RecordingHandler::default());

        let participants = vec![registered("voter", voter).with_continue_on_keep_alive(true)];
        let exit = heartbeat(participants, attached(handler.clone()))
            .run(CancellationToken::new())
            .await;

        assert!(matches!(exit, HeartbeatExit::Signalled(ControlSignal::Stop(_))));
        let calls = handler.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("kill:"));
    }

    #[tokio::test]
    async fn test_quorum_exceeded_keeps_the_heartbeat_running() {
        let voter = Heartbeat::new(|_| Err(ParticipantError::StopVote("a".into())));
        let late_killer = Heartbeat::new(|call| {
            if call < 3 {
                Err(ParticipantError::StopVote("b".into()))
            } else {
                Err(ParticipantError::Kill("late kill".into()))
            }
        });
        let participants = vec![
            registered("a", voter).with_continue_on_keep_alive(true),
            registered("b", late_killer.clone()),
        ];
        let handler = Arc::new(RecordingHandler::default());

        let exit = heartbeat(participants, attached(handler.clone()))
            .run(CancellationToken::new())
            .await;

        assert!(matches!(exit, HeartbeatExit::Signalled(ControlSignal::Kill(_))));
        assert_eq!(late_killer.calls(), 3);
        let calls = handler.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].contains("late kill"));
    }

    #[tokio::test]
    async fn test_signal_without_handler_keeps_ticking_until_one_is_attached() {
        let participant = Heartbeat::new(|_| Err(ParticipantError::Kill("now".to_string())));
        let handlers = HandlerSlot::new();
        let handle = heartbeat(vec![registered("a", participant.clone())], handlers.clone())
            .spawn(CancellationToken::new());

        tokio::time::sleep(TICK * 4).await;
        assert!(!handle.is_finished());
        let handler = Arc::new(RecordingHandler::default());
        handlers.replace(handler.clone());

        let exit = handle.await.unwrap();
        assert!(matches!(exit, HeartbeatExit::Signalled(ControlSignal::Kill(_))));
        assert!(participant.calls() >= 3);
        assert_eq!(handler.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_handler_replaced_after_start_is_used() {
        let participant = Heartbeat::new(|_| Err(ParticipantError::Kill("late".to_string())));
        let first = Arc::new(RecordingHandler::default());
        let second = Arc::new(RecordingHandler::default());
        let handlers = attached(first.clone());
        let broadcaster: Arc<dyn Broadcaster> = Arc::new(SequentialBroadcaster::new(vec![
            registered("a", participant),
        ]));

        let handle = KeepAlive::new(broadcaster, handlers.clone(), Duration::from_millis(100))
            .spawn(CancellationToken::new());

        handlers.replace(second.clone());
        let exit = handle.await.unwrap();

        assert!(matches!(exit, HeartbeatExit::Signalled(ControlSignal::Kill(_))));
        assert!(first.calls().is_empty());
        assert_eq!(second.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_generic_failures_keep_the_heartbeat_running() {
        let participant = Heartbeat::new(|_| Err(ParticipantError::failed("flaky")));
        let cancel = CancellationToken::new();
        let handle = heartbeat(vec![registered("a", participant.clone())], HandlerSlot::new())
            .spawn(cancel.clone());

        tokio::time::sleep(TICK * 6).await;
        cancel.cancel();

        assert_eq!(handle.await.unwrap(), HeartbeatExit::Cancelled);
        assert!(participant.calls() >= 2);
    }

    #[tokio::test]
    async fn test_interval_beyond_timer_range_waits_for_cancel() {
        let participant = Heartbeat::new(|_| Ok(()));
        let broadcaster: Arc<dyn Broadcaster> = Arc::new(SequentialBroadcaster::new(vec![
            registered("a", participant.clone()),
        ]));
        let cancel = CancellationToken::new();
        let handle = KeepAlive::new(broadcaster, HandlerSlot::new(), Duration::from_secs(u64::MAX))
            .spawn(cancel.clone());

        tokio::time::sleep(TICK).await;
        cancel.cancel();

        assert_eq!(handle.await.unwrap(), HeartbeatExit::Cancelled);
        assert_eq!(participant.calls(), 0);
    }

    #[tokio::test]
    async fn test_control_signal_is_published() {
        let participant =
            Heartbeat::new(|_| Err(ParticipantError::Kill("stop the load".to_string())));
        let feed = SessionFeed::new(8);
        let mut rx = feed.subscribe();
        let session_id = Uuid::new_v4();

        heartbeat(
            vec![registered("a", participant)],
            attached(Arc::new(RecordingHandler::default())),
        )
        .with_feed(feed, session_id)
        .run(CancellationToken::new())
        .await;

        match rx.recv().await.unwrap() {
            SessionEvent::ControlSignal {
                session_id: id,
                signal,
                message,
            } => {
                assert_eq!(id, session_id);
                assert_eq!(signal, "kill");
                assert!(message.contains("stop the load"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
