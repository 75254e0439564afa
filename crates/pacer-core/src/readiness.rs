//! Readiness barrier
//!
//! Counts ready signals arriving on the message bus and releases the start
//! routine once the configured number has been reached.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::info;
use uuid::Uuid;

use crate::bus::{Message, MessageReceiver};
use crate::feed::{SessionEvent, SessionFeed};

/// Callback run when the barrier opens.
pub type ReleaseFn = Box<dyn Fn() + Send + Sync>;

/// Gate that opens after `threshold` ready signals.
///
/// Signals are not deduplicated by sender: the same participant sending the
/// ready token twice counts twice.
pub struct ReadinessBarrier {
    threshold: usize,
    count: AtomicUsize,
    on_release: ReleaseFn,
    feed: Option<(SessionFeed, Uuid)>,
}

impl ReadinessBarrier {
    /// Create a barrier that calls `on_release` once `threshold` signals arrived.
    pub fn new(threshold: usize, on_release: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            threshold,
            count: AtomicUsize::new(0),
            on_release: Box::new(on_release),
            feed: None,
        }
    }

    /// Publish every counted signal on `feed`.
    pub fn with_feed(mut self, feed: SessionFeed, session_id: Uuid) -> Self {
        self.feed = Some((feed, session_id));
        self
    }

    /// Signals needed
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Signals counted so far
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Whether the barrier has opened
    pub fn is_released(&self) -> bool {
        self.count() >= self.threshold
    }
}

impl MessageReceiver for ReadinessBarrier {
    fn receive(&self, message: &Message) -> anyhow::Result<()> {
        if !message.is_ready_signal() {
            return Ok(());
        }

        let count = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            sender = %message.sender_id(),
            count,
            threshold = self.threshold,
            "ready signal counted"
        );

        if let Some((feed, session_id)) = &self.feed {
            feed.publish(SessionEvent::ReadySignal {
                session_id: *session_id,
                sender: message.sender_id().to_string(),
                count,
                threshold: self.threshold,
            });
        }

        // only the signal that lands exactly on the threshold releases
        if count == self.threshold {
            info!(threshold = self.threshold, "all ready signals received, releasing start");
            (self.on_release)();
        }
        Ok(())
    }
}

impl fmt::Debug for ReadinessBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadinessBarrier")
            .field("threshold", &self.threshold)
            .field("count", &self.count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MessageBus;
    use std::sync::Arc;

    fn counting_barrier(threshold: usize) -> (Arc<ReadinessBarrier>, Arc<AtomicUsize>) {
        let releases = Arc::new(AtomicUsize::new(0));
        let counter = releases.clone();
        let barrier = ReadinessBarrier::new(threshold, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (Arc::new(barrier), releases)
    }

    #[test]
    fn test_releases_exactly_at_threshold() {
        let (barrier, releases) = counting_barrier(3);
        let bus = MessageBus::new();
        bus.add_shared_receiver(barrier.clone());

        bus.send(&Message::ready("a")).unwrap();
        bus.send(&Message::ready("b")).unwrap();
        assert_eq!(releases.load(Ordering::SeqCst), 0);
        assert!(!barrier.is_released());

        bus.send(&Message::ready("c")).unwrap();
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(barrier.is_released());

        bus.send(&Message::ready("d")).unwrap();
        bus.send(&Message::ready("e")).unwrap();
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(barrier.count(), 5);
    }

    #[test]
    fn test_ignores_other_messages() {
        let (barrier, releases) = counting_barrier(1);

        barrier.receive(&Message::new("a", "not ready")).unwrap();
        barrier.receive(&Message::new("a", "go")).unwrap();
        assert_eq!(barrier.count(), 0);

        barrier.receive(&Message::new("a", "Go!")).unwrap();
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    // Repeated signals from one sender inflate the count; there is no
    // one-vote-per-participant rule.
    #[test]
    fn test_same_sender_counts_every_signal() {
        let (barrier, releases) = counting_barrier(2);

        barrier.receive(&Message::ready("impatient")).unwrap();
        barrier.receive(&Message::ready("impatient")).unwrap();

        assert_eq!(barrier.count(), 2);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_signals_release_once() {
        let (barrier, releases) = counting_barrier(8);

        let threads = (0..16)
            .map(|i| {
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier
                        .receive(&Message::ready(format!("p{}", i)))
                        .unwrap();
                })
            })
            .collect::<Vec<_>>();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(barrier.count(), 16);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_publishes_ready_events() {
        let feed = SessionFeed::new(8);
        let mut rx = feed.subscribe();
        let session_id = Uuid::new_v4();
        let barrier = ReadinessBarrier::new(2, || {}).with_feed(feed, session_id);

        barrier.receive(&Message::ready("wiremock")).unwrap();

        match rx.recv().await.unwrap() {
            SessionEvent::ReadySignal {
                sender,
                count,
                threshold,
                ..
            } => {
                assert_eq!(sender, "wiremock");
                assert_eq!(count, 1);
                assert_eq!(threshold, 2);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
