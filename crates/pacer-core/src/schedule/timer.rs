use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::entry::CustomEventEntry;
use crate::broadcaster::Broadcaster;
use crate::feed::{SessionEvent, SessionFeed};

/// Fires custom events at their offsets from the moment they are scheduled.
///
/// Every entry gets its own one-shot timer task, so a slow custom event never
/// delays the next one. Cancellation stops timers that have not fired yet;
/// a broadcast that already started runs to completion.
pub struct CustomEventScheduler {
    entries: Arc<[CustomEventEntry]>,
    broadcaster: Arc<dyn Broadcaster>,
    feed: SessionFeed,
    session_id: Uuid,
}

impl CustomEventScheduler {
    /// Create a scheduler for `entries`.
    pub fn new(entries: Arc<[CustomEventEntry]>, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self {
            entries,
            broadcaster,
            feed: SessionFeed::default(),
            session_id: Uuid::nil(),
        }
    }

    /// Publish fired events on `feed`.
    pub fn with_feed(mut self, feed: SessionFeed, session_id: Uuid) -> Self {
        self.feed = feed;
        self.session_id = session_id;
        self
    }

    /// Spawn one timer per entry, all relative to now.
    pub fn schedule(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let start = Instant::now();
        info!(events = self.entries.len(), "scheduling custom events");

        self.entries
            .iter()
            .cloned()
            .map(|entry| {
                let cancel = cancel.clone();
                let broadcaster = Arc::clone(&self.broadcaster);
                let feed = self.feed.clone();
                let session_id = self.session_id;

                tokio::spawn(async move {
                    let Some(deadline) = start.checked_add(entry.offset()) else {
                        warn!(
                            event = %entry.name(),
                            offset_secs = entry.offset().as_secs(),
                            "custom event offset is beyond the timer range, it never fires"
                        );
                        return;
                    };

                    tokio::select! {
                        _ = cancel.cancelled() => {
                            debug!(event = %entry.name(), "custom event cancelled before firing");
                            return;
                        }
                        _ = sleep_until(deadline) => {}
                    }

                    feed.publish(SessionEvent::CustomEventFired {
                        session_id,
                        name: entry.name().to_string(),
                        offset_ms: entry.offset().as_millis() as u64,
                    });
                    broadcaster.custom_event(&entry).await;
                })
            })
            .collect()
    }
}
