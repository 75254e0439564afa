use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::{Session, SessionInner};
use crate::broadcaster::BroadcasterKind;
use crate::bus::MessageBus;
use crate::config::SchedulerContext;
use crate::error::{Error, Result};
use crate::feed::SessionFeed;
use crate::keep_alive::{ExceptionHandler, HandlerSlot};
use crate::participant::RegisteredParticipant;
use crate::readiness::ReadinessBarrier;
use crate::registry::ParticipantRegistry;
use crate::schedule::{parse_schedule, CustomEventEntry};

/// Assembles a [`Session`] from an immutable [`SchedulerContext`].
///
/// `build` either returns a complete session or an error; nothing is started
/// and no participant is called while building.
pub struct SessionBuilder {
    context: SchedulerContext,
    registry: ParticipantRegistry,
    bus: Option<MessageBus>,
    handler: Option<Arc<dyn ExceptionHandler>>,
    broadcaster: Option<BroadcasterKind>,
    custom_events: Option<String>,
    participants: Vec<RegisteredParticipant>,
    feed_capacity: usize,
}

impl SessionBuilder {
    /// Start from `context` with the built-in participant registry.
    pub fn new(context: SchedulerContext) -> Self {
        Self {
            context,
            registry: ParticipantRegistry::with_builtins(),
            bus: None,
            handler: None,
            broadcaster: None,
            custom_events: None,
            participants: Vec::new(),
            feed_capacity: 256,
        }
    }

    /// Registry used to resolve participant factories
    pub fn registry(mut self, registry: ParticipantRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Share an existing message bus instead of creating one
    pub fn message_bus(mut self, bus: MessageBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Exception handler attached from the start
    pub fn exception_handler(mut self, handler: Arc<dyn ExceptionHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Override the broadcaster kind from the context
    pub fn broadcaster(mut self, kind: BroadcasterKind) -> Self {
        self.broadcaster = Some(kind);
        self
    }

    /// Override the custom event schedule from the context
    pub fn custom_events(mut self, schedule: impl Into<String>) -> Self {
        self.custom_events = Some(schedule.into());
        self
    }

    /// Add an already constructed participant after the configured ones
    pub fn participant(mut self, participant: RegisteredParticipant) -> Self {
        self.participants.push(participant);
        self
    }

    /// Capacity of the lifecycle event feed
    pub fn feed_capacity(mut self, capacity: usize) -> Self {
        self.feed_capacity = capacity.max(1);
        self
    }

    /// Validate everything and assemble the session.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<Session> {
        let Self {
            context,
            registry,
            bus,
            handler,
            broadcaster,
            custom_events,
            participants: extra,
            feed_capacity,
        } = self;

        let enabled: Vec<_> = context
            .events
            .iter()
            .filter(|event| {
                if !event.enabled {
                    info!(
                        participant = %event.name,
                        factory = %event.factory,
                        "participant disabled, skipping"
                    );
                }
                event.enabled
            })
            .collect();

        {
            let mut seen = HashSet::new();
            let names = enabled
                .iter()
                .map(|event| event.name.as_str())
                .chain(extra.iter().map(RegisteredParticipant::name));
            for name in names {
                if !seen.insert(name) {
                    return Err(Error::DuplicateParticipant(name.to_string()));
                }
            }
        }

        let schedule_script = custom_events.unwrap_or_else(|| context.schedule_script.clone());
        let custom_events: Arc<[CustomEventEntry]> = parse_schedule(&schedule_script)?.into();

        let bus = bus.unwrap_or_default();
        let mut participants = enabled
            .iter()
            .map(|event| registry.create(event, &context.test, bus.clone()))
            .collect::<Result<Vec<_>>>()?;
        participants.extend(extra);

        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;

        let kind = broadcaster.unwrap_or(context.broadcaster);
        let ready_threshold = participants.iter().filter(|p| p.is_ready_for_start()).count();
        let broadcaster = kind.create(participants);

        let handlers = HandlerSlot::new();
        if let Some(handler) = handler {
            handlers.replace(handler);
        } else {
            warn!("no exception handler attached yet, control signals will be dropped");
        }

        let feed = SessionFeed::new(feed_capacity);
        let id = Uuid::new_v4();

        info!(
            session_id = %id,
            participants = broadcaster.participants().len(),
            custom_events = custom_events.len(),
            ready_threshold,
            stop_quorum = broadcaster.stop_quorum(),
            broadcaster = ?kind,
            "session built"
        );

        let inner = Arc::new_cyclic(|weak| {
            let barrier = (ready_threshold > 0).then(|| {
                let weak = weak.clone();
                let barrier = Arc::new(
                    ReadinessBarrier::new(ready_threshold, move || {
                        SessionInner::release_from_barrier(&weak)
                    })
                    .with_feed(feed.clone(), id),
                );
                bus.add_shared_receiver(barrier.clone());
                barrier
            });

            SessionInner {
                id,
                context,
                broadcaster,
                bus,
                handlers,
                schedule_script,
                custom_events,
                barrier,
                feed,
                runtime,
                active: AtomicBool::new(false),
                routine_armed: AtomicBool::new(false),
                routine_started: AtomicBool::new(false),
                cancel: Mutex::new(CancellationToken::new()),
            }
        });

        Ok(Session { inner })
    }
}

impl fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("registry", &self.registry)
            .field("events", &self.context.events.len())
            .field("participants", &self.participants)
            .field("broadcaster", &self.broadcaster)
            .field("handler_attached", &self.handler.is_some())
            .finish_non_exhaustive()
    }
}
