//! Participant registry
//!
//! Explicit name to factory table, filled once at startup and resolved fully
//! while a session is built.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::bus::MessageBus;
use crate::config::{EventContext, TestContext};
use crate::error::{Error, Result};
use crate::participant::{Participant, RegisteredParticipant};
use crate::participants::LoggingParticipant;

/// Identifier of the built-in [`LoggingParticipant`] factory.
pub const DEFAULT_FACTORY: &str = "default";

/// Builds a participant from its config, the run-wide test context and the
/// session's message bus.
pub type ParticipantFactory = Arc<
    dyn Fn(&EventContext, &TestContext, MessageBus) -> anyhow::Result<Arc<dyn Participant>>
        + Send
        + Sync,
>;

/// Name to factory table
#[derive(Clone, Default)]
pub struct ParticipantRegistry {
    factories: HashMap<String, ParticipantFactory>,
}

impl ParticipantRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in factories.
    #[must_use]
    pub fn with_builtins() -> Self {
        Self::new().with_factory(DEFAULT_FACTORY, |event, test, bus| {
            Ok(Arc::new(LoggingParticipant::new(event, test, bus)) as Arc<dyn Participant>)
        })
    }

    /// Register a factory, replacing any previous one with the same name.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&EventContext, &TestContext, MessageBus) -> anyhow::Result<Arc<dyn Participant>>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        debug!(factory = %name, "registering participant factory");
        self.factories.insert(name, Arc::new(factory));
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with_factory<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&EventContext, &TestContext, MessageBus) -> anyhow::Result<Arc<dyn Participant>>
            + Send
            + Sync
            + 'static,
    {
        self.register(name, factory);
        self
    }

    /// Whether a factory is registered under `name`
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered factory names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build the participant described by `event`.
    pub fn create(
        &self,
        event: &EventContext,
        test: &TestContext,
        bus: MessageBus,
    ) -> Result<RegisteredParticipant> {
        let factory = self
            .factories
            .get(&event.factory)
            .ok_or_else(|| Error::UnknownFactory {
                factory: event.factory.clone(),
                participant: event.name.clone(),
            })?;

        let participant =
            factory(event, test, bus).map_err(|source| Error::ParticipantConstruction {
                participant: event.name.clone(),
                source,
            })?;

        Ok(RegisteredParticipant::new(&event.name, &event.factory, participant)
            .with_ready_for_start(event.ready_for_start)
            .with_continue_on_keep_alive(event.continue_on_keep_alive))
    }
}

impl fmt::Debug for ParticipantRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParticipantRegistry")
            .field("factories", &self.names())
            .finish()
    }
}
