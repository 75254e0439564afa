use serde::Serialize;
use std::fmt;
use std::time::Duration;

use super::duration::format_iso8601;

/// One timed entry of the custom-event schedule.
///
/// Entries are immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomEventEntry {
    offset: Duration,
    name: String,
    description: Option<String>,
    settings: Option<String>,
}

impl CustomEventEntry {
    /// Create an entry firing `offset` after session start.
    pub fn new(offset: Duration, name: impl Into<String>) -> Self {
        Self {
            offset,
            name: name.into(),
            description: None,
            settings: None,
        }
    }

    /// Set the free-text description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the opaque settings payload
    pub fn with_settings(mut self, settings: impl Into<String>) -> Self {
        self.settings = Some(settings.into());
        self
    }

    /// Time since session start at which the event fires
    pub fn offset(&self) -> Duration {
        self.offset
    }

    /// Event name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Free-text description, if any
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Settings payload, passed to participants untouched
    pub fn settings(&self) -> Option<&str> {
        self.settings.as_deref()
    }
}

impl fmt::Display for CustomEventEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", format_iso8601(self.offset), self.name)?;
        if let Some(description) = &self.description {
            write!(f, "({})", description)?;
        }
        if let Some(settings) = &self.settings {
            write!(f, "|{}", settings)?;
        }
        Ok(())
    }
}
