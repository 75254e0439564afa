//! Error types for pacer-core
//!
//! Build-time errors are fatal and returned before any session exists.
//! Run-time participant failures never surface here except through the
//! keep-alive control path and `check_results`.

use thiserror::Error;

use crate::bus::MessageBusError;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// Two enabled participants share a name
    #[error("participant name is not unique: {0}")]
    DuplicateParticipant(String),

    /// No factory registered under the requested identifier
    #[error("no participant factory registered for '{factory}' (participant '{participant}')")]
    UnknownFactory {
        /// Factory identifier from the participant config
        factory: String,
        /// Participant that asked for it
        participant: String,
    },

    /// A factory was found but failed to construct its participant
    #[error("failed to construct participant '{participant}': {source}")]
    ParticipantConstruction {
        /// Participant name
        participant: String,
        /// Underlying factory error
        #[source]
        source: anyhow::Error,
    },

    /// Invalid configuration
    #[error("invalid configuration: {field}: {message}")]
    InvalidConfig {
        /// Config field name
        field: String,
        /// Detailed message
        message: String,
    },

    /// A custom-event schedule line could not be parsed
    #[error("unable to parse custom event line {line_number} '{line}': {reason}")]
    ScheduleParse {
        /// 1-based line number in the schedule text
        line_number: usize,
        /// The offending line, trimmed
        line: String,
        /// What was wrong with it
        reason: String,
    },

    /// One or more participants reported a failed check
    #[error("{0}")]
    CheckFailed(String),

    /// More stop votes in one keep-alive round than registered quorum participants
    #[error("received {votes} stop votes in one keep-alive round, but only {quorum} participants are registered to continue on keep-alive")]
    QuorumExceeded {
        /// Stop votes counted in the round
        votes: usize,
        /// Registered quorum
        quorum: usize,
    },

    /// A control signal fired before any exception handler was attached
    #[error("control signal '{0}' raised but no exception handler is attached")]
    NoExceptionHandler(String),

    /// A message bus receiver failed
    #[error(transparent)]
    MessageBus(#[from] MessageBusError),

    /// The session was built outside of a tokio runtime
    #[error("a session must be built from within a tokio runtime")]
    NoRuntime,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error is raised while building a session.
    #[must_use]
    pub fn is_build_error(&self) -> bool {
        matches!(
            self,
            Error::DuplicateParticipant(_)
                | Error::UnknownFactory { .. }
                | Error::ParticipantConstruction { .. }
                | Error::InvalidConfig { .. }
                | Error::ScheduleParse { .. }
                | Error::NoRuntime
        )
    }

    /// A hint for how to fix the error, if one applies.
    #[must_use]
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Error::DuplicateParticipant(name) => Some(format!(
                "Rename one of the participants called '{}' in the configuration.",
                name
            )),
            Error::UnknownFactory { factory, .. } => Some(format!(
                "Register a factory named '{}' in the participant registry, or fix the 'factory' setting.",
                factory
            )),
            Error::InvalidConfig { field, .. } => {
                Some(format!("Check the '{}' setting in the configuration file.", field))
            }
            Error::ScheduleParse { .. } => Some(
                "Schedule lines look like 'PT1M30S|name(description)|settings'.".to_string(),
            ),
            Error::QuorumExceeded { .. } => Some(
                "Mark every participant that can vote to stop with 'continue_on_keep_alive = true'."
                    .to_string(),
            ),
            Error::NoExceptionHandler(_) => {
                Some("Attach a kill switch before starting the session.".to_string())
            }
            _ => None,
        }
    }
}

/// Format an error for display in the CLI
pub fn format_error_for_cli(error: &Error) -> String {
    let mut output = error.to_string();

    if let Some(suggestion) = error.suggestion() {
        output.push_str("\n\n");
        output.push_str(&suggestion);
    }

    output.push('\n');
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_factory_message() {
        let error = Error::UnknownFactory {
            factory: "jfr".to_string(),
            participant: "profiler".to_string(),
        };

        let msg = error.to_string();
        assert!(msg.contains("jfr"));
        assert!(msg.contains("profiler"));
        assert!(error.is_build_error());
        assert!(error.suggestion().unwrap().contains("jfr"));
    }

    #[test]
    fn test_quorum_exceeded_message() {
        let error = Error::QuorumExceeded { votes: 3, quorum: 2 };
        let msg = error.to_string();
        assert!(msg.contains("3 stop votes"));
        assert!(msg.contains("only 2"));
        assert!(!error.is_build_error());
    }

    #[test]
    fn test_schedule_parse_names_line() {
        let error = Error::ScheduleParse {
            line_number: 2,
            line: "P1X|bad".to_string(),
            reason: "invalid duration".to_string(),
        };
        assert!(error.to_string().contains("P1X|bad"));
        assert!(error.to_string().contains("line 2"));
    }

    #[test]
    fn test_format_error_for_cli() {
        let error = Error::DuplicateParticipant("wiremock".to_string());

        let output = format_error_for_cli(&error);
        assert!(output.contains("not unique: wiremock"));
        assert!(output.contains("Rename"));
    }

    #[test]
    fn test_format_without_suggestion() {
        let error = Error::CheckFailed("event checks with failures found: []".to_string());
        let output = format_error_for_cli(&error);
        assert_eq!(output, "event checks with failures found: []\n");
    }
}
