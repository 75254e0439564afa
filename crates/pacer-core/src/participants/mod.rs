//! Built-in participants

mod logging;

pub use logging::LoggingParticipant;
