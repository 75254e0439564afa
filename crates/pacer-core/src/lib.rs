//! Pacer Core - Participant Lifecycle Orchestration
//!
//! This crate drives the plugins ("participants") of a load-test run through
//! their lifecycle, including:
//! - Broadcaster: fan-out of every lifecycle phase with failure isolation
//! - Session: start/stop/abort state machine and result checks
//! - Readiness: waiting for ready signals before the load starts
//! - Keep-alive: heartbeat rounds and the cooperative stop quorum
//! - Schedule: time-offset custom events
//! - Bus: synchronous message passing between participants

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod broadcaster;
pub mod bus;
pub mod config;
pub mod error;
pub mod feed;
pub mod keep_alive;
pub mod participant;
pub mod participants;
pub mod readiness;
pub mod registry;
pub mod schedule;
pub mod session;
pub mod shutdown;

pub use broadcaster::{
    Broadcaster, BroadcasterKind, ConcurrentBroadcaster, ControlSignal, ExceptionSignal,
    SequentialBroadcaster,
};
pub use bus::{Message, MessageBus, MessageBusError, MessageReceiver};
pub use config::{
    EventConfig, EventContext, SchedulerConfig, SchedulerContext, TestConfig, TestContext,
};
pub use error::{format_error_for_cli, Error, Result};
pub use feed::{SessionEvent, SessionFeed};
pub use keep_alive::{ExceptionHandler, HandlerSlot, HeartbeatExit, KeepAlive};
pub use participant::{
    CheckStatus, CheckVerdict, EventCheck, Participant, ParticipantError, ParticipantResult,
    RegisteredParticipant,
};
pub use participants::LoggingParticipant;
pub use readiness::ReadinessBarrier;
pub use registry::{ParticipantFactory, ParticipantRegistry, DEFAULT_FACTORY};
pub use schedule::{parse_schedule, CustomEventEntry, CustomEventScheduler};
pub use session::{Session, SessionBuilder};
pub use shutdown::RoundTracker;
