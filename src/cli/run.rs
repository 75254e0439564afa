//! `pacer run`
//!
//! Drives one session from start to result check. The run ends after rampup
//! plus constant load, on a control signal from the heartbeat, or on Ctrl+C.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use pacer_core::{
    format_error_for_cli, EventConfig, ExceptionHandler, ParticipantRegistry, Session,
    DEFAULT_FACTORY,
};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::loader::load_config;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Why the run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Rampup and constant load elapsed
    Completed,
    /// A participant pulled the kill switch
    Killed(String),
    /// The stop quorum was reached
    Stopped(String),
    /// A participant requested an abort
    Aborted(String),
    /// Ctrl+C
    Interrupted,
}

impl RunOutcome {
    /// Whether results should be discarded
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted(_) | Self::Interrupted)
    }
}

/// Exception handler that forwards control signals to the run loop.
struct ChannelKillSwitch {
    tx: mpsc::UnboundedSender<RunOutcome>,
}

impl ChannelKillSwitch {
    fn forward(&self, outcome: RunOutcome) {
        if self.tx.send(outcome).is_err() {
            warn!("run loop already finished, control signal dropped");
        }
    }
}

impl ExceptionHandler for ChannelKillSwitch {
    fn kill(&self, message: &str) {
        self.forward(RunOutcome::Killed(message.to_string()));
    }

    fn abort(&self, message: &str) {
        self.forward(RunOutcome::Aborted(message.to_string()));
    }

    fn stop(&self, message: &str) {
        self.forward(RunOutcome::Stopped(message.to_string()));
    }
}

fn cli_error(error: pacer_core::Error) -> anyhow::Error {
    anyhow::anyhow!(format_error_for_cli(&error))
}

/// Run a full session.
pub async fn run(config_path: Option<&Path>, schedule_path: Option<&Path>) -> Result<()> {
    let mut config = load_config(config_path)?;
    if config.events.is_empty() {
        info!("no participants configured, adding the default logging participant");
        config.events.push(EventConfig::new("logger", DEFAULT_FACTORY));
    }
    let fail_on_error = config.fail_on_error;
    let context = config.to_context().map_err(cli_error)?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut builder = Session::builder(context)
        .registry(ParticipantRegistry::with_builtins())
        .exception_handler(Arc::new(ChannelKillSwitch { tx }));

    if let Some(path) = schedule_path {
        let schedule = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read schedule file {}", path.display()))?;
        builder = builder.custom_events(schedule);
    }

    let session = builder.build().map_err(cli_error)?;
    info!(
        session_id = %session.id(),
        test_run_id = %session.context().test.test_run_id,
        participants = ?session.participant_names(),
        custom_events = session.custom_events().len(),
        "session ready"
    );

    if let Err(e) = session.start_session().await {
        if fail_on_error {
            session.abort_session().await;
            return Err(cli_error(e));
        }
        warn!(error = %e, "start session failed, continuing because fail_on_error is off");
    }

    let duration = session.context().test.total_duration();
    info!(duration_secs = duration.as_secs(), "test running");

    let outcome = tokio::select! {
        _ = tokio::time::sleep(duration) => RunOutcome::Completed,
        Some(outcome) = rx.recv() => outcome,
        _ = tokio::signal::ctrl_c() => RunOutcome::Interrupted,
    };
    info!(outcome = ?outcome, "test run finished");

    if outcome.is_abort() {
        session.abort_session().await;
    } else {
        session.stop_session().await;
    }
    session.shutdown(SHUTDOWN_TIMEOUT).await;

    if outcome.is_abort() {
        anyhow::bail!("test run aborted ({:?}), results discarded", outcome);
    }

    match session.check_results().await {
        Ok(checks) => {
            for check in &checks {
                info!(
                    participant = %check.participant_name,
                    status = %check.status,
                    message = %check.message,
                    "event check"
                );
            }
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "event checks failed");
            Err(cli_error(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_abort_classification() {
        assert!(RunOutcome::Aborted("x".to_string()).is_abort());
        assert!(RunOutcome::Interrupted.is_abort());
        assert!(!RunOutcome::Killed("x".to_string()).is_abort());
        assert!(!RunOutcome::Stopped("x".to_string()).is_abort());
        assert!(!RunOutcome::Completed.is_abort());
    }

    #[test]
    fn test_kill_switch_forwards_signals() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let switch = ChannelKillSwitch { tx };

        switch.kill("slow");
        switch.stop("quorum");
        switch.abort("broken");

        tokio_test::block_on(async {
            assert_eq!(rx.recv().await, Some(RunOutcome::Killed("slow".to_string())));
            assert_eq!(rx.recv().await, Some(RunOutcome::Stopped("quorum".to_string())));
            assert_eq!(rx.recv().await, Some(RunOutcome::Aborted("broken".to_string())));
        });
    }

    #[tokio::test]
    async fn test_short_run_completes() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"
keep_alive_interval_secs = 1

[test]
rampup_time_secs = 0
constant_load_time_secs = 1
"#,
        )
        .unwrap();

        run(Some(file.path()), None).await.unwrap();
    }
}
