//! Scheduler configuration
//!
//! [`SchedulerConfig`] is the deserializable, user-facing shape. It is turned
//! into an immutable [`SchedulerContext`] once, before any session is built.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::broadcaster::BroadcasterKind;
use crate::error::{Error, Result};

/// Factory identifier used when a participant config names none.
pub const FACTORY_NOT_SET: &str = "factory.not.set";

/// Top-level scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Verbose participant logging
    #[serde(default)]
    pub debug_enabled: bool,
    /// Raise check failures as errors; when false they are only logged
    #[serde(default = "default_true")]
    pub scheduler_enabled: bool,
    /// Fail the run when the scheduler itself errors
    #[serde(default = "default_true")]
    pub fail_on_error: bool,
    /// Keep running the remaining checks after one failed
    #[serde(default = "default_true")]
    pub continue_on_event_check_failure: bool,
    /// Seconds between keep-alive rounds
    #[serde(default = "default_keep_alive_interval_secs")]
    pub keep_alive_interval_secs: u64,
    /// How rounds are fanned out
    #[serde(default)]
    pub broadcaster: BroadcasterKind,
    /// Custom event schedule lines
    #[serde(default)]
    pub schedule_script: Option<String>,
    /// Run-wide test metadata
    #[serde(default)]
    pub test: TestConfig,
    /// One entry per participant
    #[serde(default)]
    pub events: Vec<EventConfig>,
}

fn default_true() -> bool {
    true
}

fn default_keep_alive_interval_secs() -> u64 {
    30
}

/// Longest accepted keep-alive interval, one day.
pub const MAX_KEEP_ALIVE_INTERVAL_SECS: u64 = 86_400;

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debug_enabled: false,
            scheduler_enabled: true,
            fail_on_error: true,
            continue_on_event_check_failure: true,
            keep_alive_interval_secs: default_keep_alive_interval_secs(),
            broadcaster: BroadcasterKind::default(),
            schedule_script: None,
            test: TestConfig::default(),
            events: Vec::new(),
        }
    }
}

/// Configuration of one participant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    /// Unique participant name
    #[serde(default = "default_event_name")]
    pub name: String,
    /// Factory identifier in the participant registry
    #[serde(default = "default_factory")]
    pub factory: String,
    /// Disabled participants are skipped at build time
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// The session waits for a ready signal from this participant
    #[serde(default)]
    pub ready_for_start: bool,
    /// Counts toward the stop quorum
    #[serde(default)]
    pub continue_on_keep_alive: bool,
    /// Extra custom event schedule lines contributed by this participant
    #[serde(default)]
    pub schedule_script: Option<String>,
    /// Participant-specific settings, passed to the factory untouched
    #[serde(default)]
    pub settings: serde_json::Value,
}

fn default_event_name() -> String {
    format!("anonymous-{}", chrono::Utc::now().timestamp_millis())
}

fn default_factory() -> String {
    FACTORY_NOT_SET.to_string()
}

impl EventConfig {
    /// Config for participant `name` built by `factory`.
    pub fn new(name: impl Into<String>, factory: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            factory: factory.into(),
            ..Self::default()
        }
    }
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            name: default_event_name(),
            factory: default_factory(),
            enabled: true,
            ready_for_start: false,
            continue_on_keep_alive: false,
            schedule_script: None,
            settings: serde_json::Value::Null,
        }
    }
}

/// Run-wide test metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    /// System under test
    pub system_under_test: String,
    /// Workload name
    pub workload: String,
    /// Environment the test runs in
    pub test_environment: String,
    /// Product name
    pub product_name: String,
    /// Dashboard name
    pub dashboard_name: String,
    /// Test run identifier
    pub test_run_id: String,
    /// Link to the CI build
    pub build_results_url: Option<String>,
    /// Version under test
    pub version: String,
    /// Free-text annotations
    pub annotations: String,
    /// Tags
    pub tags: Vec<String>,
    /// Rampup duration in seconds
    pub rampup_time_secs: u64,
    /// Constant load duration in seconds
    pub constant_load_time_secs: u64,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            system_under_test: "UNKNOWN_SYSTEM_UNDER_TEST".to_string(),
            workload: "UNKNOWN_WORKLOAD".to_string(),
            test_environment: "UNKNOWN_TEST_ENVIRONMENT".to_string(),
            product_name: "ANONYMOUS_PRODUCT".to_string(),
            dashboard_name: "ANONYMOUS_DASHBOARD".to_string(),
            test_run_id: "ANONYMOUS_TEST_ID".to_string(),
            build_results_url: None,
            version: "1.0.0-SNAPSHOT".to_string(),
            annotations: String::new(),
            tags: Vec::new(),
            rampup_time_secs: 30,
            constant_load_time_secs: 570,
        }
    }
}

impl TestConfig {
    /// Validate and freeze into a [`TestContext`].
    pub fn to_context(&self) -> Result<TestContext> {
        if self.test_run_id.trim().is_empty() {
            return Err(Error::InvalidConfig {
                field: "test.test_run_id".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        Ok(TestContext {
            system_under_test: self.system_under_test.clone(),
            workload: self.workload.clone(),
            test_environment: self.test_environment.clone(),
            product_name: self.product_name.clone(),
            dashboard_name: self.dashboard_name.clone(),
            test_run_id: self.test_run_id.clone(),
            build_results_url: self.build_results_url.clone(),
            version: self.version.clone(),
            annotations: self.annotations.clone(),
            tags: self.tags.clone(),
            rampup_time: Duration::from_secs(self.rampup_time_secs),
            constant_load_time: Duration::from_secs(self.constant_load_time_secs),
        })
    }
}

impl SchedulerConfig {
    /// Validate and freeze into a [`SchedulerContext`].
    ///
    /// The top-level schedule script and the scripts of all participants,
    /// disabled ones included, are joined with empty lines removed.
    pub fn to_context(&self) -> Result<SchedulerContext> {
        if !(1..=MAX_KEEP_ALIVE_INTERVAL_SECS).contains(&self.keep_alive_interval_secs) {
            return Err(Error::InvalidConfig {
                field: "keep_alive_interval_secs".to_string(),
                message: format!(
                    "must be between 1 and {} seconds, got {}",
                    MAX_KEEP_ALIVE_INTERVAL_SECS, self.keep_alive_interval_secs
                ),
            });
        }

        let events = self
            .events
            .iter()
            .map(EventConfig::to_context)
            .collect::<Result<Vec<_>>>()?;

        let schedule_script = std::iter::once(self.schedule_script.as_deref())
            .chain(self.events.iter().map(|e| e.schedule_script.as_deref()))
            .flatten()
            .flat_map(str::lines)
            .filter(|line| !line.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        Ok(SchedulerContext {
            debug_enabled: self.debug_enabled,
            scheduler_enabled: self.scheduler_enabled,
            fail_on_error: self.fail_on_error,
            continue_on_event_check_failure: self.continue_on_event_check_failure,
            keep_alive_interval: Duration::from_secs(self.keep_alive_interval_secs),
            broadcaster: self.broadcaster,
            schedule_script,
            test: self.test.to_context()?,
            events,
        })
    }
}

impl EventConfig {
    /// Validate and freeze into an [`EventContext`].
    pub fn to_context(&self) -> Result<EventContext> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidConfig {
                field: "events.name".to_string(),
                message: format!("participant with factory '{}' has an empty name", self.factory),
            });
        }

        Ok(EventContext {
            name: self.name.clone(),
            factory: self.factory.clone(),
            enabled: self.enabled,
            ready_for_start: self.ready_for_start,
            continue_on_keep_alive: self.continue_on_keep_alive,
            settings: self.settings.clone(),
        })
    }
}

/// Immutable scheduler settings for one session
#[derive(Debug, Clone)]
pub struct SchedulerContext {
    /// Verbose participant logging
    pub debug_enabled: bool,
    /// Raise check failures as errors
    pub scheduler_enabled: bool,
    /// Fail the run when the scheduler itself errors
    pub fail_on_error: bool,
    /// Keep running the remaining checks after one failed
    pub continue_on_event_check_failure: bool,
    /// Time between keep-alive rounds
    pub keep_alive_interval: Duration,
    /// How rounds are fanned out
    pub broadcaster: BroadcasterKind,
    /// Combined custom event schedule
    pub schedule_script: String,
    /// Run-wide test metadata
    pub test: TestContext,
    /// Participants in configuration order
    pub events: Vec<EventContext>,
}

impl Default for SchedulerContext {
    fn default() -> Self {
        Self {
            debug_enabled: false,
            scheduler_enabled: true,
            fail_on_error: true,
            continue_on_event_check_failure: true,
            keep_alive_interval: Duration::from_secs(default_keep_alive_interval_secs()),
            broadcaster: BroadcasterKind::default(),
            schedule_script: String::new(),
            test: TestContext::default(),
            events: Vec::new(),
        }
    }
}

/// Immutable settings for one participant
#[derive(Debug, Clone)]
pub struct EventContext {
    /// Unique participant name
    pub name: String,
    /// Factory identifier
    pub factory: String,
    /// Whether the participant takes part in the run
    pub enabled: bool,
    /// Waits for a ready signal from this participant
    pub ready_for_start: bool,
    /// Counts toward the stop quorum
    pub continue_on_keep_alive: bool,
    /// Participant-specific settings
    pub settings: serde_json::Value,
}

impl EventContext {
    /// Look up a string setting.
    #[must_use]
    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(serde_json::Value::as_str)
    }
}

/// Immutable run-wide test metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestContext {
    /// System under test
    pub system_under_test: String,
    /// Workload name
    pub workload: String,
    /// Environment the test runs in
    pub test_environment: String,
    /// Product name
    pub product_name: String,
    /// Dashboard name
    pub dashboard_name: String,
    /// Test run identifier
    pub test_run_id: String,
    /// Link to the CI build
    pub build_results_url: Option<String>,
    /// Version under test
    pub version: String,
    /// Free-text annotations
    pub annotations: String,
    /// Tags
    pub tags: Vec<String>,
    /// Rampup duration
    pub rampup_time: Duration,
    /// Constant load duration
    pub constant_load_time: Duration,
}

impl TestContext {
    /// Rampup plus constant load.
    #[must_use]
    pub fn total_duration(&self) -> Duration {
        self.rampup_time + self.constant_load_time
    }
}

impl Default for TestContext {
    fn default() -> Self {
        let defaults = TestConfig::default();
        Self {
            system_under_test: defaults.system_under_test,
            workload: defaults.workload,
            test_environment: defaults.test_environment,
            product_name: defaults.product_name,
            dashboard_name: defaults.dashboard_name,
            test_run_id: defaults.test_run_id,
            build_results_url: defaults.build_results_url,
            version: defaults.version,
            annotations: defaults.annotations,
            tags: defaults.tags,
            rampup_time: Duration::from_secs(defaults.rampup_time_secs),
            constant_load_time: Duration::from_secs(defaults.constant_load_time_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let context = SchedulerConfig::default().to_context().unwrap();
        assert_eq!(context.keep_alive_interval, Duration::from_secs(30));
        assert!(context.scheduler_enabled);
        assert!(context.fail_on_error);
        assert!(context.continue_on_event_check_failure);
        assert!(!context.debug_enabled);
        assert_eq!(context.broadcaster, BroadcasterKind::Concurrent);
        assert_eq!(context.test.test_run_id, "ANONYMOUS_TEST_ID");
        assert_eq!(context.test.workload, "UNKNOWN_WORKLOAD");
        assert_eq!(context.test.version, "1.0.0-SNAPSHOT");
        assert_eq!(context.test.total_duration(), Duration::from_secs(600));
        assert_eq!(context.test, TestContext::default());
    }

    #[test]
    fn test_event_defaults_from_json() {
        let config: EventConfig = serde_json::from_str("{}").unwrap();
        assert!(config.name.starts_with("anonymous-"));
        assert_eq!(config.factory, FACTORY_NOT_SET);
        assert!(config.enabled);
        assert!(!config.ready_for_start);
        assert!(!config.continue_on_keep_alive);
        assert!(config.settings.is_null());
    }

    #[test]
    fn test_deserialize_full_config() {
        let json = r#"{
            "keep_alive_interval_secs": 5,
            "broadcaster": "sequential",
            "schedule_script": "PT1S|restart\n\nPT2S|scale-up",
            "test": { "test_run_id": "run-7", "tags": ["nightly"] },
            "events": [
                { "name": "wiremock", "factory": "default", "ready_for_start": true,
                  "settings": { "url": "http://localhost:8080" } },
                { "name": "jfr", "factory": "default", "enabled": false,
                  "schedule_script": "PT3S|heapdump" }
            ]
        }"#;
        let config: SchedulerConfig = serde_json::from_str(json).unwrap();
        let context = config.to_context().unwrap();

        assert_eq!(context.keep_alive_interval, Duration::from_secs(5));
        assert_eq!(context.broadcaster, BroadcasterKind::Sequential);
        assert_eq!(context.test.test_run_id, "run-7");
        assert_eq!(context.test.tags, vec!["nightly"]);
        assert_eq!(context.test.rampup_time, Duration::from_secs(30));
        assert_eq!(context.events.len(), 2);
        assert!(context.events[0].ready_for_start);
        assert_eq!(
            context.events[0].setting_str("url"),
            Some("http://localhost:8080")
        );
        assert!(!context.events[1].enabled);
        assert_eq!(
            context.schedule_script,
            "PT1S|restart\nPT2S|scale-up\nPT3S|heapdump"
        );
    }

    #[test]
    fn test_zero_keep_alive_is_rejected() {
        let config = SchedulerConfig {
            keep_alive_interval_secs: 0,
            ..SchedulerConfig::default()
        };
        let err = config.to_context().unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidConfig { ref field, .. } if field == "keep_alive_interval_secs"
        ));
    }

    #[test]
    fn test_out_of_range_keep_alive_is_rejected() {
        let config = SchedulerConfig {
            keep_alive_interval_secs: u64::MAX,
            ..SchedulerConfig::default()
        };
        let err = config.to_context().unwrap_err();
        assert!(err.to_string().contains("between 1 and 86400"));

        let config = SchedulerConfig {
            keep_alive_interval_secs: MAX_KEEP_ALIVE_INTERVAL_SECS,
            ..SchedulerConfig::default()
        };
        assert!(config.to_context().is_ok());
    }

    #[test]
    fn test_empty_test_run_id_is_rejected() {
        let mut config = SchedulerConfig::default();
        config.test.test_run_id = "  ".to_string();
        assert!(matches!(
            config.to_context(),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_empty_event_name_is_rejected() {
        let mut config = SchedulerConfig::default();
        config.events.push(EventConfig::new("", "default"));
        assert!(config.to_context().is_err());
    }
}
