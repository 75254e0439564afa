use crate::bus::Message;
use crate::config::SchedulerContext;
use crate::schedule::format_iso8601;

/// Sender id and tag of messages published by the session itself.
pub const SCHEDULER_SENDER_ID: &str = "event-scheduler";

/// Separator of multi-valued test configuration entries.
pub const VALUE_LIST_DELIMITER: &str = "\n";

/// Test configuration published on the bus when a session starts.
///
/// `participant_names` are sorted before being joined into `testEvents`;
/// `schedule_script` is the schedule actually running.
pub fn test_config_message<'a>(
    context: &SchedulerContext,
    schedule_script: &str,
    participant_names: impl IntoIterator<Item = &'a str>,
) -> Message {
    let test = &context.test;

    let mut names: Vec<&str> = participant_names.into_iter().collect();
    names.sort_unstable();

    let pairs = [
        ("testContext.testRunId", test.test_run_id.clone()),
        ("testContext.testEnvironment", test.test_environment.clone()),
        ("testContext.annotations", test.annotations.clone()),
        ("testContext.rampupTime", format_iso8601(test.rampup_time)),
        ("testContext.constantLoadTime", format_iso8601(test.constant_load_time)),
        ("testContext.workload", test.workload.clone()),
        ("testContext.productName", test.product_name.clone()),
        ("testContext.version", test.version.clone()),
        ("testContext.dashboardName", test.dashboard_name.clone()),
        (
            "testContext.buildResultsUrl",
            test.build_results_url.clone().unwrap_or_default(),
        ),
        ("testContext.tags", test.tags.join(VALUE_LIST_DELIMITER)),
        ("testEvents", names.join(VALUE_LIST_DELIMITER)),
        ("scheduleScript", schedule_script.to_string()),
    ];

    Message::test_run_config(SCHEDULER_SENDER_ID, pairs, SCHEDULER_SENDER_ID)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SchedulerConfig, TestConfig};

    #[test]
    fn test_message_contents() {
        let config = SchedulerConfig {
            schedule_script: Some("PT1S|restart".to_string()),
            test: TestConfig {
                test_run_id: "run-42".to_string(),
                tags: vec!["a".to_string(), "b".to_string()],
                ..TestConfig::default()
            },
            ..SchedulerConfig::default()
        };
        let context = config.to_context().unwrap();

        let message = test_config_message(&context, &context.schedule_script, ["zeta", "alpha"]);
        assert_eq!(message.sender_id(), SCHEDULER_SENDER_ID);
        assert!(message.is_test_run_config());
        assert_eq!(message.variable("tags"), Some(SCHEDULER_SENDER_ID));

        let values = message.key_values();
        let get = |key: &str| {
            values
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("testContext.testRunId"), Some("run-42"));
        assert_eq!(get("testContext.rampupTime"), Some("PT30S"));
        assert_eq!(get("testContext.constantLoadTime"), Some("PT9M30S"));
        assert_eq!(get("testContext.buildResultsUrl"), Some(""));
        assert_eq!(get("testContext.tags"), Some("a\nb"));
        assert_eq!(get("testEvents"), Some("alpha\nzeta"));
        assert_eq!(get("scheduleScript"), Some("PT1S|restart"));
        assert_eq!(values.len(), 13);
    }
}
