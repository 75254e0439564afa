//! Configuration loading
//!
//! Handles loading configuration from embedded defaults, files, and environment.

use std::path::Path;

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use pacer_core::SchedulerConfig;

/// Embedded default configuration (compiled into binary)
pub const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Load configuration from files and environment.
///
/// Later sources win: embedded defaults, `config/local.toml`, the file given
/// on the command line, then `PACER_*` environment variables.
pub fn load_config(path: Option<&Path>) -> Result<SchedulerConfig> {
    let mut builder = Config::builder()
        // 1. Embedded defaults (always available)
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        // 2. Local overrides (optional)
        .add_source(File::with_name("config/local").required(false));

    // 3. Explicit file (must exist)
    if let Some(path) = path {
        builder = builder.add_source(File::from(path).required(true));
    }

    let config = builder
        // 4. Environment variables (highest priority), e.g. PACER_TEST__TEST_RUN_ID
        .add_source(
            Environment::with_prefix("PACER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    config
        .try_deserialize()
        .context("Failed to deserialize configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_embedded_defaults() {
        let config = load_config(None).unwrap();
        assert_eq!(config.keep_alive_interval_secs, 30);
        assert!(config.scheduler_enabled);
        assert_eq!(config.test.rampup_time_secs, 30);
        assert_eq!(config.test.constant_load_time_secs, 570);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file = write_config(
            r#"
keep_alive_interval_secs = 5
broadcaster = "sequential"
schedule_script = "PT1S|restart"

[test]
test_run_id = "nightly-42"

[[events]]
name = "wiremock"
factory = "default"
ready_for_start = true

[events.settings]
url = "http://localhost:8080"
"#,
        );

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.keep_alive_interval_secs, 5);
        assert_eq!(config.broadcaster, pacer_core::BroadcasterKind::Sequential);
        assert_eq!(config.test.test_run_id, "nightly-42");
        assert_eq!(config.test.workload, "UNKNOWN_WORKLOAD");
        assert_eq!(config.events.len(), 1);
        assert!(config.events[0].ready_for_start);
        assert_eq!(
            config.events[0].settings["url"],
            serde_json::json!("http://localhost:8080")
        );

        let context = config.to_context().unwrap();
        assert_eq!(context.schedule_script, "PT1S|restart");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = load_config(Some(Path::new("/nonexistent/pacer.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to build configuration"));
    }

    #[test]
    fn test_environment_overrides() {
        std::env::set_var("PACER_TEST__DASHBOARD_NAME", "from-env");
        let config = load_config(None).unwrap();
        std::env::remove_var("PACER_TEST__DASHBOARD_NAME");
        assert_eq!(config.test.dashboard_name, "from-env");
    }
}
