//! `pacer schedule`

use std::path::Path;

use anyhow::{Context, Result};
use pacer_core::{format_error_for_cli, parse_schedule, schedule::format_iso8601};

/// Parse `file` and print one line per entry.
pub fn run(file: &Path) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read schedule file {}", file.display()))?;
    let entries = parse_schedule(&text).map_err(|e| anyhow::anyhow!(format_error_for_cli(&e)))?;

    if entries.is_empty() {
        println!("No custom events in {}", file.display());
        return Ok(());
    }

    println!("{} custom event(s) in {}:", entries.len(), file.display());
    for (i, entry) in entries.iter().enumerate() {
        println!(
            "  {:>3}. {:<10} {}{}",
            i + 1,
            format_iso8601(entry.offset()),
            entry.name(),
            entry
                .description()
                .map(|d| format!(" ({})", d))
                .unwrap_or_default()
        );
        if let Some(settings) = entry.settings() {
            println!("       settings: {}", settings);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_valid_schedule() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "@generator=manual").unwrap();
        writeln!(file, "PT1S|restart(rolling)|{{}}").unwrap();
        assert!(run(file.path()).is_ok());
    }

    #[test]
    fn test_invalid_schedule() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "soon|restart").unwrap();
        let err = run(file.path()).unwrap_err();
        assert!(err.to_string().contains("soon|restart"));
    }

    #[test]
    fn test_missing_file() {
        assert!(run(Path::new("/nonexistent/schedule.txt")).is_err());
    }
}
