use crate::error::{Error, Result};

use super::duration::parse_iso8601;
use super::entry::CustomEventEntry;

/// Lines starting with this marker carry generator meta properties and are skipped.
pub const META_PREFIX: char = '@';

/// Parse schedule text into entries, in file order.
///
/// Each line looks like `PT3M15S|heapdump(first heapdump)|{"server": "a"}`.
/// Blank lines and meta lines are skipped; any other malformed line fails the
/// whole parse.
pub fn parse_schedule(text: &str) -> Result<Vec<CustomEventEntry>> {
    text.lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with(META_PREFIX))
        .map(|(line_number, line)| parse_line(line_number, line))
        .collect()
}

/// Parse a single schedule line.
pub fn parse_line(line_number: usize, line: &str) -> Result<CustomEventEntry> {
    let parse_error = |reason: String| Error::ScheduleParse {
        line_number,
        line: line.trim().to_string(),
        reason,
    };

    let mut parts = line.splitn(3, '|');
    let duration = parts.next().unwrap_or_default().trim();
    let offset = parse_iso8601(duration).map_err(parse_error)?;

    let name_part = parts
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| parse_error("missing event name".to_string()))?;

    let (name, description) = split_name_and_description(name_part);
    if name.is_empty() {
        return Err(parse_error("missing event name".to_string()));
    }

    let mut entry = CustomEventEntry::new(offset, name);
    if let Some(description) = description {
        entry = entry.with_description(description);
    }
    if let Some(settings) = parts.next().map(str::trim).filter(|s| !s.is_empty()) {
        entry = entry.with_settings(settings);
    }
    Ok(entry)
}

// "restart(rolling restart)" -> ("restart", Some("rolling restart"))
fn split_name_and_description(text: &str) -> (&str, Option<&str>) {
    match text.find('(') {
        Some(open) => {
            let name = text[..open].trim();
            let rest = &text[open + 1..];
            let description = match rest.rfind(')') {
                Some(close) => &rest[..close],
                None => rest,
            }
            .trim();
            (name, Some(description).filter(|d| !d.is_empty()))
        }
        None => (text, None),
    }
}
