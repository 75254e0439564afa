//! ISO-8601 duration strings (`PnDTnHnMn.nS`), the subset used for offsets.

use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

static DURATION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^P(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)(?:[.,](\d{1,9}))?S)?)?$")
        .expect("DURATION_REGEX is a compile-time constant")
});

/// Parse an ISO-8601 duration such as `PT3M15S` or `P1DT2H`.
///
/// Negative durations are rejected.
pub fn parse_iso8601(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    let caps = DURATION_REGEX
        .captures(text)
        .ok_or_else(|| format!("'{}' is not an ISO-8601 duration", text))?;

    if (1..=4).all(|i| caps.get(i).is_none()) || text.to_ascii_uppercase().ends_with('T') {
        return Err(format!("'{}' is not an ISO-8601 duration", text));
    }

    let number = |i: usize| -> Result<u64, String> {
        caps.get(i)
            .map(|m| m.as_str().parse::<u64>())
            .transpose()
            .map(|v| v.unwrap_or(0))
            .map_err(|e| format!("'{}': {}", text, e))
    };

    let (days, hours, minutes, seconds) = (number(1)?, number(2)?, number(3)?, number(4)?);
    let secs = days
        .checked_mul(86_400)
        .and_then(|s| s.checked_add(hours.checked_mul(3_600)?))
        .and_then(|s| s.checked_add(minutes.checked_mul(60)?))
        .and_then(|s| s.checked_add(seconds))
        .ok_or_else(|| format!("'{}' overflows", text))?;

    let nanos = match caps.get(5) {
        Some(fraction) => {
            let digits = fraction.as_str();
            let padded = format!("{:0<9}", digits);
            padded
                .parse::<u32>()
                .map_err(|e| format!("'{}': {}", text, e))?
        }
        None => 0,
    };

    Ok(Duration::new(secs, nanos))
}

/// Render a duration as ISO-8601 with hours as the largest unit (`PT1H30M`, `PT0.5S`).
pub fn format_iso8601(duration: Duration) -> String {
    let total = duration.as_secs();
    let nanos = duration.subsec_nanos();
    if total == 0 && nanos == 0 {
        return "PT0S".to_string();
    }

    let hours = total / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;

    let mut out = String::from("PT");
    if hours > 0 {
        out.push_str(&format!("{}H", hours));
    }
    if minutes > 0 {
        out.push_str(&format!("{}M", minutes));
    }
    if seconds > 0 || nanos > 0 {
        out.push_str(&seconds.to_string());
        if nanos > 0 {
            let fraction = format!("{:09}", nanos);
            out.push('.');
            out.push_str(fraction.trim_end_matches('0'));
        }
        out.push('S');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_common_forms() {
        assert_eq!(parse_iso8601("PT1S").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_iso8601("PT3M15S").unwrap(), Duration::from_secs(195));
        assert_eq!(parse_iso8601("PT2H").unwrap(), Duration::from_secs(7_200));
        assert_eq!(parse_iso8601("P1DT1S").unwrap(), Duration::from_secs(86_401));
        assert_eq!(parse_iso8601("pt10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_iso8601("PT0.25S").unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "P", "PT", "1S", "PT-1S", "PT1X", "T1S", "PT1S extra"] {
            assert!(parse_iso8601(bad).is_err(), "expected error for {:?}", bad);
        }
    }

    #[test]
    fn test_format_uses_hours_as_largest_unit() {
        assert_eq!(format_iso8601(Duration::ZERO), "PT0S");
        assert_eq!(format_iso8601(Duration::from_secs(30)), "PT30S");
        assert_eq!(format_iso8601(Duration::from_secs(570)), "PT9M30S");
        assert_eq!(format_iso8601(Duration::from_secs(3_600)), "PT1H");
        assert_eq!(format_iso8601(Duration::from_millis(500)), "PT0.5S");
    }
}
