//! Schedule time parsing
//!
//! Operators type times in several shapes; everything ends up as a UTC
//! timestamp in seconds.

use chrono::{DateTime, Duration, Utc};

use crate::error::{PostflowError, Result};

/// Parse a schedule string relative to `now`.
///
/// Accepted formats, tried in order:
/// - RFC 3339: "2025-11-20T15:00:00Z", "2025-11-20T15:00:00-05:00"
/// - Unix seconds: "1763650800"
/// - Relative durations: "2h", "+30m", "1day 2h"
/// - Natural language: "tomorrow 10am", "next monday"
pub fn parse_schedule(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(PostflowError::Validation(
            "Schedule time cannot be empty".to_string(),
        ));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }

    if input.chars().all(|c| c.is_ascii_digit()) {
        if let Some(dt) = input.parse::<i64>().ok().and_then(|s| DateTime::from_timestamp(s, 0)) {
            return Ok(dt);
        }
    }

    if let Some(duration) = parse_duration(input.trim_start_matches('+')) {
        return Ok(now + duration);
    }

    chrono_english::parse_date_string(input, now, chrono_english::Dialect::Us).map_err(|e| {
        PostflowError::Validation(format!("Could not parse schedule time '{}': {}", input, e))
    })
}

fn parse_duration(input: &str) -> Option<Duration> {
    let std_duration = humantime::parse_duration(input).ok()?;
    Duration::from_std(std_duration).ok()
}

/// Reject times that are not strictly after `now`
pub fn ensure_future(scheduled_at: i64, now: i64) -> Result<()> {
    if scheduled_at <= now {
        return Err(PostflowError::Validation(format!(
            "Scheduled time {} is not in the future",
            format_timestamp(scheduled_at)
        )));
    }
    Ok(())
}

/// RFC 3339 rendering of a unix timestamp, falling back to the raw number
pub fn format_timestamp(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| timestamp.to_string())
}
