//! Cron expression parsing and "next occurrence" computation.

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use cron::Schedule;

use crate::error::ConfigError;

/// Validate a 5-field cron expression eagerly, so `cron()` fails
/// synchronously instead of surfacing a parse error from inside the
/// scheduler loop.
///
/// The `cron` crate's `Schedule` parser expects a leading seconds field, so
/// a standard 5-field expression is prefixed with `"0 "` to anchor every
/// occurrence to the top of the minute.
pub fn validate(expr: &str) -> Result<(), ConfigError> {
    to_schedule(expr).map(|_| ())
}

/// Return the smallest epoch second strictly greater than `from_epoch` that
/// matches `expr`.
pub fn cron_next(expr: &str, from_epoch: i64) -> Result<i64, ConfigError> {
    let schedule = to_schedule(expr)?;
    let from: DateTime<Utc> = Utc
        .timestamp_opt(from_epoch, 0)
        .single()
        .unwrap_or_else(Utc::now);

    schedule
        .after(&from)
        .next()
        .map(|dt| dt.timestamp())
        .ok_or_else(|| {
            ConfigError::InvalidCronExpr(expr.to_owned(), "expression has no future occurrence".into())
        })
}

fn to_schedule(expr: &str) -> Result<Schedule, ConfigError> {
    let with_seconds = format!("0 {expr}");
    Schedule::from_str(&with_seconds)
        .map_err(|e| ConfigError::InvalidCronExpr(expr.to_owned(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_garbage_expression() {
        assert!(validate("not a cron expr").is_err());
    }

    #[test]
    fn accepts_every_minute() {
        assert!(validate("* * * * *").is_ok());
    }

    #[test]
    fn next_occurrence_is_strictly_after_from() {
        // 2024-01-01T00:00:00Z
        let from = 1704067200;
        let next = cron_next("*/5 * * * *", from).unwrap();
        assert!(next > from);
        assert_eq!((next - from) % 300, 0);
    }

    #[test]
    fn daily_expression_advances_by_a_day() {
        let from = 1704067200; // midnight UTC
        let next = cron_next("0 0 * * *", from).unwrap();
        assert_eq!(next - from, 86400);
    }
}
