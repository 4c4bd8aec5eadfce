//! Cron expression parsing, next-fire computation, and catch-up enumeration.
//!
//! A thin wrapper over the `cron` crate's `Schedule` iterator. Kept as an
//! internal module (not a reusable library) because every caller needs the
//! same "advance past a reference instant" semantics used by the task store.

use crate::error::CoreError;
use chrono::{DateTime, Duration, Utc};
use std::borrow::Cow;
use std::str::FromStr;

/// The `cron` crate requires a leading seconds field (6 or 7 fields);
/// task schedules are authored in standard 5-field unix cron. Prepend a
/// `0` seconds field when the caller's expression omits it.
fn normalize(expr: &str) -> Cow<'_, str> {
    if expr.split_whitespace().count() == 5 {
        Cow::Owned(format!("0 {expr}"))
    } else {
        Cow::Borrowed(expr)
    }
}

/// Validate a cron expression, returning an error with a human message if
/// it does not parse.
pub fn validate(expr: &str) -> Result<(), CoreError> {
    cron::Schedule::from_str(&normalize(expr))
        .map(|_| ())
        .map_err(|e| CoreError::InvalidCron(format!("{expr}: {e}")))
}

/// Compute the next fire time strictly after `after`.
///
/// A 1-second epsilon is added before asking the iterator for the next
/// occurrence so that re-querying at exactly a previous fire time does not
/// return that same instant again (the "stuck at the same time" loop the
/// task store's `advance` operation must avoid).
pub fn next_after(expr: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, CoreError> {
    let schedule = cron::Schedule::from_str(&normalize(expr))
        .map_err(|e| CoreError::InvalidCron(format!("{expr}: {e}")))?;
    schedule
        .after(&(after + Duration::seconds(1)))
        .next()
        .ok_or_else(|| CoreError::InvalidCron(format!("{expr} has no future occurrences")))
}

/// Derive the approximate interval, in whole minutes, between successive
/// fires. Used only for claim-query worker priority, never for timing.
pub fn interval_minutes(expr: &str) -> Result<i64, CoreError> {
    let schedule = cron::Schedule::from_str(&normalize(expr))
        .map_err(|e| CoreError::InvalidCron(format!("{expr}: {e}")))?;
    let now = Utc::now();
    let mut it = schedule.after(&now);
    let first = it
        .next()
        .ok_or_else(|| CoreError::InvalidCron(format!("{expr} has no future occurrences")))?;
    let second = it
        .next()
        .ok_or_else(|| CoreError::InvalidCron(format!("{expr} has no future occurrences")))?;
    let minutes = (second - first).num_seconds() / 60;
    Ok(minutes.max(1))
}

/// Enumerate every fire time in `(from, to]`, used by the scheduler's
/// catch-up path. `from` is typically the task's current `next_run_at`.
pub fn fires_between(
    expr: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<DateTime<Utc>>, CoreError> {
    let schedule = cron::Schedule::from_str(&normalize(expr))
        .map_err(|e| CoreError::InvalidCron(format!("{expr}: {e}")))?;
    Ok(schedule
        .after(&(from - Duration::seconds(1)))
        .take_while(|t| *t <= to)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn validates_well_formed_expression() {
        assert!(validate("*/5 * * * * *").is_ok());
    }

    #[test]
    fn rejects_malformed_expression() {
        assert!(validate("not a cron").is_err());
    }

    #[test]
    fn next_after_advances_strictly() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let next = next_after("0 * * * * *", now).unwrap();
        assert!(next > now);
    }

    #[test]
    fn interval_minutes_for_minute_cron_is_one() {
        assert_eq!(interval_minutes("0 * * * * *").unwrap(), 1);
    }

    #[test]
    fn interval_minutes_for_five_minute_cron() {
        assert_eq!(interval_minutes("0 */5 * * * *").unwrap(), 5);
    }

    #[test]
    fn fires_between_enumerates_missed_occurrences() {
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let to = from + Duration::minutes(3);
        let fires = fires_between("0 * * * * *", from, to).unwrap();
        // minute marks at +1, +2, +3 (from itself is exclusive lower bound)
        assert_eq!(fires.len(), 3);
        assert_eq!(fires[0], from + Duration::minutes(1));
        assert_eq!(fires[2], to);
    }
}
