//! Weekly pairing schedule
//!
//! The schedule is a weekday plus a wall-clock time in an IANA timezone,
//! rendered as a `cron` expression. A background task polls the clock and
//! emits a `ScheduledRun` whenever the next occurrence has passed.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveTime, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use cron::Schedule;
use std::str::FromStr;
use tokio::sync::mpsc;

use crate::announcement::weekday_name;

pub const DEFAULT_WEEKDAY: Weekday = Weekday::Tue;
pub const DEFAULT_TIME: &str = "16:00";
pub const DEFAULT_TIMEZONE: &str = "UTC";

#[derive(Debug, Clone, PartialEq)]
pub struct PairingSchedule {
    pub weekday: Weekday,
    pub time: NaiveTime,
    pub timezone: Tz,
}

impl Default for PairingSchedule {
    fn default() -> Self {
        Self {
            weekday: DEFAULT_WEEKDAY,
            time: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or_default(),
            timezone: Tz::UTC,
        }
    }
}

impl PairingSchedule {
    /// Parse `"tue"`/`"Tuesday"`, `"HH:MM"` and an IANA timezone name
    pub fn parse(weekday: &str, time: &str, timezone: &str) -> Result<Self> {
        Ok(Self {
            weekday: parse_weekday(weekday)?,
            time: parse_time(time)?,
            timezone: parse_timezone(timezone)?,
        })
    }

    /// Six-field cron expression (`sec min hour day month dow`)
    pub fn cron_expression(&self) -> String {
        format!(
            "0 {} {} * * {}",
            self.time.minute(),
            self.time.hour(),
            self.weekday
        )
    }

    /// First occurrence strictly after `after`
    pub fn next_run_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let schedule = parse_cron(&self.cron_expression())?;
        let local = after.with_timezone(&self.timezone);

        let next = schedule
            .after(&local)
            .next()
            .ok_or_else(|| anyhow::anyhow!("No future occurrences for {}", self.describe()))?;

        Ok(next.with_timezone(&Utc))
    }

    pub fn describe(&self) -> String {
        format!(
            "every {} at {} {}",
            weekday_name(self.weekday),
            self.time.format("%H:%M"),
            self.timezone
        )
    }
}

pub fn parse_weekday(s: &str) -> Result<Weekday> {
    Weekday::from_str(s.trim())
        .map_err(|_| anyhow::anyhow!("Invalid weekday '{}'. Use e.g. 'tue' or 'Tuesday'", s))
}

pub fn parse_time(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .with_context(|| format!("Invalid pairing time '{}'. Use HH:MM (24-hour)", s))
}

pub fn parse_timezone(s: &str) -> Result<Tz> {
    s.trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid timezone: {}", s))
}

/// Parse a cron expression and validate it
pub fn parse_cron(expression: &str) -> Result<Schedule> {
    Schedule::from_str(expression)
        .map_err(|e| anyhow::anyhow!("Invalid cron expression '{}': {}", expression, e))
}

// ============================================================================
// Background Scheduler Runner
// ============================================================================

/// A due pairing run sent to the main loop
#[derive(Debug, Clone)]
pub struct ScheduledRun {
    pub due_at: DateTime<Utc>,
}

/// Spawn the background polling task.
/// Returns a channel receiver for due runs.
pub fn spawn_scheduler(
    schedule: PairingSchedule,
    poll_interval_secs: u64,
) -> Result<mpsc::Receiver<ScheduledRun>> {
    let mut next_run = schedule.next_run_after(Utc::now())?;
    let (tx, rx) = mpsc::channel::<ScheduledRun>(4);

    tracing::info!(
        "Next pairing run at {}",
        next_run.format("%Y-%m-%d %H:%M:%S UTC")
    );

    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(poll_interval_secs));

        loop {
            interval.tick().await;

            let now = Utc::now();
            if now < next_run {
                continue;
            }

            tracing::debug!("Pairing run due at {}", next_run);
            if tx.send(ScheduledRun { due_at: next_run }).await.is_err() {
                tracing::warn!("Scheduler channel closed, stopping background scheduler");
                return;
            }

            match schedule.next_run_after(now) {
                Ok(next) => {
                    next_run = next;
                    tracing::info!(
                        "Next pairing run at {}",
                        next_run.format("%Y-%m-%d %H:%M:%S UTC")
                    );
                }
                Err(e) => {
                    tracing::error!("Failed to compute next pairing run: {}", e);
                    return;
                }
            }
        }
    });

    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_parse_cron() {
        // cron crate uses 6 fields: sec min hour day month dow
        assert!(parse_cron("0 0 16 * * Tue").is_ok());
        assert!(parse_cron("0 */15 * * * *").is_ok());

        assert!(parse_cron("invalid").is_err());
        assert!(parse_cron("0 99 * * *").is_err());
    }

    #[test]
    fn test_default_schedule() {
        let schedule = PairingSchedule::default();
        assert_eq!(schedule.cron_expression(), "0 0 16 * * Tue");
        assert_eq!(schedule.describe(), "every Tuesday at 16:00 UTC");
    }

    #[test]
    fn test_parse_schedule() {
        let schedule = PairingSchedule::parse("friday", "09:30", "Europe/Berlin").unwrap();
        assert_eq!(schedule.weekday, Weekday::Fri);
        assert_eq!(schedule.cron_expression(), "0 30 9 * * Fri");

        assert!(PairingSchedule::parse("someday", "09:30", "UTC").is_err());
        assert!(PairingSchedule::parse("tue", "25:00", "UTC").is_err());
        assert!(PairingSchedule::parse("tue", "9am", "UTC").is_err());
        assert!(PairingSchedule::parse("tue", "09:30", "Mars/Olympus").is_err());
    }

    #[test]
    fn test_next_run_after() {
        let schedule = PairingSchedule::default();

        // Monday noon -> Tuesday 16:00
        assert_eq!(
            schedule.next_run_after(utc(2025, 1, 6, 12, 0)).unwrap(),
            utc(2025, 1, 7, 16, 0)
        );
        // Exactly at the run time -> following week
        assert_eq!(
            schedule.next_run_after(utc(2025, 1, 7, 16, 0)).unwrap(),
            utc(2025, 1, 14, 16, 0)
        );
    }

    #[test]
    fn test_next_run_respects_timezone() {
        let schedule = PairingSchedule::parse("tue", "09:00", "Europe/Berlin").unwrap();

        // CET (+1) in January
        assert_eq!(
            schedule.next_run_after(utc(2025, 1, 6, 12, 0)).unwrap(),
            utc(2025, 1, 7, 8, 0)
        );
        // CEST (+2) in July
        assert_eq!(
            schedule.next_run_after(utc(2025, 6, 30, 12, 0)).unwrap(),
            utc(2025, 7, 1, 7, 0)
        );
    }
}
