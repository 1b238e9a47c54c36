use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

use crate::scheduler::{parse_time, parse_timezone, parse_weekday, PairingSchedule};

pub const DEFAULT_CHANNEL: &str = "#general";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/random_coffee/config.json";
pub const DEFAULT_LOOKBACK_DAYS: i64 = 30;
/// Ten years of announcements is far beyond any useful history
pub const MAX_LOOKBACK_DAYS: i64 = 3650;

#[derive(Debug, Clone)]
pub struct Config {
    pub slack_token: Option<String>,
    pub channel: String,

    pub openai_api_key: Option<String>,
    pub openai_api_url: String,
    pub openai_model: String,

    pub schedule: PairingSchedule,
    /// How many days of announcements block repeat pairings
    pub lookback_days: i64,
    /// Abort the run instead of pairing blind when history can't be read
    pub require_history: bool,

    /// Slack user or channel id that receives failure alerts
    pub admin_recipient: Option<String>,
    pub excluded_usernames: Vec<String>,

    pub health_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (environment, test fixtures)
    pub fn from_lookup<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let schedule = PairingSchedule::parse(
            &var("PAIRING_WEEKDAY").unwrap_or_else(|| "tue".to_string()),
            &var("PAIRING_TIME").unwrap_or_else(|| crate::scheduler::DEFAULT_TIME.to_string()),
            &var("PAIRING_TIMEZONE")
                .unwrap_or_else(|| crate::scheduler::DEFAULT_TIMEZONE.to_string()),
        )?;

        Ok(Self {
            slack_token: var("SLACK_BOT_TOKEN").filter(|t| !t.is_empty()),
            channel: var("SLACK_CHANNEL").unwrap_or_else(|| DEFAULT_CHANNEL.to_string()),

            openai_api_key: var("OPENAI_API_KEY").filter(|k| !k.is_empty()),
            openai_api_url: var("OPENAI_API_URL")
                .unwrap_or_else(|| coffee_topics::chat::DEFAULT_API_URL.to_string()),
            openai_model: var("OPENAI_MODEL")
                .unwrap_or_else(|| coffee_topics::chat::DEFAULT_MODEL.to_string()),

            schedule,
            lookback_days: validate_lookback(
                var("LOOKBACK_DAYS")
                    .unwrap_or_else(|| DEFAULT_LOOKBACK_DAYS.to_string())
                    .parse()
                    .context("LOOKBACK_DAYS must be a whole number of days")?,
            )
            .context("Invalid LOOKBACK_DAYS")?,
            require_history: var("REQUIRE_HISTORY")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(false),

            admin_recipient: var("ADMIN_RECIPIENT").filter(|r| !r.is_empty()),
            excluded_usernames: var("EXCLUDED_USERNAMES")
                .map(|s| split_list(&s))
                .unwrap_or_else(|| vec!["admin".to_string()]),

            health_port: var("HEALTH_PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse()
                .context("HEALTH_PORT must be a valid port number")?,
        })
    }

    /// Overlay values from a JSON config file
    pub fn apply_file(&mut self, file: ConfigFile) -> Result<()> {
        if let Some(token) = file.slack_token {
            self.slack_token = Some(token);
        }
        if let Some(channel) = file.channel {
            self.channel = channel;
        }
        if let Some(key) = file.openai_api_key {
            self.openai_api_key = Some(key);
        }
        if let Some(url) = file.openai_api_url {
            self.openai_api_url = url;
        }
        if let Some(model) = file.openai_model {
            self.openai_model = model;
        }
        if let Some(weekday) = file.pairing_weekday {
            self.schedule.weekday = parse_weekday(&weekday)?;
        }
        if let Some(time) = file.pairing_time {
            self.schedule.time = parse_time(&time)?;
        }
        if let Some(timezone) = file.pairing_timezone {
            self.schedule.timezone = parse_timezone(&timezone)?;
        }
        if let Some(days) = file.lookback_days {
            self.lookback_days =
                validate_lookback(days).context("Invalid lookback_days in config file")?;
        }
        if let Some(require) = file.require_history {
            self.require_history = require;
        }
        if let Some(recipient) = file.admin_recipient {
            self.admin_recipient = Some(recipient);
        }
        if let Some(excluded) = file.excluded_usernames {
            self.excluded_usernames = excluded;
        }
        Ok(())
    }

    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::days(self.lookback_days)
    }
}

/// Optional JSON configuration file; every key is optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub slack_token: Option<String>,
    pub channel: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_api_url: Option<String>,
    pub openai_model: Option<String>,
    pub pairing_weekday: Option<String>,
    pub pairing_time: Option<String>,
    pub pairing_timezone: Option<String>,
    pub lookback_days: Option<i64>,
    pub require_history: Option<bool>,
    pub admin_recipient: Option<String>,
    pub excluded_usernames: Option<Vec<String>>,
}

impl ConfigFile {
    /// Load the file at `path`; a missing file is not an error
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            debug!("No config file at {}", path.display());
            return Ok(None);
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let file = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        debug!("Loaded configuration from {}", path.display());
        Ok(Some(file))
    }
}

fn validate_lookback(days: i64) -> Result<i64> {
    anyhow::ensure!(
        (1..=MAX_LOOKBACK_DAYS).contains(&days),
        "lookback must be between 1 and {} days, got {}",
        MAX_LOOKBACK_DAYS,
        days
    );
    Ok(days)
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.channel, "#general");
        assert!(config.slack_token.is_none());
        assert!(config.openai_api_key.is_none());
        assert_eq!(config.openai_model, "gpt-4o-mini");
        assert_eq!(config.schedule, PairingSchedule::default());
        assert_eq!(config.lookback_days, 30);
        assert!(!config.require_history);
        assert_eq!(config.excluded_usernames, vec!["admin"]);
        assert_eq!(config.health_port, 8080);
    }

    #[test]
    fn test_env_values() {
        let config = Config::from_lookup(lookup(&[
            ("SLACK_BOT_TOKEN", "xoxb-test"),
            ("SLACK_CHANNEL", "#random-coffee"),
            ("PAIRING_WEEKDAY", "Monday"),
            ("PAIRING_TIME", "10:15"),
            ("LOOKBACK_DAYS", "14"),
            ("REQUIRE_HISTORY", "1"),
            ("EXCLUDED_USERNAMES", "admin, ops-bot ,,"),
            ("OPENAI_API_KEY", ""),
        ]))
        .unwrap();

        assert_eq!(config.slack_token.as_deref(), Some("xoxb-test"));
        assert_eq!(config.channel, "#random-coffee");
        assert_eq!(config.schedule.weekday, Weekday::Mon);
        assert_eq!(config.schedule.cron_expression(), "0 15 10 * * Mon");
        assert_eq!(config.lookback().num_days(), 14);
        assert!(config.require_history);
        assert_eq!(config.excluded_usernames, vec!["admin", "ops-bot"]);
        // Empty keys count as unset
        assert!(config.openai_api_key.is_none());
    }

    #[test]
    fn test_invalid_env_values() {
        assert!(Config::from_lookup(lookup(&[("LOOKBACK_DAYS", "a month")])).is_err());
        assert!(Config::from_lookup(lookup(&[("HEALTH_PORT", "99999")])).is_err());
        assert!(Config::from_lookup(lookup(&[("PAIRING_TIME", "noon")])).is_err());
    }

    #[test]
    fn test_file_overrides_env() {
        let mut config =
            Config::from_lookup(lookup(&[("SLACK_BOT_TOKEN", "xoxb-env")])).unwrap();
        let file: ConfigFile = serde_json::from_str(
            r#"{
                "slack_token": "xoxb-file",
                "openai_api_key": "sk-file",
                "pairing_time": "08:45",
                "pairing_timezone": "America/New_York",
                "admin_recipient": "U0ADMIN"
            }"#,
        )
        .unwrap();

        config.apply_file(file).unwrap();

        assert_eq!(config.slack_token.as_deref(), Some("xoxb-file"));
        assert_eq!(config.openai_api_key.as_deref(), Some("sk-file"));
        assert_eq!(config.schedule.cron_expression(), "0 45 8 * * Tue");
        assert_eq!(config.schedule.timezone, chrono_tz::America::New_York);
        assert_eq!(config.admin_recipient.as_deref(), Some("U0ADMIN"));
        assert_eq!(config.channel, "#general");
    }

    #[test]
    fn test_lookback_out_of_range() {
        for days in ["0", "-1", "100000000"] {
            let result = Config::from_lookup(lookup(&[("LOOKBACK_DAYS", days)]));
            assert!(result.is_err(), "LOOKBACK_DAYS={} should be rejected", days);
        }
        assert_eq!(
            Config::from_lookup(lookup(&[("LOOKBACK_DAYS", "3650")]))
                .unwrap()
                .lookback_days,
            3650
        );

        let mut config = Config::from_lookup(lookup(&[])).unwrap();
        let file: ConfigFile = serde_json::from_str(r#"{ "lookback_days": 100000000 }"#).unwrap();
        assert!(config.apply_file(file).is_err());
        assert_eq!(config.lookback_days, 30);
    }

    #[test]
    fn test_file_rejects_unknown_keys() {
        assert!(serde_json::from_str::<ConfigFile>(r#"{ "slack_tokn": "x" }"#).is_err());
    }

    #[test]
    fn test_missing_file_is_none() {
        let path = Path::new("/definitely/not/here/config.json");
        assert!(ConfigFile::load(path).unwrap().is_none());
    }
}
