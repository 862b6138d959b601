use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, Weekday};

use crate::engine::Schedule;
use crate::model::HOUR_MS;
use crate::notify::RetryPolicy;

/// Dev-only admin token, used when `HALLBOOK_ADMIN_TOKEN` is unset.
pub const DEFAULT_ADMIN_TOKEN: &str = "hallbook";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}={value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid schedule: {0}")]
    Schedule(String),
}

/// Runtime configuration, read from `HALLBOOK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub admin_token: String,
    pub admin_email: String,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub schedule: Schedule,
    pub retry: RetryPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys take their defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Schedule::default();
        let notice_hours: i64 = parse(&get, "HALLBOOK_MIN_NOTICE_HOURS", 24)?;
        let offset_minutes: i32 = parse(&get, "HALLBOOK_UTC_OFFSET_MINUTES", 0)?;
        let utc_offset = offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| ConfigError::Invalid {
            var: "HALLBOOK_UTC_OFFSET_MINUTES",
            value: offset_minutes.to_string(),
            reason: "offset must be within ±24h".into(),
        })?;
        let closed_days = match get("HALLBOOK_CLOSED_DAYS") {
            Some(raw) => parse_weekdays(&raw).map_err(|reason| ConfigError::Invalid {
                var: "HALLBOOK_CLOSED_DAYS",
                value: raw.clone(),
                reason,
            })?,
            None => Vec::new(),
        };

        let schedule = Schedule {
            open_hour: parse(&get, "HALLBOOK_OPEN_HOUR", defaults.open_hour)?,
            close_hour: parse(&get, "HALLBOOK_CLOSE_HOUR", defaults.close_hour)?,
            slot_minutes: parse(&get, "HALLBOOK_SLOT_MINUTES", defaults.slot_minutes)?,
            min_notice_ms: notice_hours.saturating_mul(HOUR_MS),
            utc_offset,
            closed_days,
        };
        schedule.validate().map_err(ConfigError::Schedule)?;

        let retry = RetryPolicy {
            max_attempts: parse(&get, "HALLBOOK_NOTIFY_ATTEMPTS", 3u32)?.max(1),
            base_delay: Duration::from_millis(parse(&get, "HALLBOOK_NOTIFY_BACKOFF_MS", 500u64)?),
        };

        Ok(Self {
            bind: get("HALLBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse(&get, "HALLBOOK_PORT", 8080)?,
            data_dir: PathBuf::from(get("HALLBOOK_DATA_DIR").unwrap_or_else(|| "./data".into())),
            admin_token: get("HALLBOOK_ADMIN_TOKEN").unwrap_or_else(|| DEFAULT_ADMIN_TOKEN.into()),
            admin_email: get("HALLBOOK_ADMIN_EMAIL").unwrap_or_else(|| "admin@localhost".into()),
            metrics_port: match get("HALLBOOK_METRICS_PORT") {
                Some(_) => Some(parse(&get, "HALLBOOK_METRICS_PORT", 0)?),
                None => None,
            },
            compact_threshold: parse(&get, "HALLBOOK_COMPACT_THRESHOLD", 1000)?,
            schedule,
            retry,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("hallbook.journal")
    }

    pub fn uses_default_admin_token(&self) -> bool {
        self.admin_token == DEFAULT_ADMIN_TOKEN
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match get(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

/// `"sat, sun"` → `[Sat, Sun]`. Accepts short or full English names.
fn parse_weekdays(raw: &str) -> Result<Vec<Weekday>, String> {
    let mut days = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let day: Weekday = part.parse().map_err(|_| format!("unknown weekday {part:?}"))?;
        if !days.contains(&day) {
            days.push(day);
        }
    }
    Ok(days)
}
