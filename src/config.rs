//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// What happens to task instances dated before today when the task set is loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Expired instances are hidden from every consumer but stay in the store.
    #[default]
    FilterOnly,
    /// Expired instances are deleted from the store at load time.
    DeleteExpired,
}

impl FromStr for RetentionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "filter" | "filter_only" => Ok(Self::FilterOnly),
            "delete" | "delete_expired" => Ok(Self::DeleteExpired),
            other => Err(format!("expected 'filter' or 'delete', got '{other}'")),
        }
    }
}

/// Planner configuration.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Path of the libSQL database file.
    pub db_path: PathBuf,
    /// Account whose data this process serves. `None` means no active session.
    pub user_id: Option<String>,
    /// Retention policy applied on every load.
    pub retention: RetentionPolicy,
    /// Port for the HTTP/WebSocket API.
    pub http_port: u16,
    /// How often the sync loop checks whether the calendar day has rolled over.
    pub day_check_interval: Duration,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/planner.db"),
            user_id: None,
            retention: RetentionPolicy::FilterOnly,
            http_port: 8080,
            day_check_interval: Duration::from_secs(60),
        }
    }
}

impl PlannerConfig {
    /// Build configuration from `PLANNER_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let db_path = lookup("PLANNER_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let user_id = lookup("PLANNER_USER")
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());

        let retention = match lookup("PLANNER_RETENTION") {
            Some(raw) => raw.parse().map_err(|message| ConfigError::InvalidValue {
                key: "PLANNER_RETENTION".into(),
                message,
            })?,
            None => defaults.retention,
        };

        let http_port = match lookup("PLANNER_HTTP_PORT") {
            Some(raw) => raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
                key: "PLANNER_HTTP_PORT".into(),
                message: format!("{e}"),
            })?,
            None => defaults.http_port,
        };

        let day_check_interval = match lookup("PLANNER_DAY_CHECK_SECS") {
            Some(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
                    key: "PLANNER_DAY_CHECK_SECS".into(),
                    message: format!("{e}"),
                })?;
                if secs == 0 {
                    return Err(ConfigError::InvalidValue {
                        key: "PLANNER_DAY_CHECK_SECS".into(),
                        message: "must be at least 1".into(),
                    });
                }
                Duration::from_secs(secs)
            }
            None => defaults.day_check_interval,
        };

        Ok(Self {
            db_path,
            user_id,
            retention,
            http_port,
            day_check_interval,
        })
    }
}
