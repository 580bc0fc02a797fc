// calendar-sync/src/config.rs
//! Configuration loading: a JSON document read once at startup from
//! beside the executable (falling back to the current directory in
//! development). Unknown keys are ignored; missing mandatory keys are a
//! startup-fatal error, never a panic.

use std::fs;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not locate config.json: {0}")]
    NotFound(String),
    #[error("failed to read config.json: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config.json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("missing mandatory configuration key: {0}")]
    MissingKey(&'static str),
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl LogLevel {
    pub fn as_filter_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

fn default_initial_wait_seconds() -> u64 {
    60
}
fn default_sync_interval_minutes() -> u64 {
    3
}
fn default_sync_days_into_future() -> i64 {
    30
}
fn default_sync_days_into_past() -> i64 {
    30
}
fn default_recurrence_expansion_days() -> i64 {
    30
}
fn default_true() -> bool {
    true
}

/// Raw document shape as read from `config.json`. Fields with
/// `#[serde(default)]` are optional per the configuration table; the
/// mandatory fields are `Option` here so a missing key can be reported
/// as [`ConfigError::MissingKey`] instead of a deserialization failure
/// that loses which key was absent.
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(rename = "ICloudCalDavUrl")]
    icloud_caldav_url: Option<String>,
    #[serde(rename = "ICloudUser")]
    icloud_user: Option<String>,
    #[serde(rename = "ICloudPassword")]
    icloud_password: Option<String>,
    #[serde(rename = "PrincipalId")]
    principal_id: Option<String>,
    #[serde(rename = "WorkCalendarId")]
    work_calendar_id: Option<String>,

    #[serde(rename = "InitialWaitSeconds", default = "default_initial_wait_seconds")]
    initial_wait_seconds: u64,
    #[serde(rename = "SyncIntervalMinutes", default = "default_sync_interval_minutes")]
    sync_interval_minutes: u64,
    #[serde(rename = "SyncDaysIntoFuture", default = "default_sync_days_into_future")]
    sync_days_into_future: i64,
    #[serde(rename = "SyncDaysIntoPast", default = "default_sync_days_into_past")]
    sync_days_into_past: i64,
    #[serde(rename = "RecurrenceExpansionDaysPast", default = "default_recurrence_expansion_days")]
    recurrence_expansion_days_past: i64,
    #[serde(rename = "RecurrenceExpansionDaysFuture", default = "default_recurrence_expansion_days")]
    recurrence_expansion_days_future: i64,
    #[serde(rename = "SourceId", default)]
    source_id: String,
    #[serde(rename = "EventTag", default)]
    event_tag: String,
    #[serde(rename = "SourceTimeZoneId", default)]
    source_time_zone_id: String,
    #[serde(rename = "TargetTimeZoneId", default)]
    target_time_zone_id: String,
    #[serde(rename = "IncludeSecondReminder", default = "default_true")]
    include_second_reminder: bool,
    #[serde(rename = "LogLevel", default)]
    log_level: LogLevel,
}

/// The validated, fully-resolved configuration the rest of the binary
/// consumes.
#[derive(Debug, Clone)]
pub struct Config {
    pub icloud_caldav_url: String,
    pub icloud_user: String,
    pub icloud_password: String,
    pub principal_id: String,
    pub work_calendar_id: String,
    pub initial_wait_seconds: u64,
    pub sync_interval_minutes: u64,
    pub sync_days_into_future: i64,
    pub sync_days_into_past: i64,
    pub recurrence_expansion_days_past: i64,
    pub recurrence_expansion_days_future: i64,
    pub source_id: String,
    pub event_tag: String,
    pub source_time_zone_id: String,
    pub target_time_zone_id: String,
    pub include_second_reminder: bool,
    pub log_level: LogLevel,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::discover_path()?;
        let content = fs::read_to_string(&path)?;
        let raw: RawConfig = serde_json::from_str(&content)?;
        Self::from_raw(raw)
    }

    fn discover_path() -> Result<PathBuf, ConfigError> {
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let candidate = dir.join("config.json");
                if candidate.exists() {
                    return Ok(candidate);
                }
            }
        }

        let cwd_candidate = std::env::current_dir()
            .map(|d| d.join("config.json"))
            .map_err(|e| ConfigError::NotFound(e.to_string()))?;
        if cwd_candidate.exists() {
            return Ok(cwd_candidate);
        }

        Err(ConfigError::NotFound(
            "config.json not found next to the executable or in the current directory".to_string(),
        ))
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            icloud_caldav_url: raw.icloud_caldav_url.ok_or(ConfigError::MissingKey("ICloudCalDavUrl"))?,
            icloud_user: raw.icloud_user.ok_or(ConfigError::MissingKey("ICloudUser"))?,
            icloud_password: raw.icloud_password.ok_or(ConfigError::MissingKey("ICloudPassword"))?,
            principal_id: raw.principal_id.ok_or(ConfigError::MissingKey("PrincipalId"))?,
            work_calendar_id: raw.work_calendar_id.ok_or(ConfigError::MissingKey("WorkCalendarId"))?,
            initial_wait_seconds: raw.initial_wait_seconds,
            sync_interval_minutes: raw.sync_interval_minutes,
            sync_days_into_future: raw.sync_days_into_future,
            sync_days_into_past: raw.sync_days_into_past,
            recurrence_expansion_days_past: raw.recurrence_expansion_days_past,
            recurrence_expansion_days_future: raw.recurrence_expansion_days_future,
            source_id: raw.source_id,
            event_tag: raw.event_tag,
            source_time_zone_id: raw.source_time_zone_id,
            target_time_zone_id: raw.target_time_zone_id,
            include_second_reminder: raw.include_second_reminder,
            log_level: raw.log_level,
        })
    }

    /// `${ICloudCalDavUrl}/${PrincipalId}/calendars/${WorkCalendarId}/`
    pub fn calendar_url(&self) -> String {
        format!(
            "{}/{}/calendars/{}/",
            self.icloud_caldav_url.trim_end_matches('/'),
            self.principal_id,
            self.work_calendar_id
        )
    }
}
