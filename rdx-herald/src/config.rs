//! Defines all configuration structures for the Herald engine.
//!
//! These structs are designed to be deserialized from a configuration file
//! (e.g., a TOML file) using `serde`, layered with `HERALD_` environment
//! variables. Per-channel settings (time zone, reminder offsets, announcement
//! formats and targets) are looked up by the schedule channel an entry lives
//! in and handed to every lifecycle operation explicitly.

use crate::common::ChannelRef;
use crate::error::HeraldError;
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// The top-level configuration for the `HeraldEngine`.
#[derive(Debug, Clone, Deserialize)]
pub struct HeraldConfig {
    /// How often the dispatcher scans the store for due entries.
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,

    /// Upper bound on a single entry's trigger run. A backing message located
    /// after it has passed is treated as missing.
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,

    /// Start and end announcements are only sent when the trigger runs within
    /// this many minutes of the scheduled time.
    #[serde(default = "default_late_tolerance_minutes")]
    pub late_tolerance_minutes: i64,

    /// Settings used for any schedule channel without its own entry.
    #[serde(default)]
    pub defaults: ChannelSettings,

    /// Per schedule channel overrides, keyed by channel id.
    #[serde(default)]
    pub channels: HashMap<String, ChannelSettings>,
}

/// Settings for one schedule channel.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelSettings {
    /// Zone used when rehydrating entries and resolving time expressions.
    /// Uses the string names from the IANA Time Zone Database
    /// (e.g., "America/New_York").
    #[serde(default = "default_timezone")]
    pub timezone: Tz,

    /// Minutes before start at which a reminder is due.
    #[serde(default = "default_reminders")]
    pub reminders: Vec<i64>,

    /// Minutes before end at which a reminder is due.
    #[serde(default)]
    pub end_reminders: Vec<i64>,

    /// Channel identifier (id or name) receiving start announcements.
    #[serde(default)]
    pub start_announce_target: Option<String>,

    /// Channel identifier (id or name) receiving end announcements.
    #[serde(default)]
    pub end_announce_target: Option<String>,

    /// Channel identifier (id or name) receiving reminders.
    #[serde(default)]
    pub remind_target: Option<String>,

    #[serde(default = "default_start_format")]
    pub start_format: String,

    #[serde(default = "default_end_format")]
    pub end_format: String,

    #[serde(default = "default_remind_format")]
    pub remind_format: String,

    /// Either `"12"` or `"24"`.
    #[serde(default = "default_clock_format")]
    pub clock_format: String,

    #[serde(default)]
    pub rsvp_enabled: bool,
}

impl HeraldConfig {
    /// Loads configuration from an optional TOML file, then applies any
    /// `HERALD_*` environment variables on top (e.g. `HERALD_SCAN_INTERVAL_SECS`).
    /// Nested keys use a double underscore: `HERALD_DEFAULTS__CLOCK_FORMAT`.
    pub fn load(path: Option<&Path>) -> Result<Self, HeraldError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("HERALD")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| HeraldError::Config(e.to_string()))?;
        settings
            .try_deserialize()
            .map_err(|e| HeraldError::Config(e.to_string()))
    }

    /// Returns the settings for a schedule channel, falling back to the defaults.
    pub fn settings_for(&self, channel: &ChannelRef) -> &ChannelSettings {
        self.channels.get(channel.as_str()).unwrap_or(&self.defaults)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.max(1))
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    pub fn late_tolerance(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.late_tolerance_minutes)
    }
}

// --- Default value functions for serde ---

fn default_scan_interval_secs() -> u64 {
    5
}

fn default_lookup_timeout_ms() -> u64 {
    2_000
}

fn default_late_tolerance_minutes() -> i64 {
    15
}

fn default_timezone() -> Tz {
    Tz::UTC
}

fn default_reminders() -> Vec<i64> {
    vec![10]
}

fn default_start_format() -> String {
    "@here %t has begun!".to_string()
}

fn default_end_format() -> String {
    "@here %t has ended.".to_string()
}

fn default_remind_format() -> String {
    "@here %t begins at %s.".to_string()
}

fn default_clock_format() -> String {
    "12".to_string()
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            reminders: default_reminders(),
            end_reminders: Vec::new(),
            start_announce_target: None,
            end_announce_target: None,
            remind_target: None,
            start_format: default_start_format(),
            end_format: default_end_format(),
            remind_format: default_remind_format(),
            clock_format: default_clock_format(),
            rsvp_enabled: false,
        }
    }
}

impl Default for HeraldConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval_secs(),
            lookup_timeout_ms: default_lookup_timeout_ms(),
            late_tolerance_minutes: default_late_tolerance_minutes(),
            defaults: ChannelSettings::default(),
            channels: HashMap::new(),
        }
    }
}
