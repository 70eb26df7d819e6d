//! Settings loaded from `.rove/settings.toml`, with documented defaults.
//!
//! Every section has a `Default` impl holding the built-in values; the file
//! only needs to name what it overrides. `Config::validate` runs once after
//! loading, so the rest of the crate can trust the values it is handed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;

pub const HOME_DIR: &str = ".rove";
pub const SETTINGS_FILE: &str = "settings.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sources: SourcesConfig,
    pub scheduler: SchedulerConfig,
    pub ai: AiConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Source that owns tracked ids (the "source of record").
    pub default_ticket_source: String,
    #[serde(default = "SourceSettings::jira")]
    pub jira: SourceSettings,
    #[serde(default = "SourceSettings::slack")]
    pub slack: SourceSettings,
    #[serde(default = "SourceSettings::github")]
    pub github: SourceSettings,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            default_ticket_source: "jira".to_string(),
            jira: SourceSettings::jira(),
            slack: SourceSettings::slack(),
            github: SourceSettings::github(),
        }
    }
}

impl SourcesConfig {
    /// Known sources in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &SourceSettings)> {
        [
            ("jira", &self.jira),
            ("slack", &self.slack),
            ("github", &self.github),
        ]
        .into_iter()
    }

    pub fn get(&self, name: &str) -> Option<&SourceSettings> {
        self.iter().find(|(n, _)| *n == name).map(|(_, s)| s)
    }
}

/// Per-source knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    /// Requests per minute.
    pub rate_limit: u32,
    /// Items requested per API call.
    pub page_size: u32,
    /// Regex a reference token must match for this source to be queried
    /// with it when it is the primary source. `None` means never.
    pub id_pattern: Option<String>,
    /// API base URL (Jira site URL, GitHub API root, Slack API root).
    pub base_url: Option<String>,
    /// GitHub: owner/org for review lookups.
    pub default_owner: String,
    /// GitHub: repository for review lookups.
    pub default_repo: String,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            rate_limit: 100,
            page_size: 50,
            id_pattern: None,
            base_url: None,
            default_owner: String::new(),
            default_repo: String::new(),
        }
    }
}

impl SourceSettings {
    pub fn jira() -> Self {
        Self {
            id_pattern: Some(r"^[A-Z][A-Z0-9]*-\d+$".to_string()),
            ..Self::default()
        }
    }

    pub fn slack() -> Self {
        Self {
            rate_limit: 50,
            page_size: 100,
            ..Self::default()
        }
    }

    pub fn github() -> Self {
        Self {
            rate_limit: 60,
            page_size: 100,
            id_pattern: Some(r"^#\d+$".to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    #[serde(with = "duration_str")]
    pub refresh_interval: Duration,
    /// Total attempts per source call, including the first.
    pub retry_attempts: u32,
    /// Fixed pause between attempts.
    #[serde(with = "duration_str")]
    pub retry_delay: Duration,
    /// Items not updated for longer than this are skipped by scheduled ticks.
    #[serde(with = "duration_str")]
    pub staleness_threshold: Duration,
    pub max_concurrent_runs: usize,
    /// Optional cutoff bounding how far back any fetch reaches.
    #[serde(with = "duration_str::option", skip_serializing_if = "Option::is_none")]
    pub fetch_horizon: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(6 * 3600),
            retry_attempts: 3,
            retry_delay: Duration::from_secs(30 * 60),
            staleness_threshold: Duration::from_secs(7 * 86400),
            max_concurrent_runs: 4,
            fetch_horizon: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// OpenAI-compatible endpoint. Empty disables the oracle.
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    /// Hop limit H for reference expansion.
    pub max_hops: u32,
    /// Topical search terms taken from the primary item.
    pub max_keywords: usize,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            max_hops: 3,
            max_keywords: 3,
        }
    }
}

impl AiConfig {
    /// The oracle and keyword extraction run only with a key or a
    /// self-hosted endpoint.
    pub fn enabled(&self) -> bool {
        !self.api_base.is_empty()
            && (!self.api_key.is_empty() || self.api_base != AiConfig::default().api_base)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".context"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load settings from `path`, falling back to defaults when the file does
    /// not exist. Environment overrides are applied before validation.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Self::parse(&raw)?
        } else {
            debug!(path = %path.display(), "no settings file, using defaults");
            Self::default()
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("Failed to parse settings")
    }

    /// `ROVE_AI_*` variables (also read from `.env`) override the file.
    fn apply_env(&mut self) {
        if let Ok(key) = dotenv::var("ROVE_AI_API_KEY") {
            self.ai.api_key = key;
        }
        if let Ok(base) = dotenv::var("ROVE_AI_API_BASE") {
            self.ai.api_base = base;
        }
        if let Ok(model) = dotenv::var("ROVE_AI_MODEL") {
            self.ai.model = model;
        }
    }

    pub fn validate(&self) -> std::result::Result<(), Error> {
        if self.sources.get(&self.sources.default_ticket_source).is_none() {
            return Err(Error::Config(format!(
                "default_ticket_source '{}' is not a known source",
                self.sources.default_ticket_source
            )));
        }
        for (name, source) in self.sources.iter() {
            if source.rate_limit == 0 {
                return Err(Error::Config(format!("sources.{name}.rate_limit must be > 0")));
            }
            if source.page_size == 0 {
                return Err(Error::Config(format!("sources.{name}.page_size must be > 0")));
            }
            if let Some(pattern) = &source.id_pattern {
                regex::Regex::new(pattern).map_err(|e| {
                    Error::Config(format!("sources.{name}.id_pattern is invalid: {e}"))
                })?;
            }
        }
        if self.scheduler.retry_attempts == 0 {
            return Err(Error::Config("scheduler.retry_attempts must be >= 1".into()));
        }
        if self.scheduler.max_concurrent_runs == 0 {
            return Err(Error::Config("scheduler.max_concurrent_runs must be >= 1".into()));
        }
        if self.scheduler.refresh_interval.is_zero() {
            return Err(Error::Config("scheduler.refresh_interval must be > 0".into()));
        }
        Ok(())
    }

    pub fn home() -> PathBuf {
        PathBuf::from(HOME_DIR)
    }

    pub fn settings_path() -> PathBuf {
        Self::home().join(SETTINGS_FILE)
    }

    pub fn state_dir() -> PathBuf {
        Self::home().join("state")
    }
}

/// Parse `30s`, `30m`, `6h`, `7d`.
pub fn parse_duration(raw: &str) -> std::result::Result<Duration, Error> {
    let raw = raw.trim();
    let Some(unit) = raw.chars().last() else {
        return Err(Error::Config("empty duration".into()));
    };
    let value: u64 = raw[..raw.len() - unit.len_utf8()]
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid duration '{raw}'")))?;
    let multiplier = match unit.to_ascii_lowercase() {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        'd' => 86400,
        other => {
            return Err(Error::Config(format!("invalid duration unit '{other}' in '{raw}'")))
        }
    };
    Ok(Duration::from_secs(value * multiplier))
}

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs != 0 && secs % 86400 == 0 {
        format!("{}d", secs / 86400)
    } else if secs != 0 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs != 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
            match d {
                Some(d) => s.serialize_str(&super::super::format_duration(*d)),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
            let raw = Option::<String>::deserialize(d)?;
            raw.map(|r| super::super::parse_duration(&r).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
