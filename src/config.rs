use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm;
use crate::store::payload::Coercions;

pub const CALENDAR_URL: &str = "https://www.tech-week.com/calendar/sf";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config {path}: {reason}")]
    Read { path: String, reason: String },
    #[error("missing credentials: set {0}")]
    MissingCredential(&'static str),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub calendar_url: String,
    pub detail_timeout_secs: u64,
    /// Year stamped on card dates, which carry no year of their own.
    pub event_year: i32,
    pub scroll: ScrollConfig,
    pub store: StoreConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            calendar_url: CALENDAR_URL.to_string(),
            detail_timeout_secs: 20,
            event_year: crate::scraping::base::DEFAULT_YEAR,
            scroll: ScrollConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl AppConfig {
    /// Defaults, overlaid with the JSON file at `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let read_error = |reason: String| ConfigError::Read {
            path: path.display().to_string(),
            reason,
        };
        let contents = fs::read_to_string(path).map_err(|err| read_error(err.to_string()))?;
        let config: Self =
            serde_json::from_str(&contents).map_err(|err| read_error(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scroll.max_cycles == 0 {
            return Err(ConfigError::Invalid("scroll.max_cycles must be positive".into()));
        }
        if self.store.batch_size == 0 {
            return Err(ConfigError::Invalid("store.batch_size must be positive".into()));
        }
        if let Some(column) = self.store.conflict_column.as_deref() {
            if !crate::models::COLUMNS.contains(&column) {
                return Err(ConfigError::Invalid(format!(
                    "store.conflict_column {column:?} is not a known column"
                )));
            }
        }
        Ok(())
    }

    pub fn detail_timeout(&self) -> Duration {
        Duration::from_secs(self.detail_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScrollConfig {
    pub max_cycles: u32,
    pub stable_rounds: u32,
    /// Stability is only accepted above this many items.
    pub min_items: usize,
    pub scroll_delay_ms: u64,
    pub load_more_delay_ms: u64,
    pub dwell_every: u32,
    pub dwell_ms: u64,
    pub first_item_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub pagination_shortcut: bool,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            max_cycles: 500,
            stable_rounds: 10,
            min_items: 0,
            scroll_delay_ms: 500,
            load_more_delay_ms: 2000,
            dwell_every: 5,
            dwell_ms: 2000,
            first_item_timeout_secs: 30,
            poll_interval_ms: 500,
            pagination_shortcut: true,
        }
    }
}

impl ScrollConfig {
    pub fn scroll_delay(&self) -> Duration {
        Duration::from_millis(self.scroll_delay_ms)
    }

    pub fn load_more_delay(&self) -> Duration {
        Duration::from_millis(self.load_more_delay_ms)
    }

    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }

    pub fn first_item_timeout(&self) -> Duration {
        Duration::from_secs(self.first_item_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    pub table: String,
    pub conflict_column: Option<String>,
    pub batch_size: usize,
    pub timeout_secs: u64,
    pub coercions: Coercions,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            table: "events".to_string(),
            conflict_column: Some("event_name_and_link".to_string()),
            batch_size: 200,
            timeout_secs: 30,
            coercions: Coercions::default(),
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupabaseCredentials {
    pub url: String,
    pub key: String,
}

impl SupabaseCredentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = env_value("SUPABASE_URL").ok_or(ConfigError::MissingCredential("SUPABASE_URL"))?;
        let key = env_value("SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|| env_value("SUPABASE_ANON_KEY"))
            .ok_or(ConfigError::MissingCredential(
                "SUPABASE_SERVICE_ROLE_KEY or SUPABASE_ANON_KEY",
            ))?;
        Self::new(url, key)
    }

    /// Rejects URLs a REST path cannot be appended to.
    pub fn new(url: String, key: String) -> Result<Self, ConfigError> {
        let parsed = reqwest::Url::parse(url.trim())
            .map_err(|err| ConfigError::Invalid(format!("SUPABASE_URL {url:?}: {err}")))?;
        if parsed.cannot_be_a_base() || !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "SUPABASE_URL {url:?} is not an http(s) URL"
            )));
        }
        Ok(Self { url, key })
    }
}

/// The hosted default endpoint needs a key; a custom endpoint may not.
pub fn check_classifier_credentials() -> Result<(), ConfigError> {
    let endpoint = env_value("LLM_ENDPOINT").unwrap_or_else(|| llm::DEFAULT_ENDPOINT.to_string());
    let has_key = env_value("LLM_API_KEY")
        .or_else(|| env_value("OPENAI_API_KEY"))
        .is_some();
    if endpoint.trim_end_matches('/') == llm::DEFAULT_ENDPOINT && !has_key {
        return Err(ConfigError::MissingCredential("LLM_API_KEY or OPENAI_API_KEY"));
    }
    Ok(())
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"{{"scroll": {{"stable_rounds": 3, "min_items": 500}}, "store": {{"table": "Event List", "coercions": {{"date_year": 2025}}}}}}"#
        )
        .expect("write");

        let config = AppConfig::load(Some(file.path())).expect("load");
        assert_eq!(config.scroll.stable_rounds, 3);
        assert_eq!(config.scroll.min_items, 500);
        assert_eq!(config.scroll.max_cycles, 500);
        assert_eq!(config.store.table, "Event List");
        assert_eq!(config.store.batch_size, 200);
        assert_eq!(config.store.coercions.date_year, Some(2025));
        assert_eq!(config.calendar_url, CALENDAR_URL);
    }

    #[test]
    fn rejects_bad_files() {
        assert!(matches!(
            AppConfig::load(Some(Path::new("/nonexistent/config.json"))),
            Err(ConfigError::Read { .. })
        ));

        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{"store": {{"conflict_column": "nope"}}}}"#).expect("write");
        assert!(matches!(
            AppConfig::load(Some(file.path())),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn no_path_means_defaults() {
        assert_eq!(AppConfig::load(None).expect("defaults"), AppConfig::default());
    }

    #[test]
    fn malformed_supabase_url_is_a_config_error() {
        for url in ["abc.supabase.co", "not a url", "mailto:ops@example.com"] {
            assert!(matches!(
                SupabaseCredentials::new(url.into(), "key".into()),
                Err(ConfigError::Invalid(_))
            ));
        }
        let ok = SupabaseCredentials::new("https://abc.supabase.co".into(), "key".into())
            .expect("valid url");
        assert_eq!(ok.url, "https://abc.supabase.co");
    }
}
