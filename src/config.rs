use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::extraction::{ExtractionError, GeminiClient, DEFAULT_GEMINI_MODEL};
use crate::pipeline::remote::{PostgrestSink, RemoteError};

/// Application-level constants
pub const APP_NAME: &str = "cardscan";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_REMOTE_TABLE: &str = "contacts";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 120;

const ENV_GEMINI_API_KEY: &str = "CARDSCAN_GEMINI_API_KEY";
const ENV_GEMINI_MODEL: &str = "CARDSCAN_GEMINI_MODEL";
const ENV_SUPABASE_URL: &str = "CARDSCAN_SUPABASE_URL";
const ENV_SUPABASE_KEY: &str = "CARDSCAN_SUPABASE_KEY";
const ENV_SUPABASE_TABLE: &str = "CARDSCAN_SUPABASE_TABLE";
const ENV_HTTP_TIMEOUT: &str = "CARDSCAN_HTTP_TIMEOUT_SECS";

/// Application data directory: the platform's local data dir, falling back
/// to the home directory, then the temp dir.
pub fn app_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_NAME)
}

/// Default SQLite file holding the record blob.
pub fn default_store_path() -> PathBuf {
    app_data_dir().join("records.db")
}

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    if cfg!(debug_assertions) {
        "cardscan=debug,warn"
    } else {
        "cardscan=info,warn"
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

/// Credentials and endpoints for the two external services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub supabase_url: String,
    pub supabase_key: String,
    pub supabase_table: String,
    pub http_timeout_secs: u64,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |var: &'static str| get(var).ok_or(ConfigError::Missing(var));

        let http_timeout_secs = match get(ENV_HTTP_TIMEOUT) {
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => secs,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: ENV_HTTP_TIMEOUT,
                        value: raw,
                    })
                }
            },
            None => DEFAULT_HTTP_TIMEOUT_SECS,
        };

        Ok(Self {
            gemini_api_key: required(ENV_GEMINI_API_KEY)?,
            gemini_model: get(ENV_GEMINI_MODEL).unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            supabase_url: required(ENV_SUPABASE_URL)?,
            supabase_key: required(ENV_SUPABASE_KEY)?,
            supabase_table: get(ENV_SUPABASE_TABLE).unwrap_or_else(|| DEFAULT_REMOTE_TABLE.to_string()),
            http_timeout_secs,
        })
    }

    pub fn gemini_client(&self) -> Result<GeminiClient, ExtractionError> {
        GeminiClient::new(&self.gemini_api_key, &self.gemini_model, self.http_timeout_secs)
    }

    pub fn remote_sink(&self) -> Result<PostgrestSink, RemoteError> {
        PostgrestSink::new(
            &self.supabase_url,
            &self.supabase_key,
            &self.supabase_table,
            self.http_timeout_secs,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("CARDSCAN_GEMINI_API_KEY", "g-key"),
        ("CARDSCAN_SUPABASE_URL", "https://project.supabase.co"),
        ("CARDSCAN_SUPABASE_KEY", "s-key"),
    ];

    #[test]
    fn app_data_dir_is_named_after_app() {
        assert!(app_data_dir().ends_with(APP_NAME));
        assert!(default_store_path().starts_with(app_data_dir()));
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, "0.1.0");
    }

    #[test]
    fn defaults_fill_optional_values() {
        let config = ServiceConfig::from_lookup(lookup(REQUIRED)).unwrap();
        assert_eq!(config.gemini_model, DEFAULT_GEMINI_MODEL);
        assert_eq!(config.supabase_table, "contacts");
        assert_eq!(config.http_timeout_secs, 120);
    }

    #[test]
    fn missing_key_is_named() {
        let err = ServiceConfig::from_lookup(lookup(&REQUIRED[1..])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("CARDSCAN_GEMINI_API_KEY"));

        let mut blank = REQUIRED.to_vec();
        blank[2] = ("CARDSCAN_SUPABASE_KEY", "   ");
        let err = ServiceConfig::from_lookup(lookup(&blank)).unwrap_err();
        assert_eq!(err, ConfigError::Missing("CARDSCAN_SUPABASE_KEY"));
    }

    #[test]
    fn bad_timeout_is_rejected() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("CARDSCAN_HTTP_TIMEOUT_SECS", "soon"));
        assert!(matches!(
            ServiceConfig::from_lookup(lookup(&vars)),
            Err(ConfigError::Invalid { var: "CARDSCAN_HTTP_TIMEOUT_SECS", .. })
        ));
    }

    #[test]
    fn clients_build_from_config() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("CARDSCAN_SUPABASE_TABLE", "leads"));
        vars.push(("CARDSCAN_GEMINI_MODEL", "gemini-2.0-flash"));
        let config = ServiceConfig::from_lookup(lookup(&vars)).unwrap();

        assert_eq!(config.gemini_client().unwrap().model(), "gemini-2.0-flash");
        assert_eq!(config.remote_sink().unwrap().table(), "leads");
    }
}
