//! Configuration for the skillfeed client

use std::time::Duration;
use url::Url;

use crate::error::{Error, Result};

/// Client behaviour knobs
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Whether the auth client keeps the session in memory
    pub persist_session: bool,

    /// HTTP request timeout
    pub request_timeout: Option<Duration>,

    /// The database schema
    pub db_schema: String,

    /// Upper bound on fetching the session at startup
    pub session_timeout: Duration,

    /// Upper bound on loading the signed-in user's profile
    pub profile_timeout: Duration,

    /// Window in which a second tap counts as a double tap
    pub tap_debounce: Duration,

    /// Fraction of a card that must be visible before it becomes active
    pub visibility_threshold: f64,

    /// Minimum gap between `last_seen_at` writes
    pub last_seen_throttle: Duration,

    /// Public origin used in share links and auth redirects
    pub site_url: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            persist_session: true,
            request_timeout: Some(Duration::from_secs(30)),
            db_schema: "public".to_string(),
            session_timeout: Duration::from_secs(5),
            profile_timeout: Duration::from_secs(10),
            tap_debounce: Duration::from_millis(250),
            visibility_threshold: 0.7,
            last_seen_throttle: Duration::from_secs(60 * 60),
            site_url: "http://localhost:5173".to_string(),
        }
    }
}

impl ClientOptions {
    pub fn with_persist_session(mut self, value: bool) -> Self {
        self.persist_session = value;
        self
    }

    pub fn with_request_timeout(mut self, value: Option<Duration>) -> Self {
        self.request_timeout = value;
        self
    }

    pub fn with_db_schema(mut self, value: &str) -> Self {
        self.db_schema = value.to_string();
        self
    }

    pub fn with_session_timeout(mut self, value: Duration) -> Self {
        self.session_timeout = value;
        self
    }

    pub fn with_profile_timeout(mut self, value: Duration) -> Self {
        self.profile_timeout = value;
        self
    }

    pub fn with_tap_debounce(mut self, value: Duration) -> Self {
        self.tap_debounce = value;
        self
    }

    /// Clamped to `(0, 1]`
    pub fn with_visibility_threshold(mut self, value: f64) -> Self {
        self.visibility_threshold = value.clamp(f64::EPSILON, 1.0);
        self
    }

    pub fn with_last_seen_throttle(mut self, value: Duration) -> Self {
        self.last_seen_throttle = value;
        self
    }

    pub fn with_site_url(mut self, value: &str) -> Self {
        self.site_url = value.trim_end_matches('/').to_string();
        self
    }
}

/// Backend location and credentials
#[derive(Debug, Clone)]
pub struct Config {
    pub url: Url,
    pub anon_key: String,
    pub options: ClientOptions,
}

impl Config {
    /// Validates the URL and rejects an empty key.
    pub fn new(url: &str, anon_key: &str) -> Result<Self> {
        let url = Url::parse(url)?;
        if anon_key.is_empty() {
            return Err(Error::Config("anon_key cannot be empty".to_string()));
        }
        Ok(Self {
            url,
            anon_key: anon_key.to_string(),
            options: ClientOptions::default(),
        })
    }

    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Reads `SUPABASE_URL`, `SUPABASE_ANON_KEY` and optionally `SKILLFEED_SITE_URL`.
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("SUPABASE_URL").map_err(|_| {
            Error::Config("SUPABASE_URL environment variable not found".to_string())
        })?;
        let anon_key = std::env::var("SUPABASE_ANON_KEY").map_err(|_| {
            Error::Config("SUPABASE_ANON_KEY environment variable not found".to_string())
        })?;
        let mut config = Self::new(&url, &anon_key)?;
        if let Ok(site_url) = std::env::var("SKILLFEED_SITE_URL") {
            config.options = config.options.with_site_url(&site_url);
        }
        Ok(config)
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> String {
        self.url.as_str().trim_end_matches('/').to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_interaction_timings() {
        let options = ClientOptions::default();
        assert_eq!(options.session_timeout, Duration::from_secs(5));
        assert_eq!(options.profile_timeout, Duration::from_secs(10));
        assert_eq!(options.tap_debounce, Duration::from_millis(250));
        assert_eq!(options.visibility_threshold, 0.7);
    }

    #[test]
    fn test_config_validation() {
        assert!(matches!(Config::new("not a url", "key"), Err(Error::Url(_))));
        assert!(matches!(Config::new("https://x.backend.co", ""), Err(Error::Config(_))));

        let config = Config::new("https://x.backend.co/", "key").unwrap();
        assert_eq!(config.base_url(), "https://x.backend.co");
    }

    #[test]
    fn test_site_url_trimmed() {
        let options = ClientOptions::default().with_site_url("https://skillfeed.app/");
        assert_eq!(options.site_url, "https://skillfeed.app");
    }
}
