//! Layered configuration: environment variables with explicit overrides
//! for tests, following this codebase's `CONNECT_API_URL`-style convention
//! for selecting the sync server at runtime.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub base_url: String,
    pub http_timeout: Duration,
    /// Debounce window for coalescing rapid data-changed events (W1).
    pub data_changed_debounce: Duration,
    /// Throttle window for app-lifecycle-triggered syncs (W2).
    pub app_lifecycle_throttle: Duration,
    /// Raw payload size above which a PATCH body is gzip-compressed.
    pub gzip_threshold_bytes: usize,
}

const DEFAULT_BASE_URL: &str = "https://sync.duckduckgo.com";
const ENV_BASE_URL: &str = "SYNC_API_URL";

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var(ENV_BASE_URL).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            http_timeout: Duration::from_secs(30),
            data_changed_debounce: Duration::from_secs(1),
            app_lifecycle_throttle: Duration::from_secs(600),
            gzip_threshold_bytes: 32 * 1024,
        }
    }
}

impl SyncConfig {
    /// Builds from the environment, matching this codebase's
    /// environment-variable-gated API base convention.
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_a_sane_gzip_threshold() {
        let config = SyncConfig::default();
        assert!(config.gzip_threshold_bytes <= 32 * 1024);
    }

    #[test]
    fn override_base_url_takes_precedence() {
        let config = SyncConfig::default().with_base_url("https://staging.example.com");
        assert_eq!(config.base_url, "https://staging.example.com");
    }
}
