//! Jenkins connection settings.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Default per-request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Jenkins configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct JenkinsConfig {
    /// Jenkins server URL
    pub url: String,
    /// Username for HTTP basic auth (optional for anonymous servers)
    pub username: Option<String>,
    /// API token paired with `username`
    pub api_token: Option<String>,
    /// Upper bound for a single HTTP request
    pub request_timeout_secs: u64,
}

impl JenkinsConfig {
    /// Create config for a specific server
    pub fn new(url: &str) -> Self {
        JenkinsConfig {
            url: url.trim_end_matches('/').to_string(),
            username: None,
            api_token: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }

    /// Set basic-auth credentials
    pub fn with_credentials(mut self, username: &str, api_token: &str) -> Self {
        self.username = Some(username.to_string());
        self.api_token = Some(api_token.to_string());
        self
    }

    /// Override the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Create a config from environment variables
    ///
    /// - `JENKINS_URL` (required)
    /// - `JENKINS_USERNAME`, `JENKINS_API_TOKEN` (optional)
    /// - `CIBRIDGE_HTTP_TIMEOUT_SECS` (optional, default 30)
    pub fn from_env() -> Result<Self, GatewayError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`JenkinsConfig::from_env`] but reads values through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, GatewayError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let url = non_empty("JENKINS_URL").ok_or_else(|| {
            GatewayError::Config(
                "JENKINS_URL environment variable is required. \
                 Please set it to your Jenkins server URL."
                    .to_string(),
            )
        })?;

        let mut config = JenkinsConfig::new(&url);
        config.username = non_empty("JENKINS_USERNAME");
        config.api_token = non_empty("JENKINS_API_TOKEN");

        if let Some(raw) = non_empty("CIBRIDGE_HTTP_TIMEOUT_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                GatewayError::Config(format!("CIBRIDGE_HTTP_TIMEOUT_SECS is not a number: {raw}"))
            })?;
            config.request_timeout_secs = secs.max(1);
        }

        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl fmt::Debug for JenkinsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JenkinsConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_jenkins_config_requires_url() {
        let err = JenkinsConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
        assert!(err.to_string().contains("JENKINS_URL"));
    }

    #[test]
    fn test_jenkins_config_from_lookup() {
        let config = JenkinsConfig::from_lookup(lookup_from(&[
            ("JENKINS_URL", "https://ci.example.com/"),
            ("JENKINS_USERNAME", "bot"),
            ("JENKINS_API_TOKEN", "t0ken"),
            ("CIBRIDGE_HTTP_TIMEOUT_SECS", "12"),
        ]))
        .unwrap();

        assert_eq!(config.url, "https://ci.example.com");
        assert_eq!(config.username.as_deref(), Some("bot"));
        assert_eq!(config.api_token.as_deref(), Some("t0ken"));
        assert_eq!(config.request_timeout(), Duration::from_secs(12));
    }

    #[test]
    fn test_empty_credentials_are_ignored() {
        let config = JenkinsConfig::from_lookup(lookup_from(&[
            ("JENKINS_URL", "http://localhost:8080"),
            ("JENKINS_USERNAME", ""),
        ]))
        .unwrap();
        assert!(config.username.is_none());
        assert_eq!(config.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
    }

    #[test]
    fn test_bad_timeout_is_config_error() {
        let err = JenkinsConfig::from_lookup(lookup_from(&[
            ("JENKINS_URL", "http://localhost:8080"),
            ("CIBRIDGE_HTTP_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = JenkinsConfig::new("http://ci").with_credentials("bot", "secret-token");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("<redacted>"));
    }
}
