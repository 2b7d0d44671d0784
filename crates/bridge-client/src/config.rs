//! Client and session-manager configuration.

use crate::error::{ClientError, Result};
use std::fmt;
use std::time::Duration;

/// Per-connection configuration for a [`MetabaseClient`](crate::MetabaseClient).
///
/// # Security
///
/// The `Debug` implementation masks the password to prevent accidental exposure
/// in logs. It is shown as `"***REDACTED***"` in debug output.
#[derive(Clone)]
pub struct ClientConfig {
    /// Metabase server hostname
    pub host: String,
    /// Server port (default: 443)
    pub port: u16,
    /// Use HTTPS (default: true)
    pub use_ssl: bool,
    /// Login name
    pub username: String,
    /// Login password
    pub password: String,
    /// Default database for schema and table browsing
    pub database: Option<String>,
    /// Timeout for SQL execution (default: 60 seconds)
    pub query_timeout: Duration,
    /// Timeout for catalog reads (default: 10 seconds)
    pub metadata_timeout: Duration,
    /// Timeout for authentication (default: 8 seconds)
    pub auth_timeout: Duration,
    /// Total attempts per call, including the first (default: 2)
    pub max_retries: u32,
    /// Linear backoff base for requests, queries and catalog reads (default: 1 second)
    pub retry_delay: Duration,
    /// Linear backoff base for authentication (default: 500ms)
    pub auth_retry_delay: Duration,
    /// Delay between `close()` and the release of the shared session (default: 10 seconds)
    pub release_delay: Duration,
    /// Warm the table cache for every schema after connecting (default: true)
    pub prefetch_metadata: bool,
    /// Pause between schemas during prefetch when there are more than five (default: 150ms)
    pub prefetch_pause: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 443,
            use_ssl: true,
            username: String::new(),
            password: String::new(),
            database: None,
            query_timeout: Duration::from_secs(60),
            metadata_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(8),
            max_retries: 2,
            retry_delay: Duration::from_secs(1),
            auth_retry_delay: Duration::from_millis(500),
            release_delay: Duration::from_secs(10),
            prefetch_metadata: true,
            prefetch_pause: Duration::from_millis(150),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("use_ssl", &self.use_ssl)
            .field("username", &self.username)
            .field("password", &"***REDACTED***")
            .field("database", &self.database)
            .field("query_timeout", &self.query_timeout)
            .field("metadata_timeout", &self.metadata_timeout)
            .field("auth_timeout", &self.auth_timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("auth_retry_delay", &self.auth_retry_delay)
            .field("release_delay", &self.release_delay)
            .field("prefetch_metadata", &self.prefetch_metadata)
            .finish()
    }
}

impl ClientConfig {
    /// Create a new configuration builder.
    pub fn builder(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> ClientConfigBuilder {
        ClientConfigBuilder::new(host, username, password)
    }

    /// Minimum allowed timeout value.
    pub const MIN_TIMEOUT: Duration = Duration::from_millis(100);

    /// Base URL of the Metabase server, e.g. `https://metabase.example.com:443`.
    pub fn base_url(&self) -> String {
        let scheme = if self.use_ssl { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(ClientError::Config("host cannot be empty".to_string()));
        }
        if self.port == 0 {
            return Err(ClientError::Config("port must be > 0".to_string()));
        }
        if self.username.trim().is_empty() {
            return Err(ClientError::Config("username cannot be empty".to_string()));
        }
        if self.password.trim().is_empty() {
            return Err(ClientError::Config("password cannot be empty".to_string()));
        }
        if self.max_retries == 0 {
            return Err(ClientError::Config(
                "max_retries must be >= 1 (it counts the first attempt)".to_string(),
            ));
        }

        let timeouts = [
            ("query_timeout", self.query_timeout),
            ("metadata_timeout", self.metadata_timeout),
            ("auth_timeout", self.auth_timeout),
        ];
        for (name, value) in timeouts {
            if value < Self::MIN_TIMEOUT {
                return Err(ClientError::Config(format!(
                    "{} ({:?}) must be >= {:?}",
                    name,
                    value,
                    Self::MIN_TIMEOUT
                )));
            }
        }

        url::Url::parse(&self.base_url())
            .map_err(|e| ClientError::Config(format!("Invalid server address: {}", e)))?;

        Ok(())
    }
}

/// Builder for client configuration.
#[derive(Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
    error: Option<ClientError>,
}

impl ClientConfigBuilder {
    /// Create a new builder for the given server and credentials.
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            config: ClientConfig {
                host: host.into(),
                username: username.into(),
                password: password.into(),
                ..Default::default()
            },
            error: None,
        }
    }

    /// Take scheme, host and port from a URL such as `http://localhost:3000`.
    ///
    /// A URL without an explicit port uses the scheme's default.
    pub fn base_url(mut self, base_url: &str) -> Self {
        match url::Url::parse(base_url) {
            Ok(parsed) => {
                self.config.use_ssl = parsed.scheme() == "https";
                if let Some(host) = parsed.host_str() {
                    self.config.host = host.to_string();
                }
                if let Some(port) = parsed.port_or_known_default() {
                    self.config.port = port;
                }
            }
            Err(e) => {
                self.error = Some(ClientError::Config(format!(
                    "Invalid base URL '{}': {}",
                    base_url, e
                )));
            }
        }
        self
    }

    /// Set the server port.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Use HTTPS (true) or plain HTTP (false).
    pub fn use_ssl(mut self, use_ssl: bool) -> Self {
        self.config.use_ssl = use_ssl;
        self
    }

    /// Set the default database for schema and table browsing.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.config.database = Some(database.into());
        self
    }

    /// Set the timeout for SQL execution.
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.config.query_timeout = timeout;
        self
    }

    /// Set the timeout for catalog reads.
    pub fn metadata_timeout(mut self, timeout: Duration) -> Self {
        self.config.metadata_timeout = timeout;
        self
    }

    /// Set the timeout for authentication.
    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.config.auth_timeout = timeout;
        self
    }

    /// Set the total number of attempts per call.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    /// Set the linear backoff base for requests, queries and catalog reads.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    /// Set the linear backoff base for authentication.
    pub fn auth_retry_delay(mut self, delay: Duration) -> Self {
        self.config.auth_retry_delay = delay;
        self
    }

    /// Set the delay between `close()` and the release of the shared session.
    pub fn release_delay(mut self, delay: Duration) -> Self {
        self.config.release_delay = delay;
        self
    }

    /// Set the pause between schemas during prefetch.
    pub fn prefetch_pause(mut self, pause: Duration) -> Self {
        self.config.prefetch_pause = pause;
        self
    }

    /// Disable the background metadata prefetch on connect.
    pub fn no_prefetch(mut self) -> Self {
        self.config.prefetch_metadata = false;
        self
    }

    /// Build the configuration, validating all settings.
    pub fn build(self) -> Result<ClientConfig> {
        if let Some(err) = self.error {
            return Err(err);
        }
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Process-wide settings for a [`SessionManager`](crate::SessionManager).
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// How long a session token is trusted after authentication (default: 2 hours)
    pub token_ttl: Duration,
    /// Freshness window for cached catalog data (default: 30 minutes)
    pub metadata_ttl: Duration,
    /// Period of the background sweep (default: 15 minutes)
    pub sweep_interval: Duration,
    /// Minimum time since the last release before an idle session is evicted (default: 60 seconds)
    pub release_grace: Duration,
    /// Maximum keys kept per cache dimension (default: 1024)
    pub cache_capacity: usize,
    /// TCP connect timeout of the shared HTTP client (default: 5 seconds)
    pub connect_timeout: Duration,
    /// Idle pooled connections kept per host (default: 50)
    pub pool_max_idle_per_host: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            token_ttl: Duration::from_secs(2 * 60 * 60),
            metadata_ttl: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(15 * 60),
            release_grace: Duration::from_secs(60),
            cache_capacity: 1024,
            connect_timeout: Duration::from_secs(5),
            pool_max_idle_per_host: 50,
        }
    }
}

impl ManagerConfig {
    /// Build a configuration from `METABRIDGE_*` environment variables.
    ///
    /// # Environment Variables
    /// - `METABRIDGE_TOKEN_TTL_SECS`
    /// - `METABRIDGE_METADATA_TTL_SECS`
    /// - `METABRIDGE_SWEEP_INTERVAL_SECS`
    /// - `METABRIDGE_RELEASE_GRACE_SECS`
    /// - `METABRIDGE_CACHE_CAPACITY`
    ///
    /// Missing or unparseable values keep their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            token_ttl: env_secs("METABRIDGE_TOKEN_TTL_SECS").unwrap_or(defaults.token_ttl),
            metadata_ttl: env_secs("METABRIDGE_METADATA_TTL_SECS")
                .unwrap_or(defaults.metadata_ttl),
            sweep_interval: env_secs("METABRIDGE_SWEEP_INTERVAL_SECS")
                .unwrap_or(defaults.sweep_interval),
            release_grace: env_secs("METABRIDGE_RELEASE_GRACE_SECS")
                .unwrap_or(defaults.release_grace),
            cache_capacity: env_parse::<usize>("METABRIDGE_CACHE_CAPACITY")
                .unwrap_or(defaults.cache_capacity),
            ..defaults
        }
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    env_parse::<u64>(name).map(Duration::from_secs)
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = %name, value = %raw, "Ignoring unparseable setting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> ClientConfigBuilder {
        ClientConfig::builder("metabase.example.com", "analyst@example.com", "s3cret")
    }

    #[test]
    fn test_default_config() {
        let config = builder().build().unwrap();
        assert_eq!(config.port, 443);
        assert!(config.use_ssl);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.query_timeout, Duration::from_secs(60));
        assert_eq!(config.auth_timeout, Duration::from_secs(8));
        assert_eq!(config.base_url(), "https://metabase.example.com:443");
        assert!(config.prefetch_metadata);
    }

    #[test]
    fn test_builder() {
        let config = builder()
            .port(3000)
            .use_ssl(false)
            .database("Sample Database")
            .query_timeout(Duration::from_secs(120))
            .max_retries(5)
            .no_prefetch()
            .build()
            .unwrap();

        assert_eq!(config.base_url(), "http://metabase.example.com:3000");
        assert_eq!(config.database.as_deref(), Some("Sample Database"));
        assert_eq!(config.query_timeout, Duration::from_secs(120));
        assert_eq!(config.max_retries, 5);
        assert!(!config.prefetch_metadata);
    }

    #[test]
    fn test_base_url_setter() {
        let config = ClientConfig::builder("", "user", "pw")
            .base_url("http://127.0.0.1:3000")
            .build()
            .unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 3000);
        assert!(!config.use_ssl);

        let config = ClientConfig::builder("", "user", "pw")
            .base_url("https://bi.example.com")
            .build()
            .unwrap();
        assert_eq!(config.port, 443);
        assert!(config.use_ssl);
    }

    #[test]
    fn test_invalid_base_url() {
        let result = ClientConfig::builder("", "user", "pw")
            .base_url("not a url")
            .build();
        assert!(matches!(result, Err(ClientError::Config(_))));
    }

    #[test]
    fn test_missing_credentials() {
        assert!(ClientConfig::builder("host", "", "pw").build().is_err());
        assert!(ClientConfig::builder("host", "user", "  ").build().is_err());
        assert!(ClientConfig::builder("", "user", "pw").build().is_err());
    }

    #[test]
    fn test_zero_retries_rejected() {
        let err = builder().max_retries(0).build().unwrap_err();
        assert!(err.to_string().contains("max_retries"));
    }

    #[test]
    fn test_timeout_too_small() {
        let err = builder()
            .metadata_timeout(Duration::from_millis(50))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("metadata_timeout"));

        assert!(builder()
            .auth_timeout(ClientConfig::MIN_TIMEOUT)
            .build()
            .is_ok());
    }

    #[test]
    fn test_password_masked_in_debug() {
        let config = ClientConfig::builder("host", "user", "super_secret_password")
            .build()
            .unwrap();
        let debug_output = format!("{:?}", config);

        assert!(!debug_output.contains("super_secret_password"));
        assert!(debug_output.contains("REDACTED"));
    }

    #[test]
    fn test_manager_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.token_ttl, Duration::from_secs(7200));
        assert_eq!(config.metadata_ttl, Duration::from_secs(1800));
        assert_eq!(config.sweep_interval, Duration::from_secs(900));
        assert_eq!(config.release_grace, Duration::from_secs(60));
    }
}
