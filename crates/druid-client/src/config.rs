//! Client configuration and builder pattern.

use crate::cluster::mapper::{IdentityMapper, ServiceMapper};
use crate::consts;
use crate::error::{ClientError, Result};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for the Druid client.
///
/// The same configuration is reused, with a different `base_url`, for every
/// cluster endpoint discovered by the topology.
///
/// # Security
///
/// The `Debug` implementation masks the password to prevent accidental
/// exposure in logs.
#[derive(Clone)]
pub struct ClientConfig {
    /// Base URL of the Router (or a Broker), e.g. "http://localhost:8888"
    pub base_url: String,
    /// Optional user for HTTP basic authentication
    pub username: Option<String>,
    /// Optional password for HTTP basic authentication
    pub password: Option<String>,
    /// Request timeout (default: 30 seconds)
    pub timeout: Duration,
    /// Maximum number of retries for transient failures (default: 2)
    pub max_retries: u32,
    /// Initial retry delay for exponential backoff (default: 100ms)
    pub retry_initial_delay: Duration,
    /// Maximum retry delay (default: 5 seconds)
    pub retry_max_delay: Duration,
    /// Whether to verify TLS certificates (default: true)
    pub tls_verify: bool,
    /// User-Agent header value
    pub user_agent: String,
    /// Prefer the TLS port of discovered services when both are offered
    pub prefer_tls: bool,
    /// Maps addresses reported by the cluster to addresses reachable from here
    pub service_mapper: Arc<dyn ServiceMapper>,
    /// Poll interval for broker-async and direct-worker queries (default: 100ms)
    pub async_poll_interval: Duration,
    /// Poll interval for indexer tasks (default: 1 second)
    pub task_poll_interval: Duration,
    /// Server-side long-poll timeout sent with async status requests (default: 10s)
    pub async_status_timeout: Duration,
    /// Upper bound on `join()`; `None` waits until the query is terminal
    pub join_timeout: Option<Duration>,
    /// Role offered by servers that run queries directly (default: "talaria")
    pub worker_role: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8888".to_string(),
            username: None,
            password: None,
            timeout: Duration::from_secs(30),
            max_retries: 2,
            retry_initial_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_secs(5),
            tls_verify: true,
            user_agent: format!("druid-client/{}", env!("CARGO_PKG_VERSION")),
            prefer_tls: false,
            service_mapper: Arc::new(IdentityMapper),
            async_poll_interval: Duration::from_millis(100),
            task_poll_interval: Duration::from_secs(1),
            async_status_timeout: Duration::from_secs(10),
            join_timeout: None,
            worker_role: consts::TALARIA_ROLE.to_string(),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***REDACTED***"))
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_initial_delay", &self.retry_initial_delay)
            .field("retry_max_delay", &self.retry_max_delay)
            .field("tls_verify", &self.tls_verify)
            .field("user_agent", &self.user_agent)
            .field("prefer_tls", &self.prefer_tls)
            .field("service_mapper", &self.service_mapper)
            .field("async_poll_interval", &self.async_poll_interval)
            .field("task_poll_interval", &self.task_poll_interval)
            .field("async_status_timeout", &self.async_status_timeout)
            .field("join_timeout", &self.join_timeout)
            .field("worker_role", &self.worker_role)
            .finish()
    }
}

impl ClientConfig {
    /// Create a new configuration builder.
    pub fn builder(base_url: impl Into<String>) -> ClientConfigBuilder {
        ClientConfigBuilder::new(base_url)
    }

    /// Minimum allowed timeout value.
    pub const MIN_TIMEOUT: Duration = Duration::from_millis(100);

    /// Returns a copy of this configuration pointing at another endpoint.
    pub fn for_endpoint(&self, base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..self.clone()
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(ClientError::Config("base_url cannot be empty".to_string()));
        }

        url::Url::parse(&self.base_url)
            .map_err(|e| ClientError::Config(format!("Invalid base_url: {}", e)))?;

        if self.password.is_some() && self.username.is_none() {
            return Err(ClientError::Config(
                "password requires a username".to_string(),
            ));
        }

        if self.retry_initial_delay > self.retry_max_delay {
            return Err(ClientError::Config(format!(
                "retry_initial_delay ({:?}) must be <= retry_max_delay ({:?})",
                self.retry_initial_delay, self.retry_max_delay
            )));
        }

        if self.timeout < Self::MIN_TIMEOUT {
            return Err(ClientError::Config(format!(
                "timeout ({:?}) must be >= {:?}",
                self.timeout,
                Self::MIN_TIMEOUT
            )));
        }

        if self.async_poll_interval.is_zero() || self.task_poll_interval.is_zero() {
            return Err(ClientError::Config(
                "poll intervals must be > 0".to_string(),
            ));
        }

        if self.worker_role.trim().is_empty() {
            return Err(ClientError::Config("worker_role cannot be blank".to_string()));
        }

        Ok(())
    }
}

/// Builder for client configuration.
#[derive(Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Create a new builder with the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            config: ClientConfig {
                base_url: base_url.into(),
                ..Default::default()
            },
        }
    }

    /// Set credentials for HTTP basic authentication.
    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.username = Some(username.into());
        self.config.password = Some(password.into());
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the maximum number of retries.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    /// Set the initial retry delay for exponential backoff.
    pub fn retry_initial_delay(mut self, delay: Duration) -> Self {
        self.config.retry_initial_delay = delay;
        self
    }

    /// Set the maximum retry delay.
    pub fn retry_max_delay(mut self, delay: Duration) -> Self {
        self.config.retry_max_delay = delay;
        self
    }

    /// Set whether to verify TLS certificates.
    pub fn tls_verify(mut self, verify: bool) -> Self {
        self.config.tls_verify = verify;
        self
    }

    /// Set a custom User-Agent header.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Prefer TLS ports when mapping discovered services.
    pub fn prefer_tls(mut self, prefer: bool) -> Self {
        self.config.prefer_tls = prefer;
        self
    }

    /// Set the address mapping policy for discovered services.
    pub fn service_mapper(mut self, mapper: impl ServiceMapper + 'static) -> Self {
        self.config.service_mapper = Arc::new(mapper);
        self
    }

    /// Set the poll interval used by broker-async and direct-worker queries.
    pub fn async_poll_interval(mut self, interval: Duration) -> Self {
        self.config.async_poll_interval = interval;
        self
    }

    /// Set the poll interval used by indexer tasks.
    pub fn task_poll_interval(mut self, interval: Duration) -> Self {
        self.config.task_poll_interval = interval;
        self
    }

    /// Set the server-side long-poll timeout for async status requests.
    pub fn async_status_timeout(mut self, timeout: Duration) -> Self {
        self.config.async_status_timeout = timeout;
        self
    }

    /// Bound the time `join()` waits for a terminal state.
    pub fn join_timeout(mut self, timeout: Duration) -> Self {
        self.config.join_timeout = Some(timeout);
        self
    }

    /// Set the role name of servers that execute queries directly.
    pub fn worker_role(mut self, role: impl Into<String>) -> Self {
        self.config.worker_role = role.into();
        self
    }

    /// Build the configuration, validating all settings.
    pub fn build(self) -> Result<ClientConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::mapper::DockerMapper;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, "http://localhost:8888");
        assert!(config.username.is_none());
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.async_poll_interval, Duration::from_millis(100));
        assert_eq!(config.task_poll_interval, Duration::from_secs(1));
        assert!(config.join_timeout.is_none());
        assert_eq!(config.worker_role, "talaria");
    }

    #[test]
    fn test_builder() {
        let config = ClientConfig::builder("https://druid.example.com:9088")
            .basic_auth("admin", "secret")
            .timeout(Duration::from_secs(60))
            .max_retries(5)
            .prefer_tls(true)
            .join_timeout(Duration::from_secs(300))
            .service_mapper(DockerMapper::new("docker-host", &[(18081, 8081)]))
            .build()
            .unwrap();

        assert_eq!(config.base_url, "https://druid.example.com:9088");
        assert_eq!(config.username.as_deref(), Some("admin"));
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.max_retries, 5);
        assert!(config.prefer_tls);
        assert_eq!(config.join_timeout, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_for_endpoint_keeps_settings() {
        let config = ClientConfig::builder("http://router:8888")
            .basic_auth("admin", "secret")
            .build()
            .unwrap();
        let coord = config.for_endpoint("http://coordinator:8081");

        assert_eq!(coord.base_url, "http://coordinator:8081");
        assert_eq!(coord.username.as_deref(), Some("admin"));
        assert_eq!(coord.timeout, config.timeout);
    }

    #[test]
    fn test_invalid_url() {
        assert!(ClientConfig::builder("not a valid url").build().is_err());
        assert!(ClientConfig::builder("").build().is_err());
    }

    #[test]
    fn test_password_masked_in_debug() {
        let config = ClientConfig::builder("http://localhost:8888")
            .basic_auth("admin", "super_secret_password")
            .build()
            .unwrap();

        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("super_secret_password"));
        assert!(debug_output.contains("REDACTED"));
        assert!(debug_output.contains("admin"));
    }

    #[test]
    fn test_retry_delay_validation() {
        let result = ClientConfig::builder("http://localhost:8888")
            .retry_initial_delay(Duration::from_secs(10))
            .retry_max_delay(Duration::from_secs(1))
            .build();

        let err = result.unwrap_err();
        assert!(err.to_string().contains("retry_initial_delay"));
    }

    #[test]
    fn test_timeout_too_small() {
        let result = ClientConfig::builder("http://localhost:8888")
            .timeout(Duration::from_millis(50))
            .build();
        assert!(result.unwrap_err().to_string().contains("timeout"));

        let result = ClientConfig::builder("http://localhost:8888")
            .timeout(ClientConfig::MIN_TIMEOUT)
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let result = ClientConfig::builder("http://localhost:8888")
            .async_poll_interval(Duration::ZERO)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_blank_worker_role_rejected() {
        let result = ClientConfig::builder("http://localhost:8888")
            .worker_role("  ")
            .build();
        assert!(result.is_err());
    }
}
