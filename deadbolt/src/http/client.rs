//! Provider HTTP client builder with retry middleware.

use std::time::Duration;

use reqwest_middleware::ClientBuilder;
use reqwest_retry::RetryTransientMiddleware;

use super::BackoffPolicy;
use crate::error::Error;

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout.
    pub timeout: Duration,
    /// Retries of transient failures (5xx, 429, connection errors).
    pub max_retries: u32,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 2,
            user_agent: format!("deadbolt/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Client used to reach identity provider endpoints.
pub type HttpClient = reqwest_middleware::ClientWithMiddleware;

/// Builder for provider HTTP clients.
pub struct HttpClientBuilder {
    config: HttpClientConfig,
}

impl HttpClientBuilder {
    pub fn new() -> Self {
        Self {
            config: HttpClientConfig::default(),
        }
    }

    pub fn with_config(config: HttpClientConfig) -> Self {
        Self { config }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn build(self) -> Result<HttpClient, Error> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(self.config.timeout)
            .user_agent(self.config.user_agent)
            .build()?;

        let mut builder = ClientBuilder::new(client);
        if self.config.max_retries > 0 {
            let policy = BackoffPolicy::new(self.config.max_retries);
            builder = builder.with(RetryTransientMiddleware::new_with_policy(policy));
        }
        Ok(builder.build())
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = HttpClientBuilder::new();
        assert_eq!(builder.config.timeout, Duration::from_secs(30));
        assert_eq!(builder.config.max_retries, 2);
        assert!(builder.config.user_agent.starts_with("deadbolt/"));
    }

    #[test]
    fn test_builder_overrides() {
        let builder = HttpClientBuilder::new()
            .with_timeout(Duration::from_secs(5))
            .with_max_retries(0);
        assert_eq!(builder.config.timeout, Duration::from_secs(5));
        assert_eq!(builder.config.max_retries, 0);
    }

    #[tokio::test]
    async fn test_build_client() {
        assert!(HttpClientBuilder::new().build().is_ok());
        assert!(HttpClientBuilder::new().with_max_retries(0).build().is_ok());
    }
}
