//! Resolved, immutable flow configuration.

use std::fmt;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};

use crate::crypto::{Cipher, CryptoBox};
use crate::error::{config_error, Error};

/// Configuration shared read-only by every request once the orchestrator is built.
#[derive(Clone)]
pub struct Config {
    base_url: String,
    secret: SecretString,
    default_provider: String,
    login_page_url: String,
    cipher: Arc<dyn Cipher>,
}

impl Config {
    pub fn builder(base_url: impl Into<String>, secret: SecretString) -> ConfigBuilder {
        ConfigBuilder {
            base_url: base_url.into(),
            secret,
            default_provider: None,
            login_page_url: None,
            cipher: None,
        }
    }

    /// Base URL the flow routes are mounted under, without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn secret(&self) -> &SecretString {
        &self.secret
    }

    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    pub fn login_page_url(&self) -> &str {
        &self.login_page_url
    }

    pub fn cipher(&self) -> &Arc<dyn Cipher> {
        &self.cipher
    }

    pub async fn encrypt(&self, plaintext: &str) -> Result<String, Error> {
        self.cipher.encrypt(plaintext).await
    }

    pub async fn decrypt(&self, ciphertext: &str) -> Result<String, Error> {
        self.cipher.decrypt(ciphertext).await
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Config")
            .field("base_url", &self.base_url)
            .field("default_provider", &self.default_provider)
            .field("login_page_url", &self.login_page_url)
            .finish_non_exhaustive()
    }
}

/// Collects configuration before the provider registry is known.
pub struct ConfigBuilder {
    base_url: String,
    secret: SecretString,
    default_provider: Option<String>,
    login_page_url: Option<String>,
    cipher: Option<Arc<dyn Cipher>>,
}

impl ConfigBuilder {
    /// Provider to send users to when a route names an unknown provider.
    pub fn default_provider(mut self, provider: impl Into<String>) -> Self {
        self.default_provider = Some(provider.into());
        self
    }

    pub fn login_page_url(mut self, url: impl Into<String>) -> Self {
        self.login_page_url = Some(url.into());
        self
    }

    /// Replace the default `CryptoBox` with a custom cipher.
    pub fn cipher(mut self, cipher: Arc<dyn Cipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Resolve defaults against the registered provider names.
    ///
    /// The default provider falls back to the first registered provider and the
    /// login page falls back to that provider's authorize route.
    pub fn resolve(self, provider_names: &[&str]) -> Result<Config, Error> {
        if self.secret.expose_secret().is_empty() {
            return Err(config_error("A non-empty secret is required"));
        }

        let default_provider = match self.default_provider {
            Some(provider) => provider,
            None => provider_names
                .first()
                .map(|name| name.to_string())
                .ok_or_else(|| config_error("At least one provider must be registered"))?,
        };

        let base_url = self.base_url.trim_end_matches('/').to_string();
        let login_page_url = self
            .login_page_url
            .unwrap_or_else(|| format!("{}/{}/authorize", base_url, default_provider));
        let cipher = match self.cipher {
            Some(cipher) => cipher,
            None => Arc::new(CryptoBox::new(&self.secret)),
        };

        Ok(Config {
            base_url,
            secret: self.secret,
            default_provider,
            login_page_url,
            cipher,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> SecretString {
        SecretString::new("test-secret".to_string())
    }

    #[test]
    fn test_defaults_follow_first_provider() {
        let config = Config::builder("https://host.test/api/auth/", secret())
            .resolve(&["discord", "azure.tenant"])
            .unwrap();

        assert_eq!(config.base_url(), "https://host.test/api/auth");
        assert_eq!(config.default_provider(), "discord");
        assert_eq!(
            config.login_page_url(),
            "https://host.test/api/auth/discord/authorize"
        );
    }

    #[test]
    fn test_explicit_values_win() {
        let config = Config::builder("https://host.test", secret())
            .default_provider("azure.tenant")
            .login_page_url("/login")
            .resolve(&["discord", "azure.tenant"])
            .unwrap();

        assert_eq!(config.default_provider(), "azure.tenant");
        assert_eq!(config.login_page_url(), "/login");
    }

    #[test]
    fn test_empty_secret_is_rejected() {
        let result = Config::builder("https://host.test", SecretString::new(String::new()))
            .resolve(&["discord"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_no_providers_is_rejected() {
        let result = Config::builder("https://host.test", secret()).resolve(&[]);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_resolved_cipher_round_trips() {
        let config = Config::builder("https://host.test", secret())
            .resolve(&["discord"])
            .unwrap();
        let sealed = config.encrypt("hello").await.unwrap();
        assert_eq!(config.decrypt(&sealed).await.unwrap(), "hello");
    }
}
