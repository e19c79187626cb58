use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use secrecy::SecretString;
use std::fmt;
use std::str::FromStr;

/// Default public URL of the flow routes, including the mount path.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:4000/api/auth";

#[derive(Clone, Debug, PartialEq)]
pub enum RustEnv {
    Development,
    Production,
    Staging,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RustEnvParseError(String);

impl fmt::Display for RustEnvParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "unknown runtime environment: {}", self.0)
    }
}

impl std::error::Error for RustEnvParseError {}

impl FromStr for RustEnv {
    type Err = RustEnvParseError;
    fn from_str(level: &str) -> Result<RustEnv, Self::Err> {
        match level.to_lowercase().as_str() {
            "development" => Ok(RustEnv::Development),
            "production" => Ok(RustEnv::Production),
            "staging" => Ok(RustEnv::Staging),
            other => Err(RustEnvParseError(other.to_string())),
        }
    }
}

impl fmt::Display for RustEnv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RustEnv::Development => write!(f, "development"),
            RustEnv::Production => write!(f, "production"),
            RustEnv::Staging => write!(f, "staging"),
        }
    }
}

/// Client credentials for one Azure / Entra ID tenant.
#[derive(Clone, Debug)]
pub struct AzureCredentials {
    pub tenant: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub scope: Option<String>,
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Public URL under which the flow routes are mounted, e.g. https://example.com/api/auth
    #[arg(long, env, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Secret the state and token encryption key is derived from.
    #[arg(long, env, hide_env_values = true)]
    secret: String,

    /// Provider used when a flow route names an unknown provider. Defaults to the
    /// first configured provider.
    #[arg(long, env)]
    pub default_provider: Option<String>,

    /// Where users are sent when a guarded route needs them to log in again.
    #[arg(long, env)]
    pub login_page_url: Option<String>,

    /// The host interface to listen for incoming connections
    #[arg(short, long, env, default_value = "127.0.0.1")]
    pub interface: String,

    /// The host TCP port to listen for incoming connections
    #[arg(short, long, env, default_value_t = 4000)]
    pub port: u16,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(short, long, env, default_value_t = LevelFilter::Info)]
    pub log_level_filter: LevelFilter,

    /// Set the Rust runtime environment to use.
    #[arg(short, long, env, default_value_t = RustEnv::Development)]
    pub runtime_env: RustEnv,

    /// Discord application client ID. Discord is registered only when both ID and secret are set.
    #[arg(long, env)]
    discord_client_id: Option<String>,

    #[arg(long, env, hide_env_values = true)]
    discord_client_secret: Option<String>,

    #[arg(long, env, default_value = "identify")]
    pub discord_scope: String,

    /// Azure / Entra ID tenant. The provider is registered as `azure.{tenant}`.
    #[arg(long, env)]
    azure_tenant: Option<String>,

    #[arg(long, env)]
    azure_client_id: Option<String>,

    #[arg(long, env, hide_env_values = true)]
    azure_client_secret: Option<String>,

    /// Overrides the default `{client_id}/.default` scope.
    #[arg(long, env)]
    azure_scope: Option<String>,

    /// Central host that receives provider callbacks for this deployment. Enables the state proxy.
    #[arg(long, env)]
    pub proxy_to: Option<String>,

    /// Origins the state proxy may forward callbacks to.
    #[arg(long, env, value_delimiter = ',')]
    pub allowed_origins: Vec<String>,

    /// Providers the state proxy may forward callbacks for. Empty allows all.
    #[arg(long, env, value_delimiter = ',')]
    pub allowed_providers: Vec<String>,

    /// Prefix of the cookies written by the cookie storage plugin.
    #[arg(long, env, default_value = "oauth2")]
    pub cookie_name: String,

    /// Timeout in seconds for requests to identity providers
    #[arg(long, env, default_value_t = 30)]
    pub http_timeout_secs: u64,

    /// Retries for transient failures talking to identity providers
    #[arg(long, env, default_value_t = 2)]
    pub http_max_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn secret(&self) -> SecretString {
        SecretString::new(self.secret.clone())
    }

    /// Discord client ID and secret, when both are configured.
    pub fn discord_credentials(&self) -> Option<(String, SecretString)> {
        match (&self.discord_client_id, &self.discord_client_secret) {
            (Some(id), Some(secret)) => Some((id.clone(), SecretString::new(secret.clone()))),
            _ => None,
        }
    }

    /// Azure tenant credentials, when tenant, client ID and secret are configured.
    pub fn azure_credentials(&self) -> Option<AzureCredentials> {
        match (&self.azure_tenant, &self.azure_client_id, &self.azure_client_secret) {
            (Some(tenant), Some(client_id), Some(secret)) => Some(AzureCredentials {
                tenant: tenant.clone(),
                client_id: client_id.clone(),
                client_secret: SecretString::new(secret.clone()),
                scope: self.azure_scope.clone(),
            }),
            _ => None,
        }
    }

    /// Path component of the base URL, where the flow router is nested.
    pub fn mount_path(&self) -> String {
        let without_scheme = self
            .base_url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.base_url);
        match without_scheme.find('/') {
            Some(index) => without_scheme[index..].trim_end_matches('/').to_string(),
            None => String::new(),
        }
    }

    pub fn runtime_env(&self) -> RustEnv {
        self.runtime_env.clone()
    }

    pub fn is_production(&self) -> bool {
        self.runtime_env() == RustEnv::Production
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["deadbolt_rs", "--secret", "s3cret"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.cookie_name, "oauth2");
        assert_eq!(config.log_level_filter, LevelFilter::Info);
        assert_eq!(config.secret().expose_secret(), "s3cret");
        assert!(config.discord_credentials().is_none());
        assert!(config.azure_credentials().is_none());
        assert!(!config.is_production());
    }

    #[test]
    fn test_provider_credentials_need_every_part() {
        let config = parse(&["--discord-client-id", "id-1"]);
        assert!(config.discord_credentials().is_none());

        let config = parse(&[
            "--discord-client-id",
            "id-1",
            "--discord-client-secret",
            "shh",
            "--azure-tenant",
            "contoso",
            "--azure-client-id",
            "app-1",
            "--azure-client-secret",
            "shh",
        ]);
        let (id, secret) = config.discord_credentials().unwrap();
        assert_eq!(id, "id-1");
        assert_eq!(secret.expose_secret(), "shh");
        let azure = config.azure_credentials().unwrap();
        assert_eq!(azure.tenant, "contoso");
        assert!(azure.scope.is_none());
    }

    #[test]
    fn test_list_values_are_comma_delimited() {
        let config = parse(&[
            "--allowed-origins",
            "https://a.test,https://b.test",
            "--allowed-providers",
            "discord",
        ]);
        assert_eq!(config.allowed_origins, vec!["https://a.test", "https://b.test"]);
        assert_eq!(config.allowed_providers, vec!["discord"]);
    }

    #[test]
    fn test_mount_path() {
        assert_eq!(parse(&[]).mount_path(), "/api/auth");
        assert_eq!(parse(&["--base-url", "https://auth.test/"]).mount_path(), "");
        assert_eq!(parse(&["--base-url", "https://auth.test"]).mount_path(), "");
    }

    #[test]
    fn test_runtime_env_parsing() {
        assert_eq!("PRODUCTION".parse::<RustEnv>(), Ok(RustEnv::Production));
        assert!("nowhere".parse::<RustEnv>().is_err());
        assert!(parse(&["--runtime-env", "production"]).is_production());
    }

    #[test]
    fn test_missing_secret_is_rejected() {
        assert!(Config::try_parse_from(["deadbolt_rs"]).is_err());
    }
}
