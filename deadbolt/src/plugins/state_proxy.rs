//! Cross-origin state proxy.
//!
//! A satellite deployment embeds its own callback path in the encrypted `state`. The
//! central host registered with the identity provider receives the callback,
//! decrypts the state and forwards `state`, `code` and `referer` back to the
//! satellite, provided the path and provider are allowed.

use std::sync::Arc;

use async_trait::async_trait;
use log::*;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::context::RequestContext;
use crate::error::Error;
use crate::hooks::{Hook, Plugin, PluginSource};

/// An allowed forwarding target.
#[derive(Debug, Clone)]
pub enum OriginPattern {
    /// Case-insensitive prefix of the target path.
    Prefix(String),
    Pattern(Regex),
}

impl OriginPattern {
    pub fn matches(&self, path: &str) -> bool {
        match self {
            OriginPattern::Prefix(prefix) => path
                .to_lowercase()
                .starts_with(&prefix.to_lowercase()),
            OriginPattern::Pattern(pattern) => pattern.is_match(path),
        }
    }
}

impl From<&str> for OriginPattern {
    fn from(prefix: &str) -> Self {
        OriginPattern::Prefix(prefix.to_string())
    }
}

impl From<String> for OriginPattern {
    fn from(prefix: String) -> Self {
        OriginPattern::Prefix(prefix)
    }
}

impl From<Regex> for OriginPattern {
    fn from(pattern: Regex) -> Self {
        OriginPattern::Pattern(pattern)
    }
}

#[derive(Debug, Clone)]
pub struct StateProxyOptions {
    pub proxy_to: String,
    /// Defaults to `proxy_to` and the configured base URL.
    pub allowed_origins: Option<Vec<OriginPattern>>,
    /// Empty allows every provider.
    pub allowed_providers: Vec<String>,
}

impl StateProxyOptions {
    pub fn new(proxy_to: impl Into<String>) -> Self {
        Self {
            proxy_to: proxy_to.into(),
            allowed_origins: None,
            allowed_providers: Vec::new(),
        }
    }

    pub fn allowed_origins(mut self, origins: Vec<OriginPattern>) -> Self {
        self.allowed_origins = Some(origins);
        self
    }

    pub fn allowed_providers(mut self, providers: Vec<String>) -> Self {
        self.allowed_providers = providers;
        self
    }

    /// Plugin source resolving the default origins against the configuration.
    pub fn into_plugin(self) -> PluginSource {
        PluginSource::init(move |config: &Config| Arc::new(StateProxy::new(self, config)) as Arc<dyn Plugin>)
    }
}

/// Payload of a proxied state.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProxiedState {
    path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    referer: Option<String>,
    #[serde(default)]
    provider: String,
}

#[derive(Debug, Clone)]
pub struct StateProxy {
    proxy_to: String,
    allowed_origins: Vec<OriginPattern>,
    allowed_providers: Vec<String>,
}

impl StateProxy {
    pub fn new(options: StateProxyOptions, config: &Config) -> Self {
        let proxy_to = options.proxy_to.trim_end_matches('/').to_string();
        let allowed_origins = options.allowed_origins.unwrap_or_else(|| {
            vec![
                OriginPattern::from(proxy_to.clone()),
                OriginPattern::from(config.base_url()),
            ]
        });
        Self {
            proxy_to,
            allowed_origins,
            allowed_providers: options.allowed_providers,
        }
    }

    fn origin_allowed(&self, path: &str) -> bool {
        self.allowed_origins.iter().any(|origin| origin.matches(path))
    }

    fn provider_allowed(&self, provider: &str) -> bool {
        self.allowed_providers.is_empty() || self.allowed_providers.iter().any(|p| p == provider)
    }

    async fn open(&self, ctx: &RequestContext, state: &str) -> Option<ProxiedState> {
        let json = match ctx.config.decrypt(state).await {
            Ok(json) => json,
            Err(e) => {
                debug!("State is not a proxied state: {}", e);
                return None;
            }
        };
        serde_json::from_str(&json)
            .map_err(|e| debug!("Proxied state is malformed: {}", e))
            .ok()
    }
}

#[async_trait]
impl Plugin for StateProxy {
    fn hooks(&self) -> &'static [Hook] {
        &[Hook::GenerateState, Hook::ReviveState]
    }

    async fn generate_state(&self, ctx: &mut RequestContext) -> Result<bool, Error> {
        let proxied = ProxiedState {
            path: format!("{}/{}/{}", self.proxy_to, ctx.flow.provider, ctx.flow.step()),
            referer: ctx.flow.referer.clone(),
            provider: ctx.flow.provider.clone(),
        };
        let sealed = ctx.config.encrypt(&serde_json::to_string(&proxied)?).await?;
        ctx.flow.state = Some(sealed);
        Ok(false)
    }

    async fn revive_state(&self, ctx: &mut RequestContext) -> Result<bool, Error> {
        if ctx.flow.forwarded {
            return Ok(false);
        }
        let (Some(state), Some(code)) = (ctx.flow.state.clone(), ctx.flow.code.clone()) else {
            return Ok(false);
        };
        let Some(proxied) = self.open(ctx, &state).await else {
            return Ok(false);
        };

        if !self.origin_allowed(&proxied.path) {
            warn!("Refusing to forward a callback to {}", proxied.path);
            return Ok(false);
        }
        if !self.provider_allowed(&proxied.provider) {
            warn!("Refusing to forward a callback for provider {}", proxied.provider);
            return Ok(false);
        }

        let referer = proxied.referer.or_else(|| ctx.flow.referer.clone());
        let mut params = vec![("state", state.as_str()), ("code", code.as_str())];
        if let Some(referer) = referer.as_deref() {
            params.push(("referer", referer));
        }
        params.push(("forwarded", "1"));

        if ctx.redirect(&proxied.path, &params)? {
            info!("Forwarded {} callback to {}", proxied.provider, proxied.path);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FlowResponse;
    use crate::cookies::CookieJar;
    use crate::plugins::tests::{callback_context, test_config, test_context};

    fn proxy(options: StateProxyOptions) -> StateProxy {
        StateProxy::new(options, &test_config())
    }

    async fn sealed_state(path: &str, provider: &str) -> String {
        let json = serde_json::to_string(&ProxiedState {
            path: path.to_string(),
            referer: Some("/dashboard".to_string()),
            provider: provider.to_string(),
        })
        .unwrap();
        test_config().encrypt(&json).await.unwrap()
    }

    #[test]
    fn test_origin_patterns() {
        assert!(OriginPattern::from("https://A.test").matches("https://a.test/discord/authorize"));
        assert!(!OriginPattern::from("https://a.test").matches("https://b.test/"));
        let pattern = OriginPattern::from(Regex::new(r"^https://[a-z]+\.preview\.test/").unwrap());
        assert!(pattern.matches("https://pr.preview.test/discord/authorize"));
        assert!(!pattern.matches("https://evil.test/?x=preview.test/"));
    }

    #[test]
    fn test_default_origins_are_proxy_target_and_base_url() {
        let proxy = proxy(StateProxyOptions::new("https://satellite.test/"));
        assert!(proxy.origin_allowed("https://satellite.test/discord/authorize"));
        assert!(proxy.origin_allowed("https://host.test/api/auth/discord/authorize"));
        assert!(!proxy.origin_allowed("https://other.test/"));
    }

    #[tokio::test]
    async fn test_generated_state_embeds_callback_path() {
        let proxy = proxy(StateProxyOptions::new("https://satellite.test"));
        let mut ctx = test_context(None);
        ctx.flow.referer = Some("/dashboard".to_string());
        proxy.generate_state(&mut ctx).await.unwrap();

        let opened = proxy.open(&ctx, ctx.flow.state.as_deref().unwrap()).await.unwrap();
        assert_eq!(opened.path, "https://satellite.test/discord/authorize");
        assert_eq!(opened.provider, "discord");
        assert_eq!(opened.referer.as_deref(), Some("/dashboard"));
    }

    #[tokio::test]
    async fn test_allowed_callback_is_forwarded() {
        let proxy = proxy(StateProxyOptions::new("https://satellite.test"));
        let state = sealed_state("https://satellite.test/discord/authorize", "discord").await;
        let mut ctx = callback_context(CookieJar::default(), &state, Some(FlowResponse::ok()));

        assert!(proxy.revive_state(&mut ctx).await.unwrap());
        let location = url::Url::parse(ctx.redirected_to().unwrap()).unwrap();
        let params: Vec<(String, String)> = location.query_pairs().into_owned().collect();
        assert_eq!(location.host_str(), Some("satellite.test"));
        assert!(params.contains(&("state".to_string(), state.clone())));
        assert!(params.contains(&("code".to_string(), "c1".to_string())));
        assert!(params.contains(&("referer".to_string(), "/dashboard".to_string())));
        assert!(params.contains(&("forwarded".to_string(), "1".to_string())));
    }

    #[tokio::test]
    async fn test_disallowed_origin_is_not_handled() {
        let proxy = proxy(
            StateProxyOptions::new("https://a.test").allowed_origins(vec!["https://a.test".into()]),
        );
        let state = sealed_state("https://b.test/discord/authorize", "discord").await;
        let mut ctx = callback_context(CookieJar::default(), &state, Some(FlowResponse::ok()));

        assert!(!proxy.revive_state(&mut ctx).await.unwrap());
        assert_eq!(ctx.redirected_to(), None);
    }

    #[tokio::test]
    async fn test_disallowed_provider_is_not_handled() {
        let proxy = proxy(
            StateProxyOptions::new("https://a.test").allowed_providers(vec!["azure.t".to_string()]),
        );
        let state = sealed_state("https://a.test/discord/authorize", "discord").await;
        let mut ctx = callback_context(CookieJar::default(), &state, Some(FlowResponse::ok()));

        assert!(!proxy.revive_state(&mut ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_plain_random_state_is_not_handled() {
        let proxy = proxy(StateProxyOptions::new("https://a.test"));
        let mut ctx = callback_context(CookieJar::default(), "cmFuZG9t", Some(FlowResponse::ok()));
        assert!(!proxy.revive_state(&mut ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_forwarded_callback_is_not_forwarded_again() {
        let proxy = proxy(StateProxyOptions::new("https://satellite.test"));
        let state = sealed_state("https://satellite.test/discord/authorize", "discord").await;
        let mut ctx = callback_context(CookieJar::default(), &state, Some(FlowResponse::ok()));
        ctx.flow.forwarded = true;

        assert!(!proxy.revive_state(&mut ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_handled_without_redirect_channel() {
        let proxy = proxy(StateProxyOptions::new("https://satellite.test"));
        let state = sealed_state("https://satellite.test/discord/authorize", "discord").await;
        let mut ctx = callback_context(CookieJar::default(), &state, None);

        assert!(proxy.revive_state(&mut ctx).await.unwrap());
    }
}
