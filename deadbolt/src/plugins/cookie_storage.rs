//! Flow state and token storage in encrypted cookies.
//!
//! State lives in `{name}.state`, tokens of each connected provider in
//! `{name}.data.{provider}`. Profile data (`.data`) is never written to cookies; it
//! is reloaded from the provider when needed.

use async_trait::async_trait;
use log::*;

use super::FlowSnapshot;
use crate::context::{ProviderData, RequestContext};
use crate::cookies::CookieOptions;
use crate::error::Error;
use crate::hooks::{Hook, Plugin};

pub const DEFAULT_COOKIE_NAME: &str = "oauth2";

#[derive(Debug, Clone)]
pub struct CookieStorage {
    name: String,
    cookie: CookieOptions,
    save_data: bool,
}

impl Default for CookieStorage {
    fn default() -> Self {
        Self {
            name: DEFAULT_COOKIE_NAME.to_string(),
            cookie: CookieOptions::default(),
            save_data: true,
        }
    }
}

impl CookieStorage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn cookie_options(mut self, cookie: CookieOptions) -> Self {
        self.cookie = cookie;
        self
    }

    /// Only keep the flow state in cookies; tokens go elsewhere.
    pub fn without_data(mut self) -> Self {
        self.save_data = false;
        self
    }

    fn state_cookie(&self) -> String {
        format!("{}.state", self.name)
    }

    fn data_prefix(&self) -> String {
        format!("{}.data.", self.name)
    }
}

#[async_trait]
impl Plugin for CookieStorage {
    fn hooks(&self) -> &'static [Hook] {
        &[
            Hook::StoreState,
            Hook::RetrieveState,
            Hook::StoreData,
            Hook::RetrieveData,
        ]
    }

    async fn store_state(&self, ctx: &mut RequestContext) -> Result<bool, Error> {
        let name = self.state_cookie();
        if ctx.flow.state.is_none() {
            ctx.cookies.set(name, "", self.cookie.expired())?;
            return Ok(false);
        }

        let snapshot = serde_json::to_string(&FlowSnapshot::of(&ctx.flow))?;
        let sealed = ctx.config.encrypt(&snapshot).await?;
        ctx.cookies.set(name, sealed, self.cookie.clone())?;
        Ok(false)
    }

    async fn retrieve_state(&self, ctx: &mut RequestContext) -> Result<bool, Error> {
        let Some(sealed) = ctx
            .cookies
            .get(&self.state_cookie())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
        else {
            return Ok(false);
        };

        let stored: FlowSnapshot = match ctx.config.decrypt(&sealed).await {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(stored) => stored,
                Err(e) => {
                    debug!("Ignoring unreadable state cookie: {}", e);
                    return Ok(false);
                }
            },
            Err(e) => {
                debug!("Ignoring state cookie that failed to decrypt: {}", e);
                return Ok(false);
            }
        };

        if let (Some(incoming), Some(expected)) = (&ctx.flow.state, &stored.state) {
            if incoming != expected {
                warn!(
                    "Callback state for {} does not match the stored state",
                    ctx.flow.provider
                );
                ctx.flow.state_mismatch = true;
                return Ok(false);
            }
        }

        let flow = &mut ctx.flow;
        if flow.state.is_none() {
            flow.state = stored.state;
        }
        if flow.code.is_none() {
            flow.code = stored.code;
        }
        if flow.referer.is_none() {
            flow.referer = stored.referer;
        }
        Ok(false)
    }

    async fn store_data(&self, ctx: &mut RequestContext) -> Result<bool, Error> {
        if !self.save_data {
            return Ok(false);
        }

        let prefix = self.data_prefix();
        let mut writes = Vec::with_capacity(ctx.connected.len());
        for (provider, data) in &ctx.connected {
            let json = serde_json::to_string(&data.tokens_only())?;
            let sealed = ctx.config.encrypt(&json).await?;
            let options = self
                .cookie
                .clone()
                .with_expires(self.cookie.expires.or(data.refresh_token_expires));
            writes.push((format!("{}{}", prefix, provider), sealed, options));
        }
        for (name, value, options) in writes {
            ctx.cookies.set(name, value, options)?;
        }

        // Logout removes the active provider from the map.
        let active = format!("{}{}", prefix, ctx.flow.provider);
        if !ctx.connected.contains_key(&ctx.flow.provider)
            && ctx.cookies.get(&active).is_some_and(|value| !value.is_empty())
        {
            ctx.cookies.set(active, "", self.cookie.expired())?;
        }
        Ok(false)
    }

    async fn retrieve_data(&self, ctx: &mut RequestContext) -> Result<bool, Error> {
        if !self.save_data {
            return Ok(false);
        }

        let prefix = self.data_prefix();
        for (name, sealed) in ctx.cookies.all() {
            let Some(provider) = name.strip_prefix(&prefix) else {
                continue;
            };
            if sealed.is_empty() {
                continue;
            }
            let tokens = match ctx.config.decrypt(&sealed).await {
                Ok(json) => serde_json::from_str::<ProviderData>(&json),
                Err(e) => {
                    debug!("Ignoring data cookie {}: {}", name, e);
                    continue;
                }
            };
            match tokens {
                Ok(tokens) => ctx
                    .connected
                    .entry(provider.to_string())
                    .or_default()
                    .merge(tokens.tokens_only()),
                Err(e) => debug!("Ignoring data cookie {}: {}", name, e),
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookies::CookieJar;
    use crate::plugins::tests::{callback_context, test_context};
    use chrono::{Duration, Utc};
    use secrecy::{ExposeSecret, SecretString};

    fn carry_over(jar: &CookieJar) -> CookieJar {
        CookieJar::new(jar.all())
    }

    #[tokio::test]
    async fn test_state_round_trips_through_cookie() {
        let storage = CookieStorage::default();
        let mut ctx = test_context(None);
        ctx.flow.state = Some("s1".to_string());
        ctx.flow.referer = Some("/dashboard".to_string());
        storage.store_state(&mut ctx).await.unwrap();

        let sealed = ctx.cookies.get("oauth2.state").unwrap();
        assert!(!sealed.contains("dashboard"));

        let mut callback = callback_context(carry_over(&ctx.cookies), "s1", None);
        storage.retrieve_state(&mut callback).await.unwrap();
        assert_eq!(callback.flow.referer.as_deref(), Some("/dashboard"));
        assert_eq!(callback.flow.code.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_mismatched_state_does_not_restore_referer() {
        let storage = CookieStorage::default();
        let mut ctx = test_context(None);
        ctx.flow.state = Some("s1".to_string());
        ctx.flow.referer = Some("/dashboard".to_string());
        storage.store_state(&mut ctx).await.unwrap();

        let mut callback = callback_context(carry_over(&ctx.cookies), "forged", None);
        storage.retrieve_state(&mut callback).await.unwrap();
        assert_eq!(callback.flow.referer, None);
        assert!(callback.flow.state_mismatch);
    }

    #[tokio::test]
    async fn test_corrupt_state_cookie_is_ignored() {
        let storage = CookieStorage::default();
        let cookies = CookieJar::new([("oauth2.state", "bm90IGVuY3J5cHRlZA==")]);
        let mut callback = callback_context(cookies, "s1", None);

        assert!(!storage.retrieve_state(&mut callback).await.unwrap());
        assert_eq!(callback.flow.referer, None);
    }

    #[tokio::test]
    async fn test_missing_state_clears_cookie() {
        let storage = CookieStorage::default();
        let mut ctx = test_context(None);
        storage.store_state(&mut ctx).await.unwrap();

        let written = &ctx.cookies.pending()[0];
        assert_eq!(written.name, "oauth2.state");
        assert_eq!(written.value, "");
        assert_eq!(written.options.max_age, Some(0));
    }

    #[tokio::test]
    async fn test_data_round_trip_drops_profile_and_expires_with_refresh_token() {
        let storage = CookieStorage::default();
        let refresh_expires = Utc::now() + Duration::days(30);
        let mut ctx = test_context(None);
        ctx.connected.insert(
            "discord".to_string(),
            ProviderData {
                access_token: Some(SecretString::new("at".to_string())),
                refresh_token: Some(SecretString::new("rt".to_string())),
                refresh_token_expires: Some(refresh_expires),
                data: Some(serde_json::json!({"id": "42"})),
                ..Default::default()
            },
        );
        storage.store_data(&mut ctx).await.unwrap();

        let written = &ctx.cookies.pending()[0];
        assert_eq!(written.name, "oauth2.data.discord");
        assert_eq!(written.options.expires, Some(refresh_expires));

        let mut next = test_context(None);
        next.cookies = carry_over(&ctx.cookies);
        storage.retrieve_data(&mut next).await.unwrap();
        let data = next.provider_data("discord").unwrap();
        assert_eq!(data.access_token.as_ref().unwrap().expose_secret(), "at");
        assert!(data.data.is_none());
    }

    #[tokio::test]
    async fn test_logout_clears_active_provider_cookie() {
        let storage = CookieStorage::default();
        let mut ctx = test_context(None);
        ctx.cookies = CookieJar::new([("oauth2.data.discord", "sealed"), ("oauth2.data.azure.t", "other")]);
        storage.store_data(&mut ctx).await.unwrap();

        assert_eq!(ctx.cookies.get("oauth2.data.discord"), Some(""));
        assert_eq!(ctx.cookies.get("oauth2.data.azure.t"), Some("other"));
    }

    #[tokio::test]
    async fn test_without_data_skips_token_cookies() {
        let storage = CookieStorage::default().without_data();
        let mut ctx = test_context(None);
        ctx.connected.insert("discord".to_string(), ProviderData::default());
        storage.store_data(&mut ctx).await.unwrap();
        assert!(!ctx.cookies.is_dirty());
    }
}
