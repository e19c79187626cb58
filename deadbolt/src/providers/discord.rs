//! Discord OAuth provider.

use async_trait::async_trait;
use chrono::Utc;
use log::*;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::context::RequestContext;
use crate::error::{provider_error, Error, ProviderErrorKind};
use crate::http::{get_json, post_form, HttpClient, TokenResponse};
use crate::provider::{Capabilities, Provider};

pub const DISCORD_BASE_URL: &str = "https://discord.com";
const CDN_URL: &str = "//cdn.discordapp.com";
const NAME: &str = "discord";

/// Discord OAuth provider.
///
/// Exchanges codes at `/api/oauth2/token` and loads the user profile from
/// `/api/users/@me`, adding an `avatarUrl`.
pub struct DiscordProvider {
    client_id: String,
    client_secret: SecretString,
    scope: String,
    base_url: String,
    http_client: HttpClient,
}

impl DiscordProvider {
    pub fn new(client_id: impl Into<String>, client_secret: SecretString, http_client: HttpClient) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            scope: "identify".to_string(),
            base_url: DISCORD_BASE_URL.to_string(),
            http_client,
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Point the provider at another host, such as a mock server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn redirect_uri(ctx: &RequestContext) -> String {
        format!("{}/{}/authorize", ctx.config.base_url(), NAME)
    }

    async fn revoke_token(&self, token: &SecretString) -> Result<(), Error> {
        let form = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret().as_str()),
            ("token", token.expose_secret().as_str()),
        ];
        let _: Value = post_form(
            &self.http_client,
            &self.url("/api/oauth2/token/revoke"),
            &form,
            ProviderErrorKind::Revocation,
        )
        .await?;
        Ok(())
    }
}

fn not_connected() -> Error {
    provider_error(ProviderErrorKind::NotConnected, "Discord is not connected")
}

#[async_trait]
impl Provider for DiscordProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    async fn authorize(&self, ctx: &mut RequestContext) -> Result<bool, Error> {
        let redirect_uri = Self::redirect_uri(ctx);
        let state = ctx.flow.state.clone().unwrap_or_default();
        let url = self.url("/api/oauth2/authorize");
        ctx.redirect(
            &url,
            &[
                ("response_type", "code"),
                ("redirect_uri", redirect_uri.as_str()),
                ("client_id", self.client_id.as_str()),
                ("state", state.as_str()),
                ("scope", self.scope.as_str()),
            ],
        )
    }

    async fn exchange(&self, ctx: &mut RequestContext) -> Result<(), Error> {
        let redirect_uri = Self::redirect_uri(ctx);
        let code = ctx.flow.code.clone().unwrap_or_default();
        let state = ctx.flow.state.clone().unwrap_or_default();
        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret().as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("scope", self.scope.as_str()),
            ("state", state.as_str()),
            ("code", code.as_str()),
        ];

        let issued_at = Utc::now();
        let tokens: TokenResponse = post_form(
            &self.http_client,
            &self.url("/api/oauth2/token"),
            &form,
            ProviderErrorKind::TokenExchange,
        )
        .await?;

        info!("Exchanged Discord authorization code");
        ctx.connected
            .insert(NAME.to_string(), tokens.into_provider_data(issued_at));
        Ok(())
    }

    async fn refresh(&self, ctx: &mut RequestContext) -> Result<(), Error> {
        let refresh_token = ctx
            .provider_data(NAME)
            .and_then(|data| data.refresh_token.clone())
            .ok_or_else(not_connected)?;
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret().as_str()),
            ("refresh_token", refresh_token.expose_secret().as_str()),
        ];

        let issued_at = Utc::now();
        let tokens: TokenResponse = post_form(
            &self.http_client,
            &self.url("/api/oauth2/token"),
            &form,
            ProviderErrorKind::Refresh,
        )
        .await?;

        debug!("Refreshed Discord access token");
        if let Some(data) = ctx.connected.get_mut(NAME) {
            tokens.refresh(data, issued_at);
        }
        Ok(())
    }

    async fn revoke(&self, ctx: &mut RequestContext) -> Result<(), Error> {
        let Some(data) = ctx.provider_data(NAME) else {
            return Ok(());
        };
        let tokens: Vec<SecretString> = [&data.refresh_token, &data.access_token]
            .into_iter()
            .flatten()
            .cloned()
            .collect();
        // The entry stays until every token is revoked, so a failure keeps it stored.
        for token in &tokens {
            self.revoke_token(token).await?;
        }
        ctx.connected.remove(NAME);
        info!("Revoked Discord tokens");
        Ok(())
    }

    async fn load_data(&self, ctx: &mut RequestContext) -> Result<(), Error> {
        let authorization = ctx
            .provider_data(NAME)
            .and_then(|data| data.authorization())
            .ok_or_else(not_connected)?;

        let mut profile: Value = get_json(
            &self.http_client,
            &self.url("/api/users/@me"),
            &authorization,
            ProviderErrorKind::LoadData,
        )
        .await?;

        if let Value::Object(fields) = &mut profile {
            let avatar_url = format!(
                "{}/avatars/{}/{}.png",
                CDN_URL,
                fields.get("id").and_then(Value::as_str).unwrap_or_default(),
                fields.get("avatar").and_then(Value::as_str).unwrap_or_default()
            );
            fields.insert("avatarUrl".to_string(), Value::String(avatar_url));
        }

        if let Some(data) = ctx.connected.get_mut(NAME) {
            data.data = Some(profile);
        }
        Ok(())
    }
}
