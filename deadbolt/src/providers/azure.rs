//! Microsoft identity platform (Azure AD / Entra ID) provider, one instance per tenant.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use log::*;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::context::{ProviderData, RequestContext};
use crate::error::{provider_error, Error, ProviderErrorKind};
use crate::http::{post_form, HttpClient, TokenResponse};
use crate::provider::{Capabilities, Provider};

pub const AZURE_LOGIN_URL: &str = "https://login.microsoftonline.com";

/// Refresh tokens are assumed valid for 90 days after issue.
const REFRESH_TOKEN_LIFETIME_DAYS: i64 = 90;

/// Computes `.data` for a connected tenant, for example by calling Microsoft Graph.
#[async_trait]
pub trait DataLoader: Send + Sync {
    async fn load(&self, tenant: &str, tokens: &ProviderData) -> Result<Value, Error>;
}

pub struct AzureProvider {
    name: String,
    tenant: String,
    client_id: String,
    client_secret: SecretString,
    scope: String,
    base_url: String,
    http_client: HttpClient,
    loader: Option<Arc<dyn DataLoader>>,
}

impl AzureProvider {
    /// Provider registered as `azure.{tenant}`. The scope defaults to
    /// `{client_id}/.default`.
    pub fn new(
        tenant: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: SecretString,
        http_client: HttpClient,
    ) -> Self {
        let tenant = tenant.into();
        let client_id = client_id.into();
        Self {
            name: format!("azure.{}", tenant),
            scope: format!("{}/.default", client_id),
            tenant,
            client_id,
            client_secret,
            base_url: AZURE_LOGIN_URL.to_string(),
            http_client,
            loader: None,
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_loader(mut self, loader: Arc<dyn DataLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}/oauth2/v2.0/{}", self.base_url, self.tenant, path)
    }

    fn redirect_uri(&self, ctx: &RequestContext) -> String {
        format!("{}/{}/authorize", ctx.config.base_url(), self.name)
    }

    fn not_connected(&self) -> Error {
        provider_error(
            ProviderErrorKind::NotConnected,
            &format!("{} is not connected", self.name),
        )
    }
}

#[async_trait]
impl Provider for AzureProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            refresh: true,
            revoke: true,
            load_data: self.loader.is_some(),
        }
    }

    async fn authorize(&self, ctx: &mut RequestContext) -> Result<bool, Error> {
        let redirect_uri = self.redirect_uri(ctx);
        let state = ctx.flow.state.clone().unwrap_or_default();
        ctx.redirect(
            &self.endpoint("authorize"),
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
        let redirect_uri = self.redirect_uri(ctx);
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
            &self.endpoint("token"),
            &form,
            ProviderErrorKind::TokenExchange,
        )
        .await?;

        let has_refresh_token = tokens.refresh_token.is_some();
        let mut data = tokens.into_provider_data(issued_at);
        if has_refresh_token {
            data.refresh_token_expires = Some(issued_at + Duration::days(REFRESH_TOKEN_LIFETIME_DAYS));
        }
        info!("Exchanged authorization code for {}", self.name);
        ctx.connected.insert(self.name.clone(), data);
        Ok(())
    }

    async fn refresh(&self, ctx: &mut RequestContext) -> Result<(), Error> {
        let refresh_token = ctx
            .provider_data(&self.name)
            .and_then(|data| data.refresh_token.clone())
            .ok_or_else(|| self.not_connected())?;
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret().as_str()),
            ("refresh_token", refresh_token.expose_secret().as_str()),
        ];

        let issued_at = Utc::now();
        let tokens: TokenResponse = post_form(
            &self.http_client,
            &self.endpoint("token"),
            &form,
            ProviderErrorKind::Refresh,
        )
        .await?;

        debug!("Refreshed access token for {}", self.name);
        if let Some(data) = ctx.connected.get_mut(&self.name) {
            tokens.refresh(data, issued_at);
        }
        Ok(())
    }

    async fn revoke(&self, ctx: &mut RequestContext) -> Result<(), Error> {
        let Some(data) = ctx.provider_data(&self.name) else {
            return Ok(());
        };
        let tokens: Vec<SecretString> = [&data.refresh_token, &data.access_token]
            .into_iter()
            .flatten()
            .cloned()
            .collect();
        for token in &tokens {
            let form = [
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret().as_str()),
                ("token", token.expose_secret().as_str()),
            ];
            let _: Value = post_form(
                &self.http_client,
                &self.endpoint("token/revoke"),
                &form,
                ProviderErrorKind::Revocation,
            )
            .await?;
        }
        ctx.connected.remove(&self.name);
        info!("Revoked tokens for {}", self.name);
        Ok(())
    }

    async fn load_data(&self, ctx: &mut RequestContext) -> Result<(), Error> {
        let Some(loader) = &self.loader else {
            return Ok(());
        };
        let tokens = ctx
            .provider_data(&self.name)
            .cloned()
            .ok_or_else(|| self.not_connected())?;
        let loaded = loader.load(&self.tenant, &tokens).await?;
        if let Some(data) = ctx.connected.get_mut(&self.name) {
            data.data = Some(loaded);
        }
        Ok(())
    }
}
