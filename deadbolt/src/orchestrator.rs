//! Flow orchestration: the route handler, the data accessor and the request guard.

use std::sync::Arc;

use log::*;
use secrecy::SecretString;

use crate::config::{Config, ConfigBuilder};
use crate::context::{FlowContext, FlowRequest, FlowResponse, FlowStep, ProviderData, RequestContext};
use crate::cookies::{CookieJar, SetCookie};
use crate::crypto::Cipher;
use crate::error::{flow_error, provider_error, Error, FlowErrorKind, ProviderErrorKind};
use crate::hooks::{Hook, HookPipeline, PluginSource};
use crate::plugins::random_state::RandomState;
use crate::provider::{Provider, RegisteredProvider, Registry};
use crate::refresh::{is_disconnected, refresh_if_necessary};

/// Caller-supplied translation of a guard failure into a response.
/// Returning `None` falls back to the default unauthorized response.
pub type ErrorHandler = Arc<dyn Fn(&Error) -> Option<FlowResponse> + Send + Sync>;

/// Connected data returned by [`Deadbolt::get_data`], together with cookie writes
/// (refreshed tokens) the caller must apply to its response.
#[derive(Debug, Clone, Default)]
pub struct ConnectedData {
    pub data: Option<ProviderData>,
    pub cookies: Vec<SetCookie>,
}

/// The OAuth 2.0 flow orchestrator.
///
/// Immutable once built and safe to share between concurrent requests.
pub struct Deadbolt {
    config: Arc<Config>,
    registry: Registry,
    hooks: HookPipeline,
}

pub struct DeadboltBuilder {
    config: ConfigBuilder,
    providers: Vec<Arc<dyn Provider>>,
    plugins: Vec<PluginSource>,
}

impl DeadboltBuilder {
    pub fn provider(mut self, provider: impl Provider + 'static) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    /// Register a plugin. Plugins run in registration order, `reviveState` in
    /// reverse.
    pub fn plugin(mut self, plugin: PluginSource) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn default_provider(mut self, provider: impl Into<String>) -> Self {
        self.config = self.config.default_provider(provider);
        self
    }

    pub fn login_page_url(mut self, url: impl Into<String>) -> Self {
        self.config = self.config.login_page_url(url);
        self
    }

    pub fn cipher(mut self, cipher: Arc<dyn Cipher>) -> Self {
        self.config = self.config.cipher(cipher);
        self
    }

    pub fn build(self) -> Result<Deadbolt, Error> {
        let registry = Registry::new(self.providers)?;
        let config = self.config.resolve(&registry.names())?;

        // Random state goes first so plugins generating richer state replace it.
        let mut sources = vec![PluginSource::ready(RandomState::default())];
        sources.extend(self.plugins);
        let hooks = HookPipeline::new(sources, &config);

        info!(
            "Deadbolt ready with providers [{}] under {}",
            registry.names().join(", "),
            config.base_url()
        );

        Ok(Deadbolt {
            config: Arc::new(config),
            registry,
            hooks,
        })
    }
}

fn composite_name(provider: &str, identifier: Option<&str>) -> String {
    match identifier {
        Some(identifier) if !identifier.is_empty() => format!("{}.{}", provider, identifier),
        _ => provider.to_string(),
    }
}

impl Deadbolt {
    pub fn builder(base_url: impl Into<String>, secret: SecretString) -> DeadboltBuilder {
        DeadboltBuilder {
            config: Config::builder(base_url, secret),
            providers: Vec::new(),
            plugins: Vec::new(),
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn hooks(&self) -> &HookPipeline {
        &self.hooks
    }

    fn context(
        &self,
        flow: FlowContext,
        cookies: CookieJar,
        entry: Option<&RegisteredProvider>,
        response: Option<FlowResponse>,
    ) -> RequestContext {
        RequestContext::new(
            self.config.clone(),
            flow,
            cookies,
            entry.map(|entry| entry.provider.clone()),
            response,
        )
    }

    /// Handle a request on a flow route (`/{provider}/{step}`).
    ///
    /// An unknown provider is sent to the default provider's authorize route. The
    /// callback parameters (`code`, `state`, `referer`) are only read on the
    /// `authorize` step.
    pub async fn api_route(&self, request: FlowRequest) -> Result<FlowResponse, Error> {
        let FlowRequest {
            provider,
            step,
            query,
            cookies,
        } = request;

        let provider_name = provider.unwrap_or_default();
        let Some(entry) = self.registry.get(&provider_name) else {
            let target = format!(
                "{}/{}/authorize",
                self.config.base_url(),
                self.config.default_provider()
            );
            debug!("Unknown provider {:?}, redirecting to {}", provider_name, target);
            return Ok(FlowResponse::redirect(target));
        };

        let raw_step: FlowStep = step.as_deref().unwrap_or_default().parse()?;
        let param = |key: &str| {
            if raw_step == FlowStep::Authorize {
                query.get(key).filter(|value| !value.is_empty()).cloned()
            } else {
                None
            }
        };
        let mut flow = FlowContext::new(
            provider_name.as_str(),
            raw_step,
            param("code"),
            param("state"),
            param("referer"),
        );
        flow.forwarded = param("forwarded").as_deref() == Some("1");

        let mut ctx = self.context(flow, cookies, Some(entry), Some(FlowResponse::ok()));
        debug!("{} step for {}", ctx.flow.step(), provider_name);

        match ctx.flow.step() {
            FlowStep::Authorize => self.authorize(entry, &mut ctx).await?,
            FlowStep::Exchange => self.exchange(entry, &mut ctx).await?,
            FlowStep::Refresh => {
                refresh_if_necessary(
                    &self.registry,
                    &self.hooks,
                    &mut ctx,
                    Some(entry.name()),
                    false,
                )
                .await?
            }
            FlowStep::Logout => self.logout(entry, &mut ctx).await?,
        }

        Ok(ctx.into_response())
    }

    async fn authorize(&self, entry: &RegisteredProvider, ctx: &mut RequestContext) -> Result<(), Error> {
        self.hooks.run(Hook::GenerateState, ctx).await?;
        self.hooks.run(Hook::StoreState, ctx).await?;
        if !entry.provider.authorize(ctx).await? {
            warn!("{} did not redirect to its authorization endpoint", entry.name());
        }
        Ok(())
    }

    async fn exchange(&self, entry: &RegisteredProvider, ctx: &mut RequestContext) -> Result<(), Error> {
        self.hooks.run(Hook::RetrieveState, ctx).await?;
        if self.hooks.run(Hook::ReviveState, ctx).await? {
            debug!("Callback for {} handed over by a plugin", entry.name());
            return Ok(());
        }
        if ctx.flow.state_mismatch {
            return Err(flow_error(
                FlowErrorKind::StateMismatch,
                &format!("Callback state for {} was not issued by this session", entry.name()),
            ));
        }

        entry.provider.exchange(ctx).await?;
        if entry.capabilities.load_data {
            entry.provider.load_data(ctx).await?;
        }

        let referer = ctx.flow.referer.clone().unwrap_or_else(|| "/".to_string());
        ctx.flow.clear_callback();
        self.hooks.run(Hook::StoreData, ctx).await?;
        self.hooks.run(Hook::StoreState, ctx).await?;

        info!("Connected {}, returning to {}", entry.name(), referer);
        ctx.redirect(&referer, &[])?;
        Ok(())
    }

    async fn logout(&self, entry: &RegisteredProvider, ctx: &mut RequestContext) -> Result<(), Error> {
        self.hooks.run(Hook::RetrieveData, ctx).await?;
        if entry.capabilities.revoke && ctx.current_data().is_some() {
            entry.provider.revoke(ctx).await?;
        }
        ctx.connected.remove(entry.name());
        self.hooks.run(Hook::StoreData, ctx).await?;
        info!("Disconnected {}", entry.name());
        Ok(())
    }

    /// Connected data for `provider` (or `provider.identifier`), refreshed when
    /// necessary and with `.data` loaded when missing.
    ///
    /// `data` is `None` when the provider is not registered or not connected.
    pub async fn get_data(
        &self,
        cookies: CookieJar,
        provider: &str,
        identifier: Option<&str>,
    ) -> Result<ConnectedData, Error> {
        let name = composite_name(provider, identifier);
        let Some(entry) = self.registry.get(&name) else {
            debug!("get_data for unregistered provider {}", name);
            return Ok(ConnectedData {
                data: None,
                cookies: Vec::new(),
            });
        };

        let flow = FlowContext::new(name.as_str(), FlowStep::Refresh, None, None, None);
        let mut ctx = self.context(flow, cookies, Some(entry), None);

        refresh_if_necessary(&self.registry, &self.hooks, &mut ctx, Some(&name), false).await?;
        self.hooks.run(Hook::RetrieveData, &mut ctx).await?;

        let missing_data = ctx
            .current_data()
            .map(|data| data.data.is_none())
            .unwrap_or(false);
        if missing_data && entry.capabilities.load_data {
            entry.provider.load_data(&mut ctx).await?;
        }

        let data = ctx.current_data().cloned();
        Ok(ConnectedData {
            data,
            cookies: ctx.cookies.into_pending(),
        })
    }

    /// A guard admitting requests only when `provider` (or `provider.identifier`) is
    /// connected.
    pub fn authorized(
        self: &Arc<Self>,
        provider: &str,
        identifier: Option<&str>,
        redirect_to_login: bool,
        on_error: Option<ErrorHandler>,
    ) -> Guard {
        Guard {
            deadbolt: self.clone(),
            provider: composite_name(provider, identifier),
            redirect_to_login,
            on_error,
        }
    }
}

/// Result of a guard check.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardOutcome {
    /// Let the request through, applying these cookie writes to it.
    Allow { cookies: Vec<SetCookie> },
    Deny(FlowResponse),
}

/// Request guard built by [`Deadbolt::authorized`].
#[derive(Clone)]
pub struct Guard {
    deadbolt: Arc<Deadbolt>,
    provider: String,
    redirect_to_login: bool,
    on_error: Option<ErrorHandler>,
}

impl Guard {
    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub async fn check(&self, cookies: CookieJar) -> GuardOutcome {
        match self.evaluate(cookies).await {
            Ok(cookies) => GuardOutcome::Allow { cookies },
            Err(err) => GuardOutcome::Deny(self.deny(&err)),
        }
    }

    async fn evaluate(&self, cookies: CookieJar) -> Result<Vec<SetCookie>, Error> {
        let deadbolt = &self.deadbolt;
        let Some(entry) = deadbolt.registry.get(&self.provider) else {
            return Err(flow_error(
                FlowErrorKind::UnknownProvider,
                &format!("Provider {} is not registered", self.provider),
            ));
        };

        let flow = FlowContext::new(self.provider.as_str(), FlowStep::Refresh, None, None, None);
        // Middleware cannot redirect; a login redirect surfaces as LoginRedirectFailed.
        let mut ctx = deadbolt.context(flow, cookies, Some(entry), None);

        refresh_if_necessary(
            &deadbolt.registry,
            &deadbolt.hooks,
            &mut ctx,
            Some(&self.provider),
            self.redirect_to_login,
        )
        .await?;

        if is_disconnected(&ctx, &self.provider, chrono::Utc::now()) {
            return Err(provider_error(
                ProviderErrorKind::NotConnected,
                &format!("{} is not connected", self.provider),
            ));
        }
        let missing_data = ctx
            .current_data()
            .map(|data| data.data.is_none())
            .unwrap_or(true);
        if missing_data && entry.capabilities.load_data {
            entry.provider.load_data(&mut ctx).await?;
        }

        Ok(ctx.cookies.into_pending())
    }

    fn deny(&self, err: &Error) -> FlowResponse {
        if err.is_login_redirect_failed() {
            return FlowResponse::redirect(self.deadbolt.config.login_page_url());
        }
        if let Some(response) = self.on_error.as_ref().and_then(|handler| handler(err)) {
            return response;
        }
        warn!("Denying request for {}: {}", self.provider, err);
        FlowResponse::unauthorized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_name() {
        assert_eq!(composite_name("azure", Some("tenant-a")), "azure.tenant-a");
        assert_eq!(composite_name("discord", None), "discord");
        assert_eq!(composite_name("discord", Some("")), "discord");
    }
}
