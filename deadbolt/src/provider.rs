//! Identity provider contract and registry.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::RequestContext;
use crate::error::{config_error, Error};

/// Optional operations a provider supports.
///
/// Read once when the provider is registered; the orchestrator never calls an
/// operation the provider did not declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub refresh: bool,
    pub revoke: bool,
    pub load_data: bool,
}

impl Capabilities {
    pub fn all() -> Self {
        Self {
            refresh: true,
            revoke: true,
            load_data: true,
        }
    }
}

/// Trait for OAuth 2.0 identity providers.
///
/// Implementations read the flow parameters from the request context and write the
/// resulting token pair into `ctx.connected` under their own name.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Registry key. Multi-tenant providers use a composite `base.tenant` name.
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Redirect to the provider's authorization endpoint with `client_id`,
    /// `redirect_uri`, scope and the current opaque state.
    ///
    /// # Returns
    ///
    /// `false` when the exchange has no redirect channel.
    async fn authorize(&self, ctx: &mut RequestContext) -> Result<bool, Error>;

    /// Exchange `code` and `state` for a token pair.
    async fn exchange(&self, ctx: &mut RequestContext) -> Result<(), Error>;

    /// Exchange the refresh token for a new access token. Must keep the refresh token
    /// unless the provider rotates it.
    async fn refresh(&self, _ctx: &mut RequestContext) -> Result<(), Error> {
        Ok(())
    }

    /// Invalidate both tokens remotely and drop the local entry.
    async fn revoke(&self, _ctx: &mut RequestContext) -> Result<(), Error> {
        Ok(())
    }

    /// Fetch profile data into `.data` using the current access token.
    async fn load_data(&self, _ctx: &mut RequestContext) -> Result<(), Error> {
        Ok(())
    }
}

/// A provider together with the capabilities it declared at registration.
#[derive(Clone)]
pub struct RegisteredProvider {
    pub provider: Arc<dyn Provider>,
    pub capabilities: Capabilities,
}

impl RegisteredProvider {
    pub fn name(&self) -> &str {
        self.provider.name()
    }
}

/// Ordered set of providers, unique by name.
///
/// Lookups are a linear scan; registries hold tens of providers, not thousands.
#[derive(Clone, Default)]
pub struct Registry {
    providers: Vec<RegisteredProvider>,
}

impl Registry {
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Result<Self, Error> {
        let mut registry = Self::default();
        for provider in providers {
            if registry.get(provider.name()).is_some() {
                return Err(config_error(&format!(
                    "Provider {} is registered twice",
                    provider.name()
                )));
            }
            let capabilities = provider.capabilities();
            registry.providers.push(RegisteredProvider {
                provider,
                capabilities,
            });
        }
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredProvider> {
        self.providers.iter().find(|entry| entry.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(RegisteredProvider::name).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredProvider> {
        self.providers.iter()
    }
}
