//! Flow state and token storage in an external session store.
//!
//! Only an opaque session key travels in a cookie. The key is created lazily on the
//! first write.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use dashmap::DashMap;
use log::*;

use super::FlowSnapshot;
use crate::context::{ConnectedAccounts, RequestContext};
use crate::cookies::CookieOptions;
use crate::crypto::random_string;
use crate::error::Error;
use crate::hooks::{Hook, Plugin};

pub const DEFAULT_KEY_COOKIE: &str = "oauth2.external";
const KEY_LENGTH: usize = 24;

/// Which operations an [`ExternalStore`] supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreCapabilities {
    pub get_state: bool,
    pub set_state: bool,
    pub get_data: bool,
    pub set_data: bool,
}

impl StoreCapabilities {
    pub fn all() -> Self {
        Self {
            get_state: true,
            set_state: true,
            get_data: true,
            set_data: true,
        }
    }
}

/// A session store keyed by the value of the key cookie.
#[async_trait]
pub trait ExternalStore: Send + Sync {
    fn capabilities(&self) -> StoreCapabilities;

    async fn get_state(&self, _key: &str) -> Result<Option<FlowSnapshot>, Error> {
        Ok(None)
    }

    async fn set_state(&self, _key: &str, _state: FlowSnapshot) -> Result<(), Error> {
        Ok(())
    }

    async fn get_data(&self, _key: &str) -> Result<Option<ConnectedAccounts>, Error> {
        Ok(None)
    }

    async fn set_data(&self, _key: &str, _connected: &ConnectedAccounts) -> Result<(), Error> {
        Ok(())
    }
}

/// In-process store for tests and single-instance deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    states: DashMap<String, FlowSnapshot>,
    data: DashMap<String, ConnectedAccounts>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_count(&self) -> usize {
        self.states.len().max(self.data.len())
    }
}

#[async_trait]
impl ExternalStore for MemoryStore {
    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::all()
    }

    async fn get_state(&self, key: &str) -> Result<Option<FlowSnapshot>, Error> {
        Ok(self.states.get(key).map(|entry| entry.clone()))
    }

    async fn set_state(&self, key: &str, state: FlowSnapshot) -> Result<(), Error> {
        self.states.insert(key.to_string(), state);
        Ok(())
    }

    async fn get_data(&self, key: &str) -> Result<Option<ConnectedAccounts>, Error> {
        Ok(self.data.get(key).map(|entry| entry.clone()))
    }

    async fn set_data(&self, key: &str, connected: &ConnectedAccounts) -> Result<(), Error> {
        self.data.insert(key.to_string(), connected.clone());
        Ok(())
    }
}

pub struct ExternalStorage<S> {
    store: S,
    name: String,
    cookie: CookieOptions,
}

impl<S: ExternalStore> ExternalStorage<S> {
    pub fn new(store: S) -> Self {
        // The session key cookie never expires on its own.
        let far_future = Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).single();
        Self {
            store,
            name: DEFAULT_KEY_COOKIE.to_string(),
            cookie: CookieOptions::default().with_expires(far_future),
        }
    }

    pub fn cookie_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn cookie_options(mut self, cookie: CookieOptions) -> Self {
        self.cookie = cookie;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn existing_key(&self, ctx: &RequestContext) -> Option<String> {
        ctx.cookies.get(&self.name).map(str::to_string)
    }

    fn key_or_create(&self, ctx: &mut RequestContext) -> Result<String, Error> {
        if let Some(key) = self.existing_key(ctx) {
            return Ok(key);
        }
        let key = random_string(KEY_LENGTH);
        debug!("Created external session key cookie {}", self.name);
        ctx.cookies.set(self.name.clone(), key.clone(), self.cookie.clone())?;
        Ok(key)
    }
}

#[async_trait]
impl<S: ExternalStore> Plugin for ExternalStorage<S> {
    fn hooks(&self) -> &'static [Hook] {
        &[
            Hook::StoreState,
            Hook::RetrieveState,
            Hook::StoreData,
            Hook::RetrieveData,
        ]
    }

    async fn store_state(&self, ctx: &mut RequestContext) -> Result<bool, Error> {
        if !self.store.capabilities().set_state {
            return Ok(false);
        }
        let key = self.key_or_create(ctx)?;
        self.store.set_state(&key, FlowSnapshot::of(&ctx.flow)).await?;
        Ok(false)
    }

    async fn retrieve_state(&self, ctx: &mut RequestContext) -> Result<bool, Error> {
        if !self.store.capabilities().get_state {
            return Ok(false);
        }
        let Some(key) = self.existing_key(ctx) else {
            return Ok(false);
        };
        let Some(stored) = self.store.get_state(&key).await? else {
            return Ok(false);
        };

        let flow = &mut ctx.flow;
        if let (Some(incoming), Some(expected)) = (&flow.state, &stored.state) {
            if incoming != expected {
                warn!("Callback state for {} does not match the stored state", flow.provider);
                flow.state_mismatch = true;
                return Ok(false);
            }
        }
        if stored.state.is_some() {
            flow.state = stored.state;
        }
        if stored.code.is_some() {
            flow.code = stored.code;
        }
        if stored.referer.is_some() {
            flow.referer = stored.referer;
        }
        Ok(false)
    }

    async fn store_data(&self, ctx: &mut RequestContext) -> Result<bool, Error> {
        if !self.store.capabilities().set_data {
            return Ok(false);
        }
        let key = self.key_or_create(ctx)?;
        self.store.set_data(&key, &ctx.connected).await?;
        Ok(false)
    }

    async fn retrieve_data(&self, ctx: &mut RequestContext) -> Result<bool, Error> {
        if !self.store.capabilities().get_data {
            return Ok(false);
        }
        let Some(key) = self.existing_key(ctx) else {
            return Ok(false);
        };
        let Some(stored) = self.store.get_data(&key).await? else {
            return Ok(false);
        };
        for (provider, data) in stored {
            ctx.connected.entry(provider).or_default().merge(data);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProviderData;
    use crate::cookies::CookieJar;
    use crate::plugins::tests::{callback_context, test_context};
    use secrecy::{ExposeSecret, SecretString};

    struct StateOnly(MemoryStore);

    #[async_trait]
    impl ExternalStore for StateOnly {
        fn capabilities(&self) -> StoreCapabilities {
            StoreCapabilities {
                get_state: true,
                set_state: true,
                ..Default::default()
            }
        }

        async fn get_state(&self, key: &str) -> Result<Option<FlowSnapshot>, Error> {
            self.0.get_state(key).await
        }

        async fn set_state(&self, key: &str, state: FlowSnapshot) -> Result<(), Error> {
            self.0.set_state(key, state).await
        }
    }

    #[tokio::test]
    async fn test_key_is_created_once_and_state_restored() {
        let storage = ExternalStorage::new(MemoryStore::new());
        let mut ctx = test_context(None);
        ctx.flow.state = Some("s1".to_string());
        ctx.flow.referer = Some("/settings".to_string());

        storage.store_state(&mut ctx).await.unwrap();
        storage.store_state(&mut ctx).await.unwrap();
        assert_eq!(ctx.cookies.pending().len(), 1);
        assert_eq!(storage.store().session_count(), 1);

        let mut callback = callback_context(CookieJar::new(ctx.cookies.all()), "s1", None);
        storage.retrieve_state(&mut callback).await.unwrap();
        assert_eq!(callback.flow.referer.as_deref(), Some("/settings"));
    }

    #[tokio::test]
    async fn test_data_merges_into_connected() {
        let storage = ExternalStorage::new(MemoryStore::new());
        let mut ctx = test_context(None);
        ctx.connected.insert(
            "discord".to_string(),
            ProviderData {
                access_token: Some(SecretString::new("at".to_string())),
                ..Default::default()
            },
        );
        storage.store_data(&mut ctx).await.unwrap();

        let mut next = test_context(None);
        next.cookies = CookieJar::new(ctx.cookies.all());
        next.connected.insert(
            "discord".to_string(),
            ProviderData {
                token_type: Some("Bearer".to_string()),
                ..Default::default()
            },
        );
        storage.retrieve_data(&mut next).await.unwrap();

        let data = next.provider_data("discord").unwrap();
        assert_eq!(data.access_token.as_ref().unwrap().expose_secret(), "at");
        assert_eq!(data.token_type.as_deref(), Some("Bearer"));
    }

    #[tokio::test]
    async fn test_unsupported_operations_are_skipped() {
        let storage = ExternalStorage::new(StateOnly(MemoryStore::new()));
        let mut ctx = test_context(None);
        ctx.connected.insert("discord".to_string(), ProviderData::default());

        storage.store_data(&mut ctx).await.unwrap();
        assert!(!ctx.cookies.is_dirty());
    }

    #[tokio::test]
    async fn test_missing_key_cookie_retrieves_nothing() {
        let storage = ExternalStorage::new(MemoryStore::new());
        let mut ctx = test_context(None);
        storage.retrieve_data(&mut ctx).await.unwrap();
        assert!(ctx.connected.is_empty());
    }
}
