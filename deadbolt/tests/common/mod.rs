//! Test doubles shared by the flow tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use deadbolt::error::{provider_error, ProviderErrorKind};
use deadbolt::{Capabilities, Error, Hook, Plugin, Provider, ProviderData, RequestContext};
use secrecy::SecretString;

pub const SECRET: &str = "integration-secret";
pub const BASE_URL: &str = "https://app.test/api/auth";

pub fn secret() -> SecretString {
    SecretString::new(SECRET.to_string())
}

#[derive(Clone, Default)]
pub struct Calls(Arc<Mutex<Vec<String>>>);

impl Calls {
    pub fn record(&self, call: impl Into<String>) {
        self.0.lock().unwrap().push(call.into());
    }

    pub fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|c| *c == call).count()
    }
}

/// Provider that records every call and never leaves the process.
pub struct StubProvider {
    pub name: String,
    pub capabilities: Capabilities,
    pub calls: Calls,
    pub load_fails: bool,
}

impl StubProvider {
    pub fn new(name: &str, calls: &Calls) -> Self {
        Self {
            name: name.to_string(),
            capabilities: Capabilities::all(),
            calls: calls.clone(),
            load_fails: false,
        }
    }

    pub fn failing_load(mut self) -> Self {
        self.load_fails = true;
        self
    }
}

#[async_trait]
impl Provider for StubProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn authorize(&self, ctx: &mut RequestContext) -> Result<bool, Error> {
        self.calls.record("authorize");
        let state = ctx.flow.state.clone().unwrap_or_default();
        ctx.redirect("https://idp.test/authorize", &[("state", state.as_str())])
    }

    async fn exchange(&self, ctx: &mut RequestContext) -> Result<(), Error> {
        self.calls.record("exchange");
        ctx.connected.insert(self.name.clone(), connected_data(Duration::hours(1)));
        Ok(())
    }

    async fn refresh(&self, ctx: &mut RequestContext) -> Result<(), Error> {
        self.calls.record("refresh");
        if let Some(data) = ctx.connected.get_mut(&self.name) {
            data.access_token = Some(SecretString::new("refreshed".to_string()));
            data.access_token_expires = Some(Utc::now() + Duration::hours(1));
        }
        Ok(())
    }

    async fn revoke(&self, ctx: &mut RequestContext) -> Result<(), Error> {
        self.calls.record("revoke");
        ctx.connected.remove(&self.name);
        Ok(())
    }

    async fn load_data(&self, ctx: &mut RequestContext) -> Result<(), Error> {
        self.calls.record("load_data");
        if self.load_fails {
            return Err(provider_error(ProviderErrorKind::LoadData, "token rejected"));
        }
        if let Some(data) = ctx.connected.get_mut(&self.name) {
            data.data = Some(serde_json::json!({"id": "1"}));
        }
        Ok(())
    }
}

/// Token record whose access token expires `access_ttl` from now.
pub fn connected_data(access_ttl: Duration) -> ProviderData {
    let now = Utc::now();
    ProviderData {
        access_token: Some(SecretString::new("at".to_string())),
        access_token_expires: Some(now + access_ttl),
        refresh_token: Some(SecretString::new("rt".to_string())),
        refresh_token_expires: Some(now + Duration::days(30)),
        token_type: Some("Bearer".to_string()),
        data: None,
    }
}

/// Plugin serving a fixed account and counting `storeData` calls.
pub struct SeededData {
    provider: String,
    data: ProviderData,
    pub stores: Arc<AtomicUsize>,
}

impl SeededData {
    pub fn new(provider: &str, data: ProviderData) -> Self {
        Self {
            provider: provider.to_string(),
            data,
            stores: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn store_count(counter: &Arc<AtomicUsize>) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Plugin for SeededData {
    fn hooks(&self) -> &'static [Hook] {
        &[Hook::RetrieveData, Hook::StoreData]
    }

    async fn retrieve_data(&self, ctx: &mut RequestContext) -> Result<bool, Error> {
        ctx.connected
            .entry(self.provider.clone())
            .or_insert_with(|| self.data.clone());
        Ok(false)
    }

    async fn store_data(&self, _ctx: &mut RequestContext) -> Result<bool, Error> {
        self.stores.fetch_add(1, Ordering::SeqCst);
        Ok(false)
    }
}

/// Plugin producing a known state.
pub struct FixedState(pub &'static str);

#[async_trait]
impl Plugin for FixedState {
    fn hooks(&self) -> &'static [Hook] {
        &[Hook::GenerateState]
    }

    async fn generate_state(&self, ctx: &mut RequestContext) -> Result<bool, Error> {
        ctx.flow.state = Some(self.0.to_string());
        Ok(false)
    }
}
