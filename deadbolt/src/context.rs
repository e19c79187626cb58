//! Per-request flow context and connected-account data.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};
use url::Url;

use crate::config::Config;
use crate::cookies::{CookieJar, SetCookie};
use crate::error::{flow_error, Error, FlowErrorKind};
use crate::provider::Provider;

/// Steps of the authorization-code flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStep {
    Authorize,
    Exchange,
    Refresh,
    Logout,
}

impl FlowStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStep::Authorize => "authorize",
            FlowStep::Exchange => "exchange",
            FlowStep::Refresh => "refresh",
            FlowStep::Logout => "logout",
        }
    }
}

impl FromStr for FlowStep {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "authorize" => Ok(FlowStep::Authorize),
            "exchange" => Ok(FlowStep::Exchange),
            "refresh" => Ok(FlowStep::Refresh),
            "logout" => Ok(FlowStep::Logout),
            other => Err(flow_error(
                FlowErrorKind::UnknownStep,
                &format!("Unknown flow step: {}", other),
            )),
        }
    }
}

impl fmt::Display for FlowStep {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of the flow in progress.
///
/// The effective step is derived at construction and cannot be changed afterwards:
/// an `authorize` request carrying both `code` and `state` is the provider's callback
/// and becomes an `exchange`.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowContext {
    /// Selected provider key, possibly composite (`azure.{tenant}`).
    pub provider: String,
    step: FlowStep,
    pub code: Option<String>,
    pub state: Option<String>,
    pub referer: Option<String>,
    /// The callback was already forwarded here by a state proxy.
    pub forwarded: bool,
    /// Set by a storage plugin whose stored state differs from the callback `state`.
    pub state_mismatch: bool,
}

impl FlowContext {
    pub fn new(
        provider: impl Into<String>,
        raw_step: FlowStep,
        code: Option<String>,
        state: Option<String>,
        referer: Option<String>,
    ) -> Self {
        let step = if raw_step == FlowStep::Authorize && code.is_some() && state.is_some() {
            FlowStep::Exchange
        } else {
            raw_step
        };
        Self {
            provider: provider.into(),
            step,
            code,
            state,
            referer,
            forwarded: false,
            state_mismatch: false,
        }
    }

    pub fn step(&self) -> FlowStep {
        self.step
    }

    /// Forget the callback parameters once they have been consumed.
    pub fn clear_callback(&mut self) {
        self.code = None;
        self.state = None;
        self.referer = None;
    }
}

fn expose_optional<S: Serializer>(
    secret: &Option<SecretString>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(secret) => serializer.serialize_some(secret.expose_secret()),
        None => serializer.serialize_none(),
    }
}

/// Token and profile data for one connected provider.
///
/// A missing `access_token_expires` means the freshness is unknown. A
/// `refresh_token_expires` in the past means the account cannot be recovered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderData {
    #[serde(
        default,
        serialize_with = "expose_optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub access_token: Option<SecretString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token_expires: Option<DateTime<Utc>>,
    #[serde(
        default,
        serialize_with = "expose_optional",
        skip_serializing_if = "Option::is_none"
    )]
    pub refresh_token: Option<SecretString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token_expires: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Provider-specific profile or claims, loaded lazily.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ProviderData {
    pub fn is_access_token_expired(&self, now: DateTime<Utc>) -> bool {
        self.access_token_expires
            .map(|expires| expires <= now)
            .unwrap_or(false)
    }

    pub fn is_refresh_token_expired(&self, now: DateTime<Utc>) -> bool {
        self.refresh_token_expires
            .map(|expires| expires <= now)
            .unwrap_or(false)
    }

    /// `Authorization` header value, defaulting the scheme to `Bearer`.
    pub fn authorization(&self) -> Option<String> {
        self.access_token.as_ref().map(|token| {
            format!(
                "{} {}",
                self.token_type.as_deref().unwrap_or("Bearer"),
                token.expose_secret()
            )
        })
    }

    /// Copy of the token record without the lazily loaded payload.
    pub fn tokens_only(&self) -> Self {
        Self {
            data: None,
            ..self.clone()
        }
    }

    /// Overwrite fields that are present in `other`.
    pub fn merge(&mut self, other: ProviderData) {
        if other.access_token.is_some() {
            self.access_token = other.access_token;
        }
        if other.access_token_expires.is_some() {
            self.access_token_expires = other.access_token_expires;
        }
        if other.refresh_token.is_some() {
            self.refresh_token = other.refresh_token;
        }
        if other.refresh_token_expires.is_some() {
            self.refresh_token_expires = other.refresh_token_expires;
        }
        if other.token_type.is_some() {
            self.token_type = other.token_type;
        }
        if other.data.is_some() {
            self.data = other.data;
        }
    }
}

/// Connected-account data keyed by provider name.
pub type ConnectedAccounts = BTreeMap<String, ProviderData>;

/// Framework-neutral view of an inbound request on a flow route (`/{provider}/{step}`).
#[derive(Debug, Clone, Default)]
pub struct FlowRequest {
    pub provider: Option<String>,
    pub step: Option<String>,
    pub query: HashMap<String, String>,
    pub cookies: CookieJar,
}

impl FlowRequest {
    pub fn new(provider: impl Into<String>, step: impl Into<String>) -> Self {
        Self {
            provider: Some(provider.into()),
            step: Some(step.into()),
            ..Default::default()
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_cookies(mut self, cookies: CookieJar) -> Self {
        self.cookies = cookies;
        self
    }
}

/// Outcome of a flow request, to be translated by the hosting framework.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowResponse {
    pub status: u16,
    pub location: Option<String>,
    /// Internal path the host should render instead (guard denials).
    pub rewrite: Option<String>,
    pub cookies: Vec<SetCookie>,
}

impl FlowResponse {
    pub const OK: u16 = 200;
    pub const TEMPORARY_REDIRECT: u16 = 307;
    pub const UNAUTHORIZED: u16 = 401;

    pub fn ok() -> Self {
        Self {
            status: Self::OK,
            location: None,
            rewrite: None,
            cookies: Vec::new(),
        }
    }

    pub fn redirect(location: impl Into<String>) -> Self {
        Self {
            status: Self::TEMPORARY_REDIRECT,
            location: Some(location.into()),
            ..Self::ok()
        }
    }

    pub fn unauthorized() -> Self {
        Self {
            status: Self::UNAUTHORIZED,
            rewrite: Some("/401".to_string()),
            ..Self::ok()
        }
    }

    pub fn is_redirect(&self) -> bool {
        self.location.is_some()
    }
}

/// Everything a provider or plugin can see and change while a request is handled.
///
/// Exclusively owned by one request; never shared between requests.
pub struct RequestContext {
    pub config: Arc<Config>,
    pub flow: FlowContext,
    pub connected: ConnectedAccounts,
    pub cookies: CookieJar,
    /// Active provider, swapped per iteration by the refresh engine.
    pub provider: Option<Arc<dyn Provider>>,
    response: Option<FlowResponse>,
}

impl RequestContext {
    /// Build a context. `response` is `None` when the caller has no way to send a
    /// redirect (background refresh, middleware guards).
    pub fn new(
        config: Arc<Config>,
        flow: FlowContext,
        cookies: CookieJar,
        provider: Option<Arc<dyn Provider>>,
        response: Option<FlowResponse>,
    ) -> Self {
        Self {
            config,
            flow,
            connected: ConnectedAccounts::new(),
            cookies,
            provider,
            response,
        }
    }

    pub fn can_redirect(&self) -> bool {
        self.response.is_some()
    }

    /// Redirect to `url` with `params` appended to its query string; parameters the
    /// url already carries are kept. Returns `false` when there is no redirect channel.
    pub fn redirect(&mut self, url: &str, params: &[(&str, &str)]) -> Result<bool, Error> {
        if self.response.is_none() {
            return Ok(false);
        }
        let location = build_url(url, self.config.base_url(), params)?;
        if let Some(response) = self.response.as_mut() {
            response.status = FlowResponse::TEMPORARY_REDIRECT;
            response.location = Some(location);
        }
        Ok(true)
    }

    /// Location of the redirect issued so far, if any.
    pub fn redirected_to(&self) -> Option<&str> {
        self.response
            .as_ref()
            .and_then(|response| response.location.as_deref())
    }

    pub fn provider_data(&self, provider: &str) -> Option<&ProviderData> {
        self.connected.get(provider)
    }

    /// Connected data of the active flow provider.
    pub fn current_data(&self) -> Option<&ProviderData> {
        self.connected.get(&self.flow.provider)
    }

    pub fn current_data_mut(&mut self) -> Option<&mut ProviderData> {
        self.connected.get_mut(&self.flow.provider)
    }

    /// Finish the request: the response so far with pending cookie writes attached.
    pub fn into_response(self) -> FlowResponse {
        let mut response = self.response.unwrap_or_else(FlowResponse::ok);
        response.cookies.extend(self.cookies.into_pending());
        response
    }
}

/// Append query parameters to `url`, resolving relative urls against `base`.
/// Parameters already present on `url` win.
pub fn build_url(url: &str, base: &str, params: &[(&str, &str)]) -> Result<String, Error> {
    if params.is_empty() {
        return Ok(url.to_string());
    }

    let mut parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(base)
            .and_then(|base| base.join(url))
            .map_err(|e| Error {
                source: Some(Box::new(e)),
                error_kind: crate::error::ErrorKind::Flow(FlowErrorKind::InvalidUrl),
            })?,
        Err(e) => {
            return Err(Error {
                source: Some(Box::new(e)),
                error_kind: crate::error::ErrorKind::Flow(FlowErrorKind::InvalidUrl),
            })
        }
    };

    let existing: Vec<String> = parsed.query_pairs().map(|(k, _)| k.into_owned()).collect();
    {
        let mut pairs = parsed.query_pairs_mut();
        for (key, value) in params {
            if !existing.iter().any(|k| k == key) {
                pairs.append_pair(key, value);
            }
        }
    }
    Ok(parsed.to_string())
}
