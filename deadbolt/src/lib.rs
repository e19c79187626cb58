//! # deadbolt
//!
//! Embeddable OAuth 2.0 authorization-code flow orchestrator:
//! - Flow routing (`authorize` → `exchange` → `refresh` → `logout`) over pluggable providers
//! - Plugin hooks for state generation, state and data persistence, and state revival
//! - Encrypted opaque state (AES-256-GCM) against cross-site request forgery
//! - Token refresh decisions with a refresh fallback for tokens of unknown freshness
//! - A state proxy letting satellite hosts share one registered callback
//!
//! ## Architecture
//!
//! The orchestrator builds a `RequestContext` per request, resolves the provider by
//! name, dispatches on the flow step and calls the hook pipeline at fixed points.
//! Hosting frameworks translate their requests into `FlowRequest` and apply the
//! returned `FlowResponse`; the `web` crate does this for axum.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use deadbolt::{
//!     hooks::PluginSource,
//!     http::HttpClientBuilder,
//!     plugins::CookieStorage,
//!     providers::DiscordProvider,
//!     Deadbolt,
//! };
//!
//! let deadbolt = Deadbolt::builder("https://app.test/api/auth", secret)
//!     .provider(DiscordProvider::new(client_id, client_secret, HttpClientBuilder::new().build()?))
//!     .plugin(PluginSource::ready(CookieStorage::default()))
//!     .build()?;
//! ```

pub mod config;
pub mod context;
pub mod cookies;
pub mod crypto;
pub mod error;
pub mod hooks;
pub mod http;
pub mod orchestrator;
pub mod plugins;
pub mod provider;
pub mod providers;
pub mod refresh;

// Re-export commonly used types
pub use config::Config;
pub use context::{FlowContext, FlowRequest, FlowResponse, FlowStep, ProviderData, RequestContext};
pub use cookies::{CookieJar, CookieOptions, SetCookie};
pub use error::{Error, ErrorKind};
pub use hooks::{Hook, HookPipeline, Plugin, PluginSource};
pub use orchestrator::{ConnectedData, Deadbolt, ErrorHandler, Guard, GuardOutcome};
pub use provider::{Capabilities, Provider};
