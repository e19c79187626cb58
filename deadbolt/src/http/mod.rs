//! HTTP plumbing shared by the bundled providers.

mod client;
mod endpoint;
mod retry;

pub use client::{HttpClient, HttpClientBuilder, HttpClientConfig};
pub use endpoint::{get_json, post_form, TokenResponse};
pub use retry::BackoffPolicy;
