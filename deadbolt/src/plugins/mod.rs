//! Bundled plugins: random state, cookie and external storage, and the state proxy.

pub mod cookie_storage;
pub mod external_storage;
pub mod random_state;
pub mod state_proxy;

pub use cookie_storage::CookieStorage;
pub use external_storage::{ExternalStorage, ExternalStore, MemoryStore, StoreCapabilities};
pub use random_state::RandomState;
pub use state_proxy::{OriginPattern, StateProxy, StateProxyOptions};

use serde::{Deserialize, Serialize};

use crate::context::FlowContext;

/// Flow parameters persisted between the authorize redirect and the callback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl FlowSnapshot {
    pub fn of(flow: &FlowContext) -> Self {
        Self {
            state: flow.state.clone(),
            code: None,
            referer: flow.referer.clone(),
            provider: Some(flow.provider.clone()),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use secrecy::SecretString;

    use crate::config::Config;
    use crate::context::{FlowContext, FlowResponse, FlowStep, RequestContext};
    use crate::cookies::CookieJar;

    pub(crate) fn test_config() -> Arc<Config> {
        Arc::new(
            Config::builder("https://host.test/api/auth", SecretString::new("secret".to_string()))
                .resolve(&["discord"])
                .unwrap(),
        )
    }

    pub(crate) fn test_context(response: Option<FlowResponse>) -> RequestContext {
        RequestContext::new(
            test_config(),
            FlowContext::new("discord", FlowStep::Authorize, None, None, None),
            CookieJar::default(),
            None,
            response,
        )
    }

    /// A context for the provider callback carrying `code` and `state`.
    pub(crate) fn callback_context(
        cookies: CookieJar,
        state: &str,
        response: Option<FlowResponse>,
    ) -> RequestContext {
        RequestContext::new(
            test_config(),
            FlowContext::new(
                "discord",
                FlowStep::Authorize,
                Some("c1".to_string()),
                Some(state.to_string()),
                None,
            ),
            cookies,
            None,
            response,
        )
    }
}
