//! Plugin lifecycle hooks and their composition.
//!
//! Every plugin declares which hooks it implements. When the pipeline is built each
//! hook gets its own chain of implementations in registration order (reverse order
//! for `ReviveState`). Running a chain is strictly sequential and stops at the
//! first plugin that reports the request as handled.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::*;

use crate::config::Config;
use crate::context::RequestContext;
use crate::error::Error;

/// Lifecycle hooks a plugin may implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    /// Produce `flow.state`; runs before `StoreState`.
    GenerateState,
    /// Persist the flow state (cookies, a session store).
    StoreState,
    /// Restore the flow state.
    RetrieveState,
    /// Interpret the restored state. Runs outside-in: the last registered plugin
    /// decides first whether to intercept.
    ReviveState,
    /// Persist connected-account data.
    StoreData,
    /// Restore connected-account data.
    RetrieveData,
}

impl Hook {
    pub const ALL: [Hook; 6] = [
        Hook::GenerateState,
        Hook::StoreState,
        Hook::RetrieveState,
        Hook::ReviveState,
        Hook::StoreData,
        Hook::RetrieveData,
    ];

    pub fn runs_in_reverse(&self) -> bool {
        matches!(self, Hook::ReviveState)
    }
}

/// A plugin contributing to one or more lifecycle hooks.
///
/// Each hook returns `true` to signal "handled, stop further processing", for
/// example when a proxy has already issued the terminal redirect.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Hooks this plugin implements. Consulted once when the pipeline is built.
    fn hooks(&self) -> &'static [Hook];

    async fn generate_state(&self, _ctx: &mut RequestContext) -> Result<bool, Error> {
        Ok(false)
    }

    async fn store_state(&self, _ctx: &mut RequestContext) -> Result<bool, Error> {
        Ok(false)
    }

    async fn retrieve_state(&self, _ctx: &mut RequestContext) -> Result<bool, Error> {
        Ok(false)
    }

    async fn revive_state(&self, _ctx: &mut RequestContext) -> Result<bool, Error> {
        Ok(false)
    }

    async fn store_data(&self, _ctx: &mut RequestContext) -> Result<bool, Error> {
        Ok(false)
    }

    async fn retrieve_data(&self, _ctx: &mut RequestContext) -> Result<bool, Error> {
        Ok(false)
    }
}

/// Builds a plugin from the resolved configuration.
pub type PluginInit = Box<dyn FnOnce(&Config) -> Arc<dyn Plugin> + Send>;

/// A plugin instance, or a factory invoked once with the resolved configuration.
pub enum PluginSource {
    Ready(Arc<dyn Plugin>),
    Init(PluginInit),
}

impl PluginSource {
    pub fn ready(plugin: impl Plugin + 'static) -> Self {
        PluginSource::Ready(Arc::new(plugin))
    }

    pub fn init<F>(init: F) -> Self
    where
        F: FnOnce(&Config) -> Arc<dyn Plugin> + Send + 'static,
    {
        PluginSource::Init(Box::new(init))
    }

    fn materialize(self, config: &Config) -> Arc<dyn Plugin> {
        match self {
            PluginSource::Ready(plugin) => plugin,
            PluginSource::Init(init) => init(config),
        }
    }
}

/// Composed hook chains.
#[derive(Clone, Default)]
pub struct HookPipeline {
    chains: HashMap<Hook, Vec<Arc<dyn Plugin>>>,
}

impl HookPipeline {
    pub fn new(sources: Vec<PluginSource>, config: &Config) -> Self {
        let plugins: Vec<Arc<dyn Plugin>> = sources
            .into_iter()
            .map(|source| source.materialize(config))
            .collect();

        let mut chains = HashMap::new();
        for hook in Hook::ALL {
            let mut chain: Vec<Arc<dyn Plugin>> = plugins
                .iter()
                .filter(|plugin| plugin.hooks().contains(&hook))
                .cloned()
                .collect();
            if hook.runs_in_reverse() {
                chain.reverse();
            }
            chains.insert(hook, chain);
        }

        Self { chains }
    }

    /// Number of plugins taking part in `hook`.
    pub fn len(&self, hook: Hook) -> usize {
        self.chains.get(&hook).map(Vec::len).unwrap_or(0)
    }

    /// Run every implementation of `hook` in order until one returns `true`.
    ///
    /// A hook nobody implements is a no-op returning `false`.
    pub async fn run(&self, hook: Hook, ctx: &mut RequestContext) -> Result<bool, Error> {
        let Some(chain) = self.chains.get(&hook) else {
            return Ok(false);
        };
        for plugin in chain {
            let handled = match hook {
                Hook::GenerateState => plugin.generate_state(ctx).await?,
                Hook::StoreState => plugin.store_state(ctx).await?,
                Hook::RetrieveState => plugin.retrieve_state(ctx).await?,
                Hook::ReviveState => plugin.revive_state(ctx).await?,
                Hook::StoreData => plugin.store_data(ctx).await?,
                Hook::RetrieveData => plugin.retrieve_data(ctx).await?,
            };
            if handled {
                debug!("{:?} handled by a plugin, stopping the chain", hook);
                return Ok(true);
            }
        }
        Ok(false)
    }
}
