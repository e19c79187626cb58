use async_trait::async_trait;

use crate::context::RequestContext;
use crate::crypto::random_string;
use crate::error::Error;
use crate::hooks::{Hook, Plugin};

/// Number of random bytes in a generated state.
pub const DEFAULT_STATE_LENGTH: usize = 24;

/// Generates an unguessable opaque `state` for every authorization request.
#[derive(Debug, Clone, Copy)]
pub struct RandomState {
    length: usize,
}

impl Default for RandomState {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_LENGTH)
    }
}

impl RandomState {
    pub fn new(length: usize) -> Self {
        Self { length }
    }
}

#[async_trait]
impl Plugin for RandomState {
    fn hooks(&self) -> &'static [Hook] {
        &[Hook::GenerateState]
    }

    async fn generate_state(&self, ctx: &mut RequestContext) -> Result<bool, Error> {
        ctx.flow.state = Some(random_string(self.length));
        Ok(false)
    }
}
