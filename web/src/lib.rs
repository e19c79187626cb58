//! axum adapter for deadbolt: mounts the flow routes and guards application routes.

use std::sync::Arc;

use deadbolt::Deadbolt;

pub mod controller;
pub mod error;
pub mod protect;
pub mod response;
pub mod router;

pub use error::{Error, Result};
pub use router::{define_routes, guarded};

// Needs to implement Clone to be able to be passed into Router as State
#[derive(Clone)]
pub struct AppState {
    pub deadbolt: Arc<Deadbolt>,
}

impl AppState {
    pub fn new(deadbolt: Arc<Deadbolt>) -> Self {
        Self { deadbolt }
    }
}
