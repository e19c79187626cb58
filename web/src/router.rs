use crate::{controller::flow_controller, controller::health_check_controller, protect, AppState};
use axum::{
    middleware::from_fn_with_state,
    routing::{get, on, MethodFilter},
    Router,
};

use deadbolt::Guard;

/// Routes of the OAuth flow, to be nested at the path of the configured base URL.
pub fn define_routes(app_state: AppState) -> Router {
    Router::new().merge(health_routes()).merge(flow_routes(app_state))
}

/// Protects every route of `router` with `guard`. Denied requests receive a 401, or a
/// redirect to the login page when the guard asks for one.
pub fn guarded<S>(router: Router<S>, guard: Guard) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.route_layer(from_fn_with_state(guard, protect::require_connection))
}

fn flow_routes(app_state: AppState) -> Router {
    let methods = MethodFilter::GET.or(MethodFilter::POST);
    Router::new()
        .route("/{provider}", on(methods, flow_controller::handle))
        .route("/{provider}/{step}", on(methods, flow_controller::handle))
        .with_state(app_state)
}

fn health_routes() -> Router {
    Router::new().route("/health", get(health_check_controller::health_check))
}
