use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use log::*;

use deadbolt::{Guard, GuardOutcome};

use crate::response::{append_cookies, cookie_jar, into_response};

/// Admits the request only when the guard's provider is connected, refreshing its
/// tokens first when needed. Cookie writes made while refreshing are added to the
/// handler's response.
///  Intended to be given to axum::middleware::from_fn_with_state in the router
pub async fn require_connection(
    State(guard): State<Guard>,
    request: Request,
    next: Next,
) -> Response {
    let cookies = cookie_jar(request.headers());
    match guard.check(cookies).await {
        GuardOutcome::Allow { cookies } => {
            let mut response = next.run(request).await;
            append_cookies(response.headers_mut(), &cookies);
            response
        }
        GuardOutcome::Deny(flow) => {
            debug!("Guard for {} denied {}", guard.provider(), request.uri().path());
            into_response(flow)
        }
    }
}
