//! Controller for the OAuth flow routes.
//!
//! Every step arrives as a browser navigation (user click or provider callback), so
//! these routes take no API version header and answer with redirects.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use deadbolt::FlowRequest;

use crate::response::{cookie_jar, into_response};
use crate::{AppState, Error};

/// GET|POST /{provider}/{step}
///
/// Runs `authorize`, `exchange`, `refresh` or `logout` for the named provider.
/// Also mounted on `/{provider}`, where the missing step is rejected as unknown.
pub async fn handle(
    State(app_state): State<AppState>,
    Path(mut segments): Path<HashMap<String, String>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Response, Error> {
    let request = FlowRequest {
        provider: segments.remove("provider"),
        step: segments.remove("step"),
        query,
        cookies: cookie_jar(&headers),
    };

    let flow = app_state.deadbolt.api_route(request).await?;
    Ok(into_response(flow))
}
