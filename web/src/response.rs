//! Translation between axum's HTTP types and deadbolt's framework-neutral flow types.

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use log::*;

use deadbolt::{CookieJar, FlowResponse, SetCookie};

/// Collects every `Cookie` request header into one jar.
pub fn cookie_jar(headers: &HeaderMap) -> CookieJar {
    let joined = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect::<Vec<_>>()
        .join("; ");
    CookieJar::from_header(&joined)
}

/// Appends one `Set-Cookie` header per pending cookie write.
pub fn append_cookies(headers: &mut HeaderMap, cookies: &[SetCookie]) {
    for cookie in cookies {
        match HeaderValue::from_str(&cookie.header_value()) {
            Ok(value) => {
                headers.append(header::SET_COOKIE, value);
            }
            Err(err) => warn!("Dropping unencodable cookie {}: {}", cookie.name, err),
        }
    }
}

pub fn into_response(flow: FlowResponse) -> Response {
    let status = StatusCode::from_u16(flow.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = match (&flow.location, &flow.rewrite) {
        (Some(location), _) => match HeaderValue::from_str(location) {
            Ok(location) => (status, [(header::LOCATION, location)]).into_response(),
            Err(err) => {
                error!("Invalid redirect location {}: {}", location, err);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        },
        // Denials render the status page rather than the guarded handler.
        (None, Some(_)) => {
            let reason = status.canonical_reason().unwrap_or("ERROR").to_uppercase();
            (status, reason).into_response()
        }
        (None, None) => status.into_response(),
    };
    append_cookies(response.headers_mut(), &flow.cookies);
    response
}
