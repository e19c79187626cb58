use std::error::Error as StdError;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::*;

use deadbolt::error::{ErrorKind, FlowErrorKind};
use deadbolt::Error as DeadboltError;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error(DeadboltError);

impl StdError for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> core::result::Result<(), std::fmt::Error> {
        write!(fmt, "{}", self.0)
    }
}

impl Error {
    fn status(&self) -> StatusCode {
        match &self.0.error_kind {
            ErrorKind::Flow(FlowErrorKind::UnknownStep) => StatusCode::NOT_FOUND,
            ErrorKind::Flow(FlowErrorKind::UnknownProvider) => StatusCode::NOT_FOUND,
            ErrorKind::Flow(FlowErrorKind::LoginRedirectFailed) => StatusCode::UNAUTHORIZED,
            ErrorKind::Flow(FlowErrorKind::InvalidUrl) => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Flow(FlowErrorKind::StateMismatch) => StatusCode::BAD_REQUEST,
            // Failed exchanges and refreshes leave the user unauthenticated.
            ErrorKind::Provider(_) => StatusCode::UNAUTHORIZED,
            ErrorKind::Crypto(_) => StatusCode::BAD_REQUEST,
            ErrorKind::Http(_) => StatusCode::BAD_GATEWAY,
            ErrorKind::Storage(_) | ErrorKind::Config => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// List of possible StatusCode variants https://docs.rs/http/latest/http/status/struct.StatusCode.html
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Flow request failed: {}", self.0);
        } else {
            warn!("Flow request rejected: {}", self.0);
        }
        let reason = status.canonical_reason().unwrap_or("ERROR").to_uppercase();
        (status, reason).into_response()
    }
}

impl<E> From<E> for Error
where
    E: Into<DeadboltError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deadbolt::error::{flow_error, provider_error, storage_error, ProviderErrorKind, StorageErrorKind};

    #[test]
    fn test_status_mapping() {
        let unknown_step: Error = flow_error(FlowErrorKind::UnknownStep, "nope").into();
        assert_eq!(unknown_step.status(), StatusCode::NOT_FOUND);

        let forged: Error = flow_error(FlowErrorKind::StateMismatch, "forged").into();
        assert_eq!(forged.status(), StatusCode::BAD_REQUEST);

        let remote: Error =
            provider_error(ProviderErrorKind::Remote("invalid_grant".into()), "denied").into();
        assert_eq!(remote.status(), StatusCode::UNAUTHORIZED);

        let exchange: Error = provider_error(ProviderErrorKind::TokenExchange, "down").into();
        assert_eq!(exchange.status(), StatusCode::UNAUTHORIZED);

        let network: Error = deadbolt::Error {
            source: None,
            error_kind: ErrorKind::Http(deadbolt::error::HttpErrorKind::Network),
        }
        .into();
        assert_eq!(network.status(), StatusCode::BAD_GATEWAY);

        let storage: Error = storage_error(StorageErrorKind::LimitExceeded, "too big").into();
        assert_eq!(storage.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_into_response_uses_status() {
        let err: Error = flow_error(FlowErrorKind::UnknownStep, "nope").into();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }
}
