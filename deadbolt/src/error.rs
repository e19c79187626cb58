//! Error types for the `deadbolt` crate.
//!
//! Follows the same pattern as the rest of the platform: a root `Error` struct holding
//! an optional source and a tree of error kind enums.

use std::error::Error as StdError;
use std::fmt;

/// Top-level error type for deadbolt.
/// Holds error kind and optional source for error chaining.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

/// Major categories of errors in deadbolt.
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    Crypto(CryptoErrorKind),
    Provider(ProviderErrorKind),
    Flow(FlowErrorKind),
    Storage(StorageErrorKind),
    Http(HttpErrorKind),
    Config,
}

/// Errors from the crypto box.
#[derive(Debug, PartialEq)]
pub enum CryptoErrorKind {
    /// The opaque token was truncated, tampered with or sealed under another key.
    Decryption,
    Encryption,
}

/// Errors reported by, or while talking to, an identity provider.
#[derive(Debug, PartialEq)]
pub enum ProviderErrorKind {
    /// The remote response carried an `error` field.
    Remote(String),
    TokenExchange,
    Refresh,
    Revocation,
    LoadData,
    InvalidResponse,
    /// No connected account data exists for the provider.
    NotConnected,
}

/// Errors from flow orchestration.
#[derive(Debug, PartialEq)]
pub enum FlowErrorKind {
    /// The refresh engine wanted to send the user to the login page but the
    /// current exchange has no redirect channel.
    LoginRedirectFailed,
    UnknownProvider,
    UnknownStep,
    InvalidUrl,
    /// The callback `state` differs from the state stored when the flow started.
    StateMismatch,
}

/// Errors from storage transports.
#[derive(Debug, PartialEq)]
pub enum StorageErrorKind {
    /// A bounded-size transport (cookies) rejected a write. Switch to external storage.
    LimitExceeded,
    Backend,
}

/// Errors from HTTP client operations.
#[derive(Debug, PartialEq)]
pub enum HttpErrorKind {
    BuilderFailed,
    RequestFailed,
    Network,
}

impl Error {
    /// True for `loadData` failures that should trigger the refresh fallback when
    /// the access token expiry is unknown.
    pub fn is_transient_load_failure(&self) -> bool {
        matches!(
            self.error_kind,
            ErrorKind::Provider(ProviderErrorKind::LoadData)
                | ErrorKind::Provider(ProviderErrorKind::Remote(_))
                | ErrorKind::Provider(ProviderErrorKind::InvalidResponse)
                | ErrorKind::Http(_)
        )
    }

    pub fn is_login_redirect_failed(&self) -> bool {
        self.error_kind == ErrorKind::Flow(FlowErrorKind::LoginRedirectFailed)
    }

    pub fn is_decryption(&self) -> bool {
        self.error_kind == ErrorKind::Crypto(CryptoErrorKind::Decryption)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Crypto(kind) => write!(f, "Crypto error: {:?}", kind),
            ErrorKind::Provider(kind) => write!(f, "Provider error: {:?}", kind),
            ErrorKind::Flow(kind) => write!(f, "Flow error: {:?}", kind),
            ErrorKind::Storage(kind) => write!(f, "Storage error: {:?}", kind),
            ErrorKind::Http(kind) => write!(f, "HTTP error: {:?}", kind),
            ErrorKind::Config => write!(f, "Configuration error"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let error_kind = if err.is_builder() {
            ErrorKind::Http(HttpErrorKind::BuilderFailed)
        } else if err.is_request() {
            ErrorKind::Http(HttpErrorKind::RequestFailed)
        } else if err.is_decode() {
            ErrorKind::Provider(ProviderErrorKind::InvalidResponse)
        } else {
            ErrorKind::Http(HttpErrorKind::Network)
        };

        Error {
            source: Some(Box::new(err)),
            error_kind,
        }
    }
}

impl From<reqwest_middleware::Error> for Error {
    fn from(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(err) => err.into(),
            other => Error {
                source: Some(Box::new(other)),
                error_kind: ErrorKind::Http(HttpErrorKind::Network),
            },
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: ErrorKind::Crypto(CryptoErrorKind::Decryption),
        }
    }
}

/// Helper function to create crypto errors.
pub fn crypto_error(kind: CryptoErrorKind) -> Error {
    Error {
        source: None,
        error_kind: ErrorKind::Crypto(kind),
    }
}

/// Helper function to create provider errors.
pub fn provider_error(kind: ProviderErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Provider(kind),
    }
}

/// Helper function to create flow errors.
pub fn flow_error(kind: FlowErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Flow(kind),
    }
}

/// Helper function to create storage errors.
pub fn storage_error(kind: StorageErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Storage(kind),
    }
}

/// Helper function to create configuration errors.
pub fn config_error(message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Config,
    }
}
