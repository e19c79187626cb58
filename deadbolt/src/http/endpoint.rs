//! Calls to provider token and userinfo endpoints.

use chrono::{DateTime, Duration, Utc};
use log::*;
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::HttpClient;
use crate::context::ProviderData;
use crate::error::{provider_error, Error, ErrorKind, ProviderErrorKind};

/// Token endpoint response (RFC 6749 section 5.1).
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    pub fn access_token_expires(&self, issued_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expires_in
            .map(|seconds| issued_at + Duration::seconds(seconds))
    }

    /// Token record for a freshly connected account.
    pub fn into_provider_data(self, issued_at: DateTime<Utc>) -> ProviderData {
        ProviderData {
            access_token_expires: self.access_token_expires(issued_at),
            access_token: Some(SecretString::new(self.access_token)),
            refresh_token: self.refresh_token.map(SecretString::new),
            token_type: Some(self.token_type.unwrap_or_else(|| "Bearer".to_string())),
            ..Default::default()
        }
    }

    /// Apply a refresh response, keeping the refresh token unless a new one was issued.
    pub fn refresh(self, data: &mut ProviderData, issued_at: DateTime<Utc>) {
        data.access_token_expires = self.access_token_expires(issued_at);
        data.access_token = Some(SecretString::new(self.access_token));
        if let Some(refresh_token) = self.refresh_token {
            data.refresh_token = Some(SecretString::new(refresh_token));
        }
        if let Some(token_type) = self.token_type {
            data.token_type = Some(token_type);
        }
    }
}

#[derive(Deserialize)]
struct RemoteError {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Decode a provider response. A body carrying an `error` field is a
/// `ProviderErrorKind::Remote` whatever the status code.
async fn decode<T: DeserializeOwned>(
    response: reqwest::Response,
    failure: ProviderErrorKind,
) -> Result<T, Error> {
    let status = response.status();
    let body = response.text().await?;
    let value: serde_json::Value = serde_json::from_str(&body).map_err(|e| {
        warn!("Provider returned a non JSON body with status {}", status);
        Error {
            source: Some(Box::new(e)),
            error_kind: ErrorKind::Provider(ProviderErrorKind::InvalidResponse),
        }
    })?;

    if let Ok(remote) = serde_json::from_value::<RemoteError>(value.clone()) {
        warn!(
            "Provider reported {} ({})",
            remote.error,
            remote.error_description.as_deref().unwrap_or("no description")
        );
        return Err(provider_error(
            ProviderErrorKind::Remote(remote.error),
            remote.error_description.as_deref().unwrap_or("remote error"),
        ));
    }

    if !status.is_success() {
        warn!("Provider request failed with status {}", status);
        return Err(provider_error(failure, &format!("Status {}", status)));
    }

    serde_json::from_value(value).map_err(|e| Error {
        source: Some(Box::new(e)),
        error_kind: ErrorKind::Provider(ProviderErrorKind::InvalidResponse),
    })
}

/// POST an `application/x-www-form-urlencoded` body and decode the JSON answer.
pub async fn post_form<T, F>(
    client: &HttpClient,
    url: &str,
    form: &F,
    failure: ProviderErrorKind,
) -> Result<T, Error>
where
    T: DeserializeOwned,
    F: Serialize + ?Sized,
{
    debug!("POST {}", url);
    let response = client.post(url).form(form).send().await?;
    decode(response, failure).await
}

/// GET a JSON resource with an `Authorization` header.
pub async fn get_json<T: DeserializeOwned>(
    client: &HttpClient,
    url: &str,
    authorization: &str,
    failure: ProviderErrorKind,
) -> Result<T, Error> {
    debug!("GET {}", url);
    let response = client
        .get(url)
        .header(reqwest::header::AUTHORIZATION, authorization)
        .send()
        .await?;
    decode(response, failure).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpClientBuilder;
    use mockito::Server;
    use secrecy::ExposeSecret;

    #[derive(Debug, Deserialize)]
    struct Profile {
        id: String,
    }

    fn client() -> HttpClient {
        HttpClientBuilder::new().with_max_retries(0).build().unwrap()
    }

    #[tokio::test]
    async fn test_error_field_is_a_remote_error() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error": "invalid_grant", "error_description": "code expired"}"#)
            .create_async()
            .await;

        let result: Result<TokenResponse, Error> = post_form(
            &client(),
            &format!("{}/token", server.url()),
            &[("grant_type", "authorization_code")],
            ProviderErrorKind::TokenExchange,
        )
        .await;

        mock.assert_async().await;
        let err = result.unwrap_err();
        assert_eq!(
            err.error_kind,
            ErrorKind::Provider(ProviderErrorKind::Remote("invalid_grant".to_string()))
        );
    }

    #[tokio::test]
    async fn test_failed_status_without_error_field() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/me")
            .with_status(401)
            .with_body(r#"{"message": "401: Unauthorized"}"#)
            .create_async()
            .await;

        let result: Result<Profile, Error> = get_json(
            &client(),
            &format!("{}/me", server.url()),
            "Bearer at",
            ProviderErrorKind::LoadData,
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.error_kind, ErrorKind::Provider(ProviderErrorKind::LoadData));
        assert!(err.is_transient_load_failure());
    }

    #[tokio::test]
    async fn test_sends_authorization_header() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/me")
            .match_header("authorization", "Bearer at")
            .with_status(200)
            .with_body(r#"{"id": "42"}"#)
            .create_async()
            .await;

        let profile: Profile = get_json(
            &client(),
            &format!("{}/me", server.url()),
            "Bearer at",
            ProviderErrorKind::LoadData,
        )
        .await
        .unwrap();

        mock.assert_async().await;
        assert_eq!(profile.id, "42");
    }

    #[test]
    fn test_refresh_keeps_refresh_token_when_not_rotated() {
        let now = Utc::now();
        let mut data = TokenResponse {
            access_token: "at1".to_string(),
            token_type: None,
            expires_in: Some(60),
            refresh_token: Some("rt".to_string()),
            scope: None,
        }
        .into_provider_data(now);
        assert_eq!(data.token_type.as_deref(), Some("Bearer"));

        TokenResponse {
            access_token: "at2".to_string(),
            token_type: None,
            expires_in: Some(3600),
            refresh_token: None,
            scope: None,
        }
        .refresh(&mut data, now);

        assert_eq!(data.access_token.as_ref().unwrap().expose_secret(), "at2");
        assert_eq!(data.refresh_token.as_ref().unwrap().expose_secret(), "rt");
        assert_eq!(data.access_token_expires, Some(now + Duration::seconds(3600)));
    }
}
