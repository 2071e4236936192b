//! HTTP implementation of the identity backend contract.
//!
//! Thin JSON-over-HTTPS adapter: every trait method maps to one endpoint
//! under the configured base URL. Error bodies are mapped to `BackendError`
//! by status code; connection timeouts surface as `BackendError::Timeout`.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::models::UserProfile;

use super::{BackendError, IdentityBackend, LoginResponse, RefreshResponse, SocialProvider};

/// HTTP request timeout in seconds.
/// Long enough for a slow identity provider, short enough that a stuck
/// login or refresh resolves while the user is still watching.
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest<'a> {
    principal: &'a str,
    secret: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SocialExchangeRequest<'a> {
    provider: &'a str,
    provider_token: &'a str,
}

/// Identity backend over HTTPS.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpIdentityBackend {
    client: Client,
    base_url: String,
}

impl HttpIdentityBackend {
    pub fn new(base_url: impl Into<String>) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn map_send_error(e: reqwest::Error) -> BackendError {
        if e.is_timeout() {
            BackendError::Timeout
        } else {
            BackendError::Network(e)
        }
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, BackendError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(BackendError::from_status(status, &body))
        }
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, BackendError> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let response = Self::check_response(response).await?;
        response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl IdentityBackend for HttpIdentityBackend {
    async fn submit_login(
        &self,
        principal: &str,
        secret: &str,
    ) -> Result<LoginResponse, BackendError> {
        debug!("submitting login request");
        self.post_json("/v1/session", &LoginRequest { principal, secret })
            .await
    }

    async fn submit_refresh(&self, refresh_token: &str) -> Result<RefreshResponse, BackendError> {
        debug!("submitting token refresh");
        self.post_json("/v1/session/refresh", &RefreshRequest { refresh_token })
            .await
    }

    async fn submit_logout(&self, access_token: &str) -> Result<(), BackendError> {
        let response = self
            .client
            .post(self.url("/v1/session/logout"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        Self::check_response(response).await?;
        Ok(())
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<UserProfile, BackendError> {
        let response = self
            .client
            .get(self.url("/v1/profile"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let response = Self::check_response(response).await?;
        response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))
    }

    async fn exchange_social_token(
        &self,
        provider: SocialProvider,
        provider_token: &str,
    ) -> Result<LoginResponse, BackendError> {
        debug!(provider = provider.as_str(), "exchanging social token");
        self.post_json(
            "/v1/session/social",
            &SocialExchangeRequest {
                provider: provider.as_str(),
                provider_token,
            },
        )
        .await
    }
}
