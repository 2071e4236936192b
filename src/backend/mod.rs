//! Identity backend adapter boundary.
//!
//! The session state machine only ever talks to the backend through the
//! [`IdentityBackend`] trait: submit credentials, receive tokens. This keeps
//! the core isolated from any particular transport or third-party SDK's
//! callback style - social-provider exchanges included.
//!
//! `HttpIdentityBackend` is the production implementation; tests substitute
//! scripted doubles.

pub mod error;
pub mod http;

use async_trait::async_trait;
use serde::Deserialize;

use crate::models::UserProfile;

pub use error::BackendError;
pub use http::HttpIdentityBackend;

/// Successful login or social-exchange response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub profile: UserProfile,
}

/// Successful token refresh response.
/// The refresh token is optional - some backends rotate only the access
/// token.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Supported social identity providers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocialProvider {
    Google,
    Apple,
    Facebook,
}

impl SocialProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            SocialProvider::Google => "google",
            SocialProvider::Apple => "apple",
            SocialProvider::Facebook => "facebook",
        }
    }
}

/// Contract with the identity backend.
///
/// All calls carry a bounded timeout; a timed-out call surfaces as
/// [`BackendError::Timeout`] and is treated by the state machine like any
/// other backend failure.
#[async_trait]
pub trait IdentityBackend: Send + Sync {
    /// Authenticate a principal with a secret, returning tokens and profile
    async fn submit_login(
        &self,
        principal: &str,
        secret: &str,
    ) -> Result<LoginResponse, BackendError>;

    /// Exchange a refresh token for fresh tokens
    async fn submit_refresh(&self, refresh_token: &str) -> Result<RefreshResponse, BackendError>;

    /// Notify the backend that a session ended. Best-effort on the caller's
    /// side - local teardown never waits for this to succeed.
    async fn submit_logout(&self, access_token: &str) -> Result<(), BackendError>;

    /// Fetch the profile for a valid access token
    async fn fetch_profile(&self, access_token: &str) -> Result<UserProfile, BackendError>;

    /// Exchange a social provider's token for first-party tokens
    async fn exchange_social_token(
        &self,
        provider: SocialProvider,
        provider_token: &str,
    ) -> Result<LoginResponse, BackendError>;
}
