//! Token endpoints: app authentication, user login, logout and refresh.
//!
//! Auth requests go straight to the transport, never through the
//! interceptor, so a failing refresh cannot recurse into the authenticator.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use magnetmax_core::{HttpRequest, HttpResponse};
use magnetmax_store::keychain::{SecretStore, keys};
use magnetmax_store::MagnetConfig;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument};

use crate::error::AuthError;
use crate::transport::Transport;

// ============================================================================
// Token Grant
// ============================================================================

/// Token response of the auth endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenGrant {
    /// Bearer token.
    #[serde(alias = "accessToken")]
    pub access_token: String,

    /// Refresh token, for user grants.
    #[serde(default, alias = "refreshToken")]
    pub refresh_token: Option<String>,

    /// Lifetime of the access token in seconds.
    #[serde(default, alias = "expiresIn")]
    pub expires_in: Option<u64>,

    /// Token type, usually `Bearer`.
    #[serde(default, alias = "tokenType")]
    pub token_type: Option<String>,
}

// ============================================================================
// Auth API
// ============================================================================

/// Calls to the server's token endpoints.
#[async_trait]
pub trait AuthApi: Send + Sync + Debug {
    /// Obtains an application token with the client credentials.
    async fn authenticate_app(&self) -> Result<TokenGrant, AuthError>;

    /// Exchanges a refresh token for a new user token.
    async fn refresh_user_token(&self, refresh_token: &str) -> Result<TokenGrant, AuthError>;

    /// Signs a user in.
    async fn login(&self, username: &str, password: &str) -> Result<TokenGrant, AuthError>;

    /// Signs the user out on the server.
    async fn logout(&self, user_token: &str) -> Result<(), AuthError>;
}

/// [`AuthApi`] over the REST endpoints named in [`MagnetConfig`].
#[derive(Debug, Clone)]
pub struct RestAuthApi {
    transport: Arc<dyn Transport>,
    config: MagnetConfig,
    secrets: Arc<dyn SecretStore>,
}

impl RestAuthApi {
    /// Creates the API client.
    pub fn new(
        transport: Arc<dyn Transport>,
        config: MagnetConfig,
        secrets: Arc<dyn SecretStore>,
    ) -> Self {
        Self {
            transport,
            config,
            secrets,
        }
    }

    fn post(&self, path: &str, body: &serde_json::Value) -> Result<HttpRequest, AuthError> {
        let url = self.config.endpoint(path)?;
        HttpRequest::post(url)
            .with_header("Accept", "application/json")
            .with_timeout(self.config.request_timeout())
            .with_json(body)
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))
    }

    fn client_basic_auth(&self) -> Result<String, AuthError> {
        let secret = self
            .secrets
            .get(keys::CLIENT_SECRET)?
            .ok_or_else(|| AuthError::MissingClientSecret(self.config.client_id.clone()))?;
        let credentials = STANDARD.encode(format!("{}:{secret}", self.config.client_id));
        Ok(format!("Basic {credentials}"))
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, AuthError> {
        let response = self.transport.execute(request).await?;
        if !response.is_success() {
            return Err(AuthError::Rejected {
                status: response.status,
            });
        }
        Ok(response)
    }

    async fn grant(&self, request: HttpRequest) -> Result<TokenGrant, AuthError> {
        let response = self.send(request).await?;
        response
            .json::<TokenGrant>()
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl AuthApi for RestAuthApi {
    #[instrument(skip(self), fields(client_id = %self.config.client_id))]
    async fn authenticate_app(&self) -> Result<TokenGrant, AuthError> {
        let authorization = self.client_basic_auth()?;
        let request = self
            .post(
                &self.config.app_auth_path,
                &json!({ "grant_type": "client_credentials" }),
            )?
            .with_header("Authorization", authorization);

        let grant = self.grant(request).await?;
        info!("Application authenticated");
        Ok(grant)
    }

    #[instrument(skip_all)]
    async fn refresh_user_token(&self, refresh_token: &str) -> Result<TokenGrant, AuthError> {
        let request = self.post(
            &self.config.token_refresh_path,
            &json!({
                "grant_type": "refresh_token",
                "refresh_token": refresh_token,
                "client_id": self.config.client_id,
            }),
        )?;

        let grant = self.grant(request).await?;
        debug!("User token refreshed");
        Ok(grant)
    }

    #[instrument(skip(self, password))]
    async fn login(&self, username: &str, password: &str) -> Result<TokenGrant, AuthError> {
        let request = self.post(
            &self.config.user_login_path,
            &json!({
                "grant_type": "password",
                "username": username,
                "password": password,
                "client_id": self.config.client_id,
            }),
        )?;

        let grant = self.grant(request).await?;
        info!("User logged in");
        Ok(grant)
    }

    #[instrument(skip_all)]
    async fn logout(&self, user_token: &str) -> Result<(), AuthError> {
        let request = self
            .post(&self.config.user_logout_path, &json!({}))?
            .with_header("Authorization", format!("Bearer {user_token}"));
        self.send(request).await?;
        debug!("Server session closed");
        Ok(())
    }
}
