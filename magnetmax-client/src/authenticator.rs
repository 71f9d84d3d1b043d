//! 401 recovery.
//!
//! On a 401 the authenticator classifies the failure from the
//! `WWW-Authenticate` header, renews the matching token with one bounded
//! attempt, and hands back the request rebuilt with the new bearer token.
//! Auth endpoints themselves are never recovered.

use std::sync::Arc;
use std::time::Duration;

use magnetmax_core::{HttpRequest, HttpResponse};
use magnetmax_store::MagnetConfig;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::auth::AuthApi;
use crate::session::Session;

/// Header carrying the 401 classification.
pub const WWW_AUTHENTICATE: &str = "WWW-Authenticate";

const INVALID_APP_TOKEN: &str = "invalid_app_token";
const INVALID_USER_TOKEN: &str = "invalid_user_token";

/// Which credential a 401 blames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// The application token is invalid or expired.
    AppToken,
    /// The user token is invalid or expired.
    UserToken,
    /// Anything else.
    Unclassified,
}

impl AuthFailure {
    /// Classifies a 401 response.
    pub fn classify(response: &HttpResponse) -> Self {
        match response.header(WWW_AUTHENTICATE) {
            Some(value) if value.contains(INVALID_APP_TOKEN) => Self::AppToken,
            Some(value) if value.contains(INVALID_USER_TOKEN) => Self::UserToken,
            _ => Self::Unclassified,
        }
    }
}

/// Renews tokens on 401 and rebuilds the failing request.
#[derive(Debug)]
pub struct Authenticator {
    session: Arc<Session>,
    auth_api: Arc<dyn AuthApi>,
    excluded_paths: Vec<String>,
    refresh_timeout: Duration,
}

impl Authenticator {
    /// Creates an authenticator.
    pub fn new(
        session: Arc<Session>,
        auth_api: Arc<dyn AuthApi>,
        excluded_paths: Vec<String>,
        refresh_timeout: Duration,
    ) -> Self {
        Self {
            session,
            auth_api,
            excluded_paths,
            refresh_timeout,
        }
    }

    /// Creates an authenticator that skips the auth endpoints of `config`.
    pub fn from_config(
        session: Arc<Session>,
        auth_api: Arc<dyn AuthApi>,
        config: &MagnetConfig,
    ) -> Self {
        let excluded = config
            .auth_endpoint_paths()
            .iter()
            .map(ToString::to_string)
            .collect();
        Self::new(session, auth_api, excluded, config.token_refresh_timeout())
    }

    /// Returns true if `request` targets an endpoint that owns its 401s.
    pub fn is_excluded(&self, request: &HttpRequest) -> bool {
        request.path().is_some_and(|path| {
            self.excluded_paths
                .iter()
                .any(|p| path.starts_with(p.as_str()))
        })
    }

    /// Handles a 401 for `request`.
    ///
    /// Returns the request to replay once, or `None` when no new token was
    /// obtained and the 401 should reach the caller.
    #[instrument(skip_all, fields(url = %request.url, status = response.status))]
    pub async fn authenticate(
        &self,
        request: &HttpRequest,
        response: &HttpResponse,
    ) -> Option<HttpRequest> {
        if !response.is_unauthorized() {
            return None;
        }
        if self.is_excluded(request) {
            debug!("Auth endpoint, not recovering");
            return None;
        }

        let token = match AuthFailure::classify(response) {
            AuthFailure::AppToken => self.renew_app_token().await?,
            AuthFailure::UserToken => self.renew_user_token().await?,
            AuthFailure::Unclassified => {
                debug!("Unclassified 401, not recovering");
                return None;
            }
        };

        let mut retry = request.clone();
        retry.set_header("Authorization", format!("Bearer {token}"));
        Some(retry)
    }

    async fn renew_app_token(&self) -> Option<String> {
        match timeout(self.refresh_timeout, self.auth_api.authenticate_app()).await {
            Ok(Ok(grant)) => {
                info!("App token renewed");
                self.session.set_app_token(grant.access_token.clone());
                Some(grant.access_token)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "App token renewal failed");
                self.session.invalidate_app_token();
                None
            }
            Err(_) => {
                warn!(timeout = ?self.refresh_timeout, "App token renewal timed out");
                self.session.invalidate_app_token();
                None
            }
        }
    }

    async fn renew_user_token(&self) -> Option<String> {
        let Some(refresh_token) = self.session.refresh_token() else {
            warn!("No refresh token, user token invalid");
            self.session.invalidate_user_token();
            return None;
        };

        match timeout(
            self.refresh_timeout,
            self.auth_api.refresh_user_token(&refresh_token),
        )
        .await
        {
            Ok(Ok(grant)) => {
                info!("User token renewed");
                self.session
                    .set_user_tokens(grant.access_token.clone(), grant.refresh_token);
                Some(grant.access_token)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "User token refresh failed");
                self.session.invalidate_user_token();
                None
            }
            Err(_) => {
                warn!(timeout = ?self.refresh_timeout, "User token refresh timed out");
                self.session.invalidate_user_token();
                None
            }
        }
    }
}
