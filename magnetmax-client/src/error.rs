//! Client error types.

use std::time::Duration;

use magnetmax_core::CoreError;
use magnetmax_store::StoreError;
use thiserror::Error;

// ============================================================================
// Transport Error
// ============================================================================

/// Failure to get any HTTP response at all.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Request error from the HTTP stack.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// No response within the timeout.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The request could not be built.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The connection could not be established.
    #[error("Connection failed: {0}")]
    Connection(String),
}

// ============================================================================
// Auth Error
// ============================================================================

/// Error type for app authentication, login, logout and token refresh.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Transport failure while talking to an auth endpoint.
    #[error("Auth request failed: {0}")]
    Transport(#[from] TransportError),

    /// The server answered with a non-success status.
    #[error("Server rejected credentials with status {status}")]
    Rejected {
        /// HTTP status code.
        status: u16,
    },

    /// The token response could not be parsed.
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    /// No client secret is stored for this application.
    #[error("No client secret stored for client {0}")]
    MissingClientSecret(String),

    /// No refresh token is available for the user.
    #[error("No refresh token available")]
    NoRefreshToken,

    /// The auth endpoint did not answer in time.
    #[error("Token request timed out after {0:?}")]
    Timeout(Duration),

    /// Config or keychain failure.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

// ============================================================================
// Call Error
// ============================================================================

/// Error handed to a call's callback.
#[derive(Debug, Error)]
pub enum CallError {
    /// The transport failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Offline, cache-only policy, and nothing cached.
    #[error("No cached response and device is offline")]
    NoCachedResponseOffline,

    /// Still unauthorized after the authenticator gave up.
    #[error("Unauthorized (status {status})")]
    Unauthorized {
        /// HTTP status code.
        status: u16,
    },

    /// An auth flow failed.
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// The call was cancelled before completing.
    #[error("Call cancelled")]
    Cancelled,

    /// The reliable call outlived its expiry.
    #[error("Reliable call expired")]
    Expired,

    /// A newer identical reliable call took over this one's place in the
    /// queue.
    #[error("Superseded by a newer identical reliable call")]
    Superseded,

    /// The request itself is malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] CoreError),
}

impl CallError {
    /// Returns true if the failure is worth persisting for a later resend.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

// ============================================================================
// Client Error
// ============================================================================

/// Error type for building a [`crate::MagnetClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The database or config could not be opened.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The HTTP stack could not be initialized.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}
