//! Session context: the tokens shared by every collaborator of a client.
//!
//! One `Session` is created per client and handed to the interceptor, the
//! authenticator and the request manager. Token changes are broadcast as
//! [`SessionEvent`]s.

use std::sync::{Arc, PoisonError, RwLock};

use magnetmax_store::keychain::{SecretStore, keys};
use magnetmax_store::MagnetConfig;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Capacity of the session event channel.
const EVENT_CAPACITY: usize = 32;

/// Token lifecycle notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A new application token was stored.
    AppTokenUpdated,
    /// A new user token was stored.
    UserTokenUpdated,
    /// The application token could not be renewed.
    AppTokenInvalid,
    /// The user token could not be renewed.
    UserTokenInvalid,
    /// The user session ended.
    LoggedOut,
}

#[derive(Debug, Default)]
struct Tokens {
    app: Option<String>,
    user: Option<String>,
    refresh: Option<String>,
}

/// Shared auth state.
#[derive(Debug)]
pub struct Session {
    tokens: RwLock<Tokens>,
    auth_enabled: bool,
    public_paths: Vec<String>,
    secrets: Option<Arc<dyn SecretStore>>,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    /// Creates an empty session.
    pub fn new(auth_enabled: bool) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            tokens: RwLock::new(Tokens::default()),
            auth_enabled,
            public_paths: Vec::new(),
            secrets: None,
            events,
        }
    }

    /// Creates a session for `config`.
    ///
    /// The app-auth and login endpoints never carry a bearer token.
    pub fn from_config(config: &MagnetConfig) -> Self {
        Self::new(config.auth_enabled).with_public_paths([
            config.app_auth_path.clone(),
            config.user_login_path.clone(),
        ])
    }

    /// Adds path prefixes that are sent without a bearer token.
    #[must_use]
    pub fn with_public_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.public_paths.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Persists refresh tokens in `secrets` and restores a stored one.
    #[must_use]
    pub fn with_secret_store(mut self, secrets: Arc<dyn SecretStore>) -> Self {
        match secrets.get(keys::REFRESH_TOKEN) {
            Ok(Some(token)) => {
                debug!("Restored refresh token");
                self.write().refresh = Some(token);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to read refresh token"),
        }
        self.secrets = Some(secrets);
        self
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tokens> {
        self.tokens.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Tokens> {
        self.tokens.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns true if requests carry bearer tokens at all.
    pub fn auth_enabled(&self) -> bool {
        self.auth_enabled
    }

    /// Current application token.
    pub fn app_token(&self) -> Option<String> {
        self.read().app.clone()
    }

    /// Returns true if an application token is present.
    pub fn has_app_token(&self) -> bool {
        self.read().app.is_some()
    }

    /// Current user token.
    pub fn user_token(&self) -> Option<String> {
        self.read().user.clone()
    }

    /// Current user refresh token.
    pub fn refresh_token(&self) -> Option<String> {
        self.read().refresh.clone()
    }

    /// Token to send as `Authorization: Bearer`: the user's, else the app's.
    pub fn bearer_token(&self) -> Option<String> {
        let tokens = self.read();
        tokens.user.clone().or_else(|| tokens.app.clone())
    }

    /// Returns true if a request to `path` must carry a bearer token.
    pub fn requires_auth(&self, path: &str) -> bool {
        self.auth_enabled && !self.public_paths.iter().any(|p| path.starts_with(p.as_str()))
    }

    /// Subscribes to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Stores a new application token.
    ///
    /// Returns true exactly when the session goes from no app token to
    /// having one.
    pub fn set_app_token(&self, token: impl Into<String>) -> bool {
        let first = {
            let mut tokens = self.write();
            let first = tokens.app.is_none();
            tokens.app = Some(token.into());
            first
        };
        info!(first, "App token updated");
        self.emit(SessionEvent::AppTokenUpdated);
        first
    }

    /// Stores a new user token and, if given, a new refresh token.
    pub fn set_user_tokens(&self, access: impl Into<String>, refresh: Option<String>) {
        {
            let mut tokens = self.write();
            tokens.user = Some(access.into());
            if let Some(refresh) = &refresh {
                tokens.refresh = Some(refresh.clone());
            }
        }
        if let (Some(refresh), Some(secrets)) = (refresh, &self.secrets) {
            if let Err(e) = secrets.set(keys::REFRESH_TOKEN, &refresh) {
                warn!(error = %e, "Failed to persist refresh token");
            }
        }
        info!("User token updated");
        self.emit(SessionEvent::UserTokenUpdated);
    }

    /// Drops the application token after renewal failed.
    pub fn invalidate_app_token(&self) {
        self.write().app = None;
        warn!("App token invalid");
        self.emit(SessionEvent::AppTokenInvalid);
    }

    /// Drops the user tokens after renewal failed.
    pub fn invalidate_user_token(&self) {
        self.clear_user_tokens();
        warn!("User token invalid");
        self.emit(SessionEvent::UserTokenInvalid);
    }

    /// Ends the user session.
    pub fn log_out(&self) {
        self.clear_user_tokens();
        info!("User logged out");
        self.emit(SessionEvent::LoggedOut);
    }

    fn clear_user_tokens(&self) {
        {
            let mut tokens = self.write();
            tokens.user = None;
            tokens.refresh = None;
        }
        if let Some(secrets) = &self.secrets {
            if let Err(e) = secrets.delete(keys::REFRESH_TOKEN) {
                warn!(error = %e, "Failed to delete refresh token");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use magnetmax_store::MemorySecretStore;

    #[test]
    fn test_first_app_token_transition() {
        let session = Session::new(true);
        assert!(session.set_app_token("a1"));
        assert!(!session.set_app_token("a2"));
        assert_eq!(session.app_token().as_deref(), Some("a2"));

        session.invalidate_app_token();
        assert!(!session.has_app_token());
        assert!(session.set_app_token("a3"));
    }

    #[test]
    fn test_bearer_prefers_user_token() {
        let session = Session::new(true);
        assert!(session.bearer_token().is_none());

        session.set_app_token("app");
        assert_eq!(session.bearer_token().as_deref(), Some("app"));

        session.set_user_tokens("user", Some("refresh".into()));
        assert_eq!(session.bearer_token().as_deref(), Some("user"));

        session.log_out();
        assert_eq!(session.bearer_token().as_deref(), Some("app"));
        assert!(session.refresh_token().is_none());
    }

    #[test]
    fn test_requires_auth() {
        let config = MagnetConfig::default();
        let session = Session::from_config(&config);
        assert!(session.requires_auth("/api/com.magnet.server/messages"));
        assert!(!session.requires_auth(&config.app_auth_path));
        assert!(!session.requires_auth(&config.user_login_path));

        assert!(!Session::new(false).requires_auth("/api/anything"));
    }

    #[test]
    fn test_refresh_token_persisted_and_restored() {
        let secrets: Arc<dyn SecretStore> = Arc::new(MemorySecretStore::new());

        let session = Session::new(true).with_secret_store(secrets.clone());
        session.set_user_tokens("u1", Some("r1".into()));
        assert_eq!(secrets.get(keys::REFRESH_TOKEN).unwrap().as_deref(), Some("r1"));

        let restored = Session::new(true).with_secret_store(secrets.clone());
        assert_eq!(restored.refresh_token().as_deref(), Some("r1"));

        restored.invalidate_user_token();
        assert!(secrets.get(keys::REFRESH_TOKEN).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_events_broadcast() {
        let session = Session::new(true);
        let mut rx = session.subscribe();

        session.set_app_token("a");
        session.invalidate_user_token();

        assert_eq!(rx.recv().await.unwrap(), SessionEvent::AppTokenUpdated);
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::UserTokenInvalid);
    }
}
