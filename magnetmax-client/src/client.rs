//! The `MagnetMax` client facade.
//!
//! [`MagnetClient`] wires the session, the interceptor, the request manager
//! and the dispatcher together, and owns the background tasks that react to
//! connectivity and session changes.

use std::sync::{Arc, Mutex, PoisonError};

use magnetmax_core::{Call, Clock, HttpRequest, HttpResponse, NetworkClass, SystemClock};
use magnetmax_store::{
    Database, KeyringSecretStore, MagnetConfig, ReliableRequestEntity, ReliableRequestStore,
    ResponseCacheStore, SecretStore, StoreError,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::auth::{AuthApi, RestAuthApi};
use crate::authenticator::Authenticator;
use crate::callback::{CallCallback, HandlerRegistry, OneshotCallback};
use crate::conditions::ConditionEvaluator;
use crate::connectivity::{ConnectivityMonitor, ConnectivitySource};
use crate::dispatcher::{CallHandle, Dispatcher};
use crate::error::{AuthError, CallError, ClientError};
use crate::interceptor::Interceptor;
use crate::request_manager::RequestManager;
use crate::session::{Session, SessionEvent};
use crate::transport::{HttpTransport, Transport};

// ============================================================================
// Magnet Client
// ============================================================================

/// Entry point for issuing calls.
///
/// Must be used from within a tokio runtime.
pub struct MagnetClient {
    config: MagnetConfig,
    session: Arc<Session>,
    auth_api: Arc<dyn AuthApi>,
    connectivity: Arc<dyn ConnectivitySource>,
    conditions: Arc<ConditionEvaluator>,
    handlers: Arc<HandlerRegistry>,
    dispatcher: Dispatcher,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MagnetClient {
    /// Creates a builder.
    pub fn builder() -> MagnetClientBuilder {
        MagnetClientBuilder::new()
    }

    /// Returns the configuration the client was built with.
    pub fn config(&self) -> &MagnetConfig {
        &self.config
    }

    /// Returns the session context.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Returns the registry used to resolve replayed reliable calls.
    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    /// Returns the condition evaluator, for registering named conditions.
    pub fn conditions(&self) -> &Arc<ConditionEvaluator> {
        &self.conditions
    }

    /// Returns the pending-call manager.
    pub fn request_manager(&self) -> &Arc<RequestManager> {
        self.dispatcher.manager()
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Dispatches `call`; `callback` receives the outcome.
    pub fn enqueue(&self, call: Call, callback: Arc<dyn CallCallback>) -> CallHandle {
        self.dispatcher.dispatch(call, callback)
    }

    /// Dispatches `call` and waits for its outcome.
    ///
    /// A deferred call resolves once it is eventually sent. If the call is
    /// dropped without an outcome (cancelled, or cleared by a logout) this
    /// returns [`CallError::Cancelled`].
    ///
    /// # Errors
    ///
    /// Returns the [`CallError`] delivered to the call's callback.
    pub async fn execute(&self, call: Call) -> Result<HttpResponse, CallError> {
        let (callback, rx) = OneshotCallback::channel();
        let _handle = self.enqueue(call, Arc::new(callback));
        rx.await.unwrap_or(Err(CallError::Cancelled))
    }

    /// Removes a reliable call so it is never resent.
    pub fn cancel_reliable(&self, request: &HttpRequest) -> bool {
        self.request_manager().remove_reliable_request(request)
    }

    /// Lists persisted reliable calls, pruning expired ones.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be read.
    pub fn pending_reliable_calls(&self) -> Result<Vec<ReliableRequestEntity>, StoreError> {
        self.request_manager()
            .store()
            .get_all_cached_request_entities()
    }

    /// Deletes every cached response.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be written.
    pub fn clear_cache(&self) -> Result<usize, StoreError> {
        self.dispatcher.interceptor().cache().clear()
    }

    /// Resends every persisted reliable call whose conditions hold.
    pub async fn resend_reliable_calls(&self) -> usize {
        self.request_manager()
            .resend_reliable_calls(&self.dispatcher)
            .await
    }

    // ========================================================================
    // Tokens
    // ========================================================================

    /// Records a new application token.
    ///
    /// Calls waiting in the token queue are drained. On the first token,
    /// or when anything was drained, persisted reliable calls are resent
    /// too. Returns the number of queued calls drained.
    pub async fn on_app_token_update(&self, token: impl Into<String>) -> usize {
        let first = self.session.set_app_token(token);
        let drained = self.dispatcher.resume_token_waiters();
        if first || drained > 0 {
            self.resend_reliable_calls().await;
        }
        drained
    }

    /// Records new user tokens.
    pub fn on_user_token_update(&self, access: impl Into<String>, refresh: Option<String>) {
        self.session.set_user_tokens(access, refresh);
    }

    /// Authenticates the application with its client credentials.
    ///
    /// # Errors
    ///
    /// Returns error if the client secret is missing or the server rejects
    /// it.
    #[instrument(skip(self))]
    pub async fn authenticate_app(&self) -> Result<(), AuthError> {
        let grant = self.auth_api.authenticate_app().await?;
        self.on_app_token_update(grant.access_token).await;
        Ok(())
    }

    /// Logs a user in.
    ///
    /// # Errors
    ///
    /// Returns error if the credentials are rejected.
    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<(), AuthError> {
        let grant = self.auth_api.login(username, password).await?;
        self.on_user_token_update(grant.access_token, grant.refresh_token);
        Ok(())
    }

    /// Logs the user out and drops every pending reliable call.
    ///
    /// The server-side logout is best effort. Returns the number of
    /// reliable calls dropped.
    pub async fn logout(&self) -> usize {
        if let Some(user_token) = self.session.user_token() {
            if let Err(e) = self.auth_api.logout(&user_token).await {
                warn!(error = %e, "Server logout failed");
            }
        }
        self.session.log_out();
        self.request_manager().clear_pending_calls()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Starts the connectivity and session watchers.
    ///
    /// Persisted reliable calls are resent right away if an app token is
    /// already available.
    pub async fn start(&self) {
        {
            let mut tasks = self.tasks();
            if !tasks.is_empty() {
                debug!("Client already started");
                return;
            }
            tasks.push(self.spawn_connectivity_watcher());
            tasks.push(self.spawn_session_watcher());
        }
        info!("MagnetMax client started");

        if !self.session.auth_enabled() || self.session.has_app_token() {
            self.resend_reliable_calls().await;
        }
    }

    /// Stops the background watchers. In-flight calls are not cancelled.
    pub fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.tasks());
        for task in &tasks {
            task.abort();
        }
        if !tasks.is_empty() {
            info!("MagnetMax client stopped");
        }
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_connectivity_watcher(&self) -> JoinHandle<()> {
        let mut rx = self.connectivity.subscribe();
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let network: NetworkClass = *rx.borrow_and_update();
                let resent = dispatcher
                    .manager()
                    .on_connectivity_change(network, &dispatcher)
                    .await;
                debug!(network = ?network, resent, "Handled connectivity change");
            }
        })
    }

    fn spawn_session_watcher(&self) -> JoinHandle<()> {
        let mut rx = self.session.subscribe();
        let session = self.session.clone();
        let manager = self.dispatcher.manager().clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(SessionEvent::UserTokenInvalid) => {
                        warn!("User token invalid, logging out");
                        session.log_out();
                        manager.clear_pending_calls();
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Session watcher lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Drop for MagnetClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for MagnetClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MagnetClient")
            .field("base_url", &self.config.base_url)
            .field("client_id", &self.config.client_id)
            .field("has_app_token", &self.session.has_app_token())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Magnet Client Builder
// ============================================================================

/// Builder for [`MagnetClient`].
///
/// Anything not set falls back to the production implementation derived
/// from the config.
#[derive(Default)]
pub struct MagnetClientBuilder {
    config: MagnetConfig,
    transport: Option<Arc<dyn Transport>>,
    auth_api: Option<Arc<dyn AuthApi>>,
    secrets: Option<Arc<dyn SecretStore>>,
    connectivity: Option<Arc<dyn ConnectivitySource>>,
    database: Option<Arc<Database>>,
    clock: Option<Arc<dyn Clock>>,
}

impl MagnetClientBuilder {
    /// Creates a builder with the default config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration.
    pub fn config(mut self, config: MagnetConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the auth API.
    pub fn auth_api(mut self, auth_api: Arc<dyn AuthApi>) -> Self {
        self.auth_api = Some(auth_api);
        self
    }

    /// Sets the secret store.
    pub fn secrets(mut self, secrets: Arc<dyn SecretStore>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Sets the connectivity source.
    pub fn connectivity(mut self, connectivity: Arc<dyn ConnectivitySource>) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    /// Sets the database.
    pub fn database(mut self, database: Arc<Database>) -> Self {
        self.database = Some(database);
        self
    }

    /// Sets the clock used for expiry checks and a default database.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    ///
    /// Returns error if the config is invalid, the database cannot be
    /// opened, or the HTTP stack cannot be initialized.
    pub fn build(self) -> Result<MagnetClient, ClientError> {
        let config = self.config;
        config
            .validate()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::with_timeout(config.request_timeout())?),
        };
        let secrets = self
            .secrets
            .unwrap_or_else(|| Arc::new(KeyringSecretStore::for_client(&config.client_id)));
        let connectivity = self
            .connectivity
            .unwrap_or_else(|| Arc::new(ConnectivityMonitor::default()));
        let database = match self.database {
            Some(database) => database,
            None => Arc::new(Database::open_with_clock(
                &config.database_path(),
                clock.clone(),
            )?),
        };
        let auth_api = self.auth_api.unwrap_or_else(|| {
            Arc::new(RestAuthApi::new(
                transport.clone(),
                config.clone(),
                secrets.clone(),
            ))
        });

        let session = Arc::new(Session::from_config(&config).with_secret_store(secrets));
        let authenticator = Arc::new(Authenticator::from_config(
            session.clone(),
            auth_api.clone(),
            &config,
        ));
        let reliable = ReliableRequestStore::new(database.clone());
        let interceptor = Interceptor::new(
            transport,
            session.clone(),
            authenticator,
            ResponseCacheStore::new(database),
            reliable.clone(),
            connectivity.clone(),
        )
        .with_base_paths(config.rest_base_path.clone(), config.mock_base_path.clone());

        let conditions = Arc::new(ConditionEvaluator::new(connectivity.clone()));
        let handlers = Arc::new(HandlerRegistry::new());
        let manager = RequestManager::new(reliable, conditions.clone(), handlers.clone(), clock);
        let dispatcher = Dispatcher::new(Arc::new(interceptor), Arc::new(manager));

        debug!(base_url = %config.base_url, "Built MagnetMax client");
        Ok(MagnetClient {
            config,
            session,
            auth_api,
            connectivity,
            conditions,
            handlers,
            dispatcher,
            tasks: Mutex::new(Vec::new()),
        })
    }
}
