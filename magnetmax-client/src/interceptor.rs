//! The per-call decision point.
//!
//! For every outbound call the interceptor, in order:
//!
//! 1. serves cache-only calls while offline (or fails them),
//! 2. serves fresh cache hits,
//! 3. attaches the bearer token,
//! 4. rewrites mock calls to the mock base path,
//! 5. sends, recovering one 401 through the [`Authenticator`],
//! 6. clears the reliable row of a delivered reliable call,
//! 7. caches a successful response under a caching policy.
//!
//! Cache and reliable rows are keyed by the call's original request, before
//! token attachment and mock rewriting.

use std::sync::Arc;

use magnetmax_core::{CacheOptions, Call, CallOptions, HttpRequest, HttpResponse};
use magnetmax_store::{ReliableRequestStore, ResponseCacheStore};
use tracing::{debug, instrument, warn};

use crate::authenticator::Authenticator;
use crate::connectivity::ConnectivitySource;
use crate::error::CallError;
use crate::session::Session;
use crate::transport::Transport;

const AUTHORIZATION: &str = "Authorization";

/// Runs a call through cache, auth and transport.
#[derive(Debug)]
pub struct Interceptor {
    transport: Arc<dyn Transport>,
    session: Arc<Session>,
    authenticator: Arc<Authenticator>,
    cache: ResponseCacheStore,
    reliable: ReliableRequestStore,
    connectivity: Arc<dyn ConnectivitySource>,
    rest_base_path: String,
    mock_base_path: String,
}

impl Interceptor {
    /// Creates an interceptor with the default `/api/` and `/mock/api/`
    /// base paths.
    pub fn new(
        transport: Arc<dyn Transport>,
        session: Arc<Session>,
        authenticator: Arc<Authenticator>,
        cache: ResponseCacheStore,
        reliable: ReliableRequestStore,
        connectivity: Arc<dyn ConnectivitySource>,
    ) -> Self {
        Self {
            transport,
            session,
            authenticator,
            cache,
            reliable,
            connectivity,
            rest_base_path: "/api/".to_string(),
            mock_base_path: "/mock/api/".to_string(),
        }
    }

    /// Sets the REST and mock base paths.
    #[must_use]
    pub fn with_base_paths(
        mut self,
        rest_base_path: impl Into<String>,
        mock_base_path: impl Into<String>,
    ) -> Self {
        self.rest_base_path = rest_base_path.into();
        self.mock_base_path = mock_base_path.into();
        self
    }

    /// Returns the session this interceptor authorizes with.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Returns the response cache.
    pub fn cache(&self) -> &ResponseCacheStore {
        &self.cache
    }

    /// Runs `call` to completion.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::NoCachedResponseOffline`] for an offline
    /// cache-only call without a cached response, [`CallError::Transport`]
    /// when the network fails, and [`CallError::Unauthorized`] when a 401
    /// could not be recovered.
    #[instrument(skip_all, fields(method = %call.request.method, url = %call.request.url))]
    pub async fn intercept(&self, call: &Call) -> Result<HttpResponse, CallError> {
        let cache_options = call.options.as_ref().and_then(CallOptions::as_cache);

        if let Some(options) = cache_options {
            if let Some(result) = self.serve_from_cache(&call.request, options) {
                return result;
            }
        }

        let mut request = call.request.clone();
        self.attach_token(&mut request);
        if call.options.as_ref().is_some_and(CallOptions::use_mock) {
            self.rewrite_to_mock(&mut request)?;
        }
        if let Some(timeout) = cache_options.and_then(|o| o.response_timeout) {
            request.timeout = Some(timeout);
        }

        let mut response = self.transport.execute(request.clone()).await?;

        if response.is_unauthorized() {
            if let Some(retry) = self.authenticator.authenticate(&request, &response).await {
                debug!("Replaying with renewed token");
                response = self.transport.execute(retry).await?;
            }
            if response.is_unauthorized() {
                return Err(CallError::Unauthorized {
                    status: response.status,
                });
            }
        }

        if call.is_reliable() {
            if let Err(e) = self.reliable.remove_request(&call.request) {
                warn!(error = %e, "Failed to clear delivered reliable request");
            }
        }

        if let Some(options) = cache_options {
            if options.should_cache() && response.is_success() {
                response = self.cache.cache_response(&call.request, response, options);
            }
        }

        Ok(response)
    }

    /// Steps 1 and 2: `Some` short-circuits the network.
    fn serve_from_cache(
        &self,
        request: &HttpRequest,
        options: &CacheOptions,
    ) -> Option<Result<HttpResponse, CallError>> {
        let offline = !self.connectivity.current().is_connected();

        if options.always_use_cache_if_offline && offline {
            debug!("Offline, serving from cache only");
            return Some(
                self.cache
                    .get_cached_response(request, options, true)
                    .ok_or(CallError::NoCachedResponseOffline),
            );
        }

        if options.max_cache_age > 0 {
            return self
                .cache
                .get_cached_response(request, options, false)
                .map(Ok);
        }

        None
    }

    /// Step 3. A Basic `Authorization` header is never replaced.
    fn attach_token(&self, request: &mut HttpRequest) {
        let Some(path) = request.path() else {
            return;
        };
        if !self.session.requires_auth(&path) {
            return;
        }
        if request
            .header(AUTHORIZATION)
            .is_some_and(|v| v.starts_with("Basic "))
        {
            return;
        }
        if let Some(token) = self.session.bearer_token() {
            request.set_header(AUTHORIZATION, format!("Bearer {token}"));
        }
    }

    /// Step 4.
    fn rewrite_to_mock(&self, request: &mut HttpRequest) -> Result<(), CallError> {
        let mut url = request.parsed_url()?;
        let Some(rest) = url.path().strip_prefix(self.rest_base_path.as_str()) else {
            return Ok(());
        };
        let path = format!("{}{rest}", self.mock_base_path);
        url.set_path(&path);
        debug!(path = %path, "Rewrote to mock endpoint");
        request.url = url.to_string();
        Ok(())
    }
}
