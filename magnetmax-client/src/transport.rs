//! HTTP transport.
//!
//! The [`Transport`] trait is the seam between the call pipeline and the
//! network. [`HttpTransport`] implements it over reqwest and
//! [`ScriptedTransport`] answers from an in-memory script.

use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use magnetmax_core::{HttpRequest, HttpResponse, ResponseSource};
use reqwest::{Client, Method};
use tracing::{debug, instrument};

use crate::error::TransportError;

/// Default request timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// User agent string for `MagnetMax`.
const USER_AGENT: &str = concat!("MagnetMax/", env!("CARGO_PKG_VERSION"));

/// Sends a request and buffers the full response.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Executes `request`.
    ///
    /// Any HTTP status is a response; only failing to get one is an error.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

// ============================================================================
// HTTP Transport
// ============================================================================

/// reqwest-backed transport with tracing.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    inner: Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Creates a transport with the default timeout.
    ///
    /// # Errors
    ///
    /// Returns error if the TLS backend cannot be initialized.
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Creates a transport with a custom default timeout.
    ///
    /// # Errors
    ///
    /// Returns error if the TLS backend cannot be initialized.
    pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let inner = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { inner, timeout })
    }

    /// Returns the default timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn build(&self, request: &HttpRequest) -> Result<reqwest::RequestBuilder, TransportError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| TransportError::InvalidRequest(format!("{}: {e}", request.method)))?;

        let mut builder = self.inner.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        Ok(builder)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let builder = self.build(&request)?;
        debug!("Sending request");

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(request.timeout.unwrap_or(self.timeout))
            } else if e.is_connect() {
                TransportError::Connection(e.to_string())
            } else {
                TransportError::Http(e)
            }
        })?;

        let status = response.status().as_u16();
        let url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();
        debug!(status, bytes = body.len(), "Response received");

        Ok(HttpResponse {
            status,
            headers,
            body,
            url,
            source: ResponseSource::Network,
        })
    }
}

// ============================================================================
// Scripted Transport
// ============================================================================

#[derive(Debug, Clone)]
enum Reply {
    Respond(HttpResponse),
    Fail(String),
}

#[derive(Debug, Default)]
struct Script {
    once: HashMap<String, VecDeque<Reply>>,
    always: HashMap<String, Reply>,
    sent: Vec<HttpRequest>,
}

/// In-memory transport that answers from a script, keyed by exact URL.
///
/// One-shot replies are consumed first, then the standing reply. A URL with
/// no reply fails with [`TransportError::Connection`]. Every request is
/// recorded.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<Script>,
}

impl ScriptedTransport {
    /// Creates an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answers every request to `url` with `response`.
    pub fn respond(&self, url: impl Into<String>, response: HttpResponse) {
        self.script().always.insert(url.into(), Reply::Respond(response));
    }

    /// Answers the next request to `url` with `response`.
    pub fn respond_once(&self, url: impl Into<String>, response: HttpResponse) {
        self.script()
            .once
            .entry(url.into())
            .or_default()
            .push_back(Reply::Respond(response));
    }

    /// Fails every request to `url`.
    pub fn fail(&self, url: impl Into<String>, message: impl Into<String>) {
        self.script().always.insert(url.into(), Reply::Fail(message.into()));
    }

    /// Fails the next request to `url`.
    pub fn fail_once(&self, url: impl Into<String>, message: impl Into<String>) {
        self.script()
            .once
            .entry(url.into())
            .or_default()
            .push_back(Reply::Fail(message.into()));
    }

    /// Returns every request sent so far.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.script().sent.clone()
    }

    /// Returns the number of requests sent to `url`.
    pub fn request_count(&self, url: &str) -> usize {
        self.script().sent.iter().filter(|r| r.url == url).count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let reply = {
            let mut script = self.script();
            script.sent.push(request.clone());
            let queued = script
                .once
                .get_mut(&request.url)
                .and_then(VecDeque::pop_front);
            queued.or_else(|| script.always.get(&request.url).cloned())
        };

        match reply {
            Some(Reply::Respond(response)) => Ok(response.with_url(request.url)),
            Some(Reply::Fail(message)) => Err(TransportError::Connection(message)),
            None => Err(TransportError::Connection(format!(
                "no scripted reply for {}",
                request.url
            ))),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
