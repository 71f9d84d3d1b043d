//! HTTP request/response values.
//!
//! These are transport-neutral: the client crate converts them to and from
//! `reqwest` types, and the store crate snapshots them into rows.

use std::borrow::Cow;
use std::time::Duration;

use serde::de::DeserializeOwned;
use url::Url;

use crate::error::CoreError;
use crate::fingerprint::fingerprint;
use crate::models::options::CallOptions;

// ============================================================================
// Request
// ============================================================================

/// An outbound HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Upper-case HTTP method.
    pub method: String,
    /// Absolute URL.
    pub url: String,
    /// Headers in insertion order.
    pub headers: Vec<(String, String)>,
    /// Raw body bytes (empty for bodiless requests).
    pub body: Vec<u8>,
    /// Per-request timeout overriding the transport default.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Creates a request with the given method and URL.
    pub fn new(method: impl AsRef<str>, url: impl Into<String>) -> Self {
        Self {
            method: method.as_ref().to_ascii_uppercase(),
            url: url.into(),
            headers: Vec::new(),
            body: Vec::new(),
            timeout: None,
        }
    }

    /// Creates a GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    /// Creates a POST request.
    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }

    /// Creates a PUT request.
    pub fn put(url: impl Into<String>) -> Self {
        Self::new("PUT", url)
    }

    /// Creates a DELETE request.
    pub fn delete(url: impl Into<String>) -> Self {
        Self::new("DELETE", url)
    }

    /// Adds or replaces a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Serializes `value` as the JSON body and sets `Content-Type`.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be serialized.
    pub fn with_json<T: serde::Serialize + ?Sized>(self, value: &T) -> Result<Self, CoreError> {
        let body = serde_json::to_vec(value)?;
        Ok(self
            .with_header("Content-Type", "application/json")
            .with_body(body))
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the first header value matching `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Replaces every header named `name` with a single value.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove_header(&name);
        self.headers.push((name, value.into()));
    }

    /// Removes every header named `name`.
    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    /// Parses the URL.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidUrl`] if the URL is not absolute or malformed.
    pub fn parsed_url(&self) -> Result<Url, CoreError> {
        Url::parse(&self.url).map_err(|e| CoreError::InvalidUrl(format!("{}: {e}", self.url)))
    }

    /// Returns the URL path, or `None` if the URL does not parse.
    pub fn path(&self) -> Option<String> {
        self.parsed_url().ok().map(|u| u.path().to_string())
    }

    /// Returns the fingerprint of this request (method, URL, and body).
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.method, &self.url, &self.body)
    }
}

// ============================================================================
// Response
// ============================================================================

/// Where a response came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseSource {
    /// Fetched over the network.
    #[default]
    Network,
    /// Served from the local response cache.
    Cache,
}

/// An HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Headers in arrival order.
    pub headers: Vec<(String, String)>,
    /// Fully buffered body.
    pub body: Vec<u8>,
    /// URL of the request this response answers.
    pub url: String,
    /// Network or cache.
    pub source: ResponseSource,
}

impl HttpResponse {
    /// Creates a network response with the given status and body.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
            url: String::new(),
            source: ResponseSource::Network,
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Binds the response to a request URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Returns true for 2xx status codes.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns true for 401.
    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    /// Returns true if this response was served from the local cache.
    pub fn is_from_cache(&self) -> bool {
        self.source == ResponseSource::Cache
    }

    /// Returns the first header value matching `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Returns the body as text, replacing invalid UTF-8.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Deserializes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, CoreError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

// ============================================================================
// Call
// ============================================================================

/// A request travelling through the client together with its policy.
///
/// Options ride along with the request instead of being parked in a side
/// table keyed by fingerprint.
#[derive(Debug, Clone)]
pub struct Call {
    /// The request to send.
    pub request: HttpRequest,
    /// Cache or reliability policy, if any.
    pub options: Option<CallOptions>,
}

impl Call {
    /// Creates a call without options.
    pub fn new(request: HttpRequest) -> Self {
        Self {
            request,
            options: None,
        }
    }

    /// Attaches a policy.
    #[must_use]
    pub fn with_options(mut self, options: impl Into<CallOptions>) -> Self {
        self.options = Some(options.into());
        self
    }

    /// Returns the fingerprint of the underlying request.
    pub fn fingerprint(&self) -> String {
        self.request.fingerprint()
    }

    /// Returns true if the call carries reliable-delivery options.
    pub fn is_reliable(&self) -> bool {
        matches!(self.options, Some(CallOptions::Reliable(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CacheOptions;

    #[test]
    fn test_method_is_uppercased() {
        assert_eq!(HttpRequest::new("patch", "https://h/").method, "PATCH");
    }

    #[test]
    fn test_set_header_replaces_case_insensitively() {
        let mut req = HttpRequest::get("https://h/api/x").with_header("authorization", "Basic a");
        req.set_header("Authorization", "Bearer b");

        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.header("AUTHORIZATION"), Some("Bearer b"));
    }

    #[test]
    fn test_path() {
        let req = HttpRequest::get("https://api.example.com/api/users?q=1");
        assert_eq!(req.path().as_deref(), Some("/api/users"));
        assert!(HttpRequest::get("not a url").path().is_none());
    }

    #[test]
    fn test_with_json_sets_content_type() {
        let req = HttpRequest::post("https://h/api/x")
            .with_json(&serde_json::json!({"a": 1}))
            .unwrap();
        assert_eq!(req.header("content-type"), Some("application/json"));
        assert_eq!(req.body, br#"{"a":1}"#);
    }

    #[test]
    fn test_response_helpers() {
        let resp = HttpResponse::new(204, Vec::new()).with_header("X-A", "1");
        assert!(resp.is_success());
        assert!(!resp.is_unauthorized());
        assert!(!resp.is_from_cache());
        assert_eq!(resp.header("x-a"), Some("1"));
        assert!(HttpResponse::new(401, Vec::new()).is_unauthorized());
    }

    #[test]
    fn test_call_reliability_flag() {
        let req = HttpRequest::get("https://h/api/x");
        assert!(!Call::new(req.clone()).is_reliable());
        assert!(!Call::new(req.clone()).with_options(CacheOptions::builder().max_cache_age(5).build()).is_reliable());
    }
}
