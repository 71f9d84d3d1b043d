//! Persistable request/response snapshots.
//!
//! Snapshots are stored as JSON columns. Bodies are base64 encoded so binary
//! payloads survive the round-trip.

use serde::{Deserialize, Serialize};

use crate::models::http::{HttpRequest, HttpResponse, ResponseSource};

/// Snapshot of an outbound request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedRequest {
    /// HTTP method.
    pub method: String,
    /// Absolute URL.
    pub url: String,
    /// Headers in order.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Raw body.
    #[serde(default, with = "base64_body")]
    pub body: Vec<u8>,
}

impl CachedRequest {
    /// Rebuilds a sendable request from the snapshot.
    pub fn to_request(&self) -> HttpRequest {
        HttpRequest {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            timeout: None,
        }
    }
}

impl From<&HttpRequest> for CachedRequest {
    fn from(request: &HttpRequest) -> Self {
        Self {
            method: request.method.clone(),
            url: request.url.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
        }
    }
}

/// Snapshot of a received response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedResponse {
    /// Status code.
    pub status: u16,
    /// Headers in order.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Raw body.
    #[serde(default, with = "base64_body")]
    pub body: Vec<u8>,
}

impl CachedResponse {
    /// Rehydrates the snapshot as a cache-sourced response answering `request`.
    pub fn to_response(&self, request: &HttpRequest) -> HttpResponse {
        HttpResponse {
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
            url: request.url.clone(),
            source: ResponseSource::Cache,
        }
    }
}

impl From<&HttpResponse> for CachedResponse {
    fn from(response: &HttpResponse) -> Self {
        Self {
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
        }
    }
}

mod base64_body {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rehydrated_response_is_marked_cached() {
        let original = HttpResponse::new(200, b"hello".to_vec()).with_header("ETag", "v1");
        let snapshot = CachedResponse::from(&original);

        let target = HttpRequest::get("https://h/api/greeting");
        let rehydrated = snapshot.to_response(&target);

        assert_eq!(rehydrated.status, 200);
        assert_eq!(rehydrated.body, b"hello");
        assert_eq!(rehydrated.header("etag"), Some("v1"));
        assert_eq!(rehydrated.url, target.url);
        assert!(rehydrated.is_from_cache());
    }

    #[test]
    fn test_body_is_base64_in_json() {
        let snapshot = CachedRequest::from(&HttpRequest::post("https://h/x").with_body(vec![0u8, 255, 10]));
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["body"], "AP8K");
    }
}
