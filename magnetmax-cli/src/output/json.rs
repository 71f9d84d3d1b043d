//! JSON output formatting.

use anyhow::Result;
use chrono::{DateTime, Utc};
use magnetmax_core::{Call, HttpResponse};
use magnetmax_store::ReliableRequestEntity;
use serde::{Serialize, Serializer};

// ============================================================================
// Output Types
// ============================================================================

/// JSON output for a completed call.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseOutput {
    pub status: u16,
    pub url: String,
    pub from_cache: bool,
    pub headers: Vec<HeaderOutput>,
    pub body: String,
}

/// A single response header.
#[derive(Debug, Serialize)]
pub struct HeaderOutput {
    pub name: String,
    pub value: String,
}

/// JSON output for a call that was queued instead of sent.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeferredOutput {
    pub deferred: bool,
    pub method: String,
    pub url: String,
    pub fingerprint: String,
    pub reliable: bool,
}

/// A persisted reliable call.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOutput {
    pub id: i64,
    pub method: String,
    pub url: String,
    pub retries: u32,
    pub wifi_only: bool,
    #[serde(serialize_with = "serialize_millis")]
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_millis_opt")]
    pub expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
}

impl From<&ReliableRequestEntity> for PendingOutput {
    fn from(entity: &ReliableRequestEntity) -> Self {
        Self {
            id: entity.id,
            method: entity.http_method.clone(),
            url: entity.url.clone(),
            retries: entity.retries,
            wifi_only: entity.wifi_preq,
            created_at: entity.created_at,
            expires_at: (entity.expired_at > 0).then_some(entity.expired_at),
            last_failure_reason: entity.last_failure_reason.clone(),
            handler: entity.options.handler.clone(),
        }
    }
}

// ============================================================================
// Serialization helpers
// ============================================================================

fn rfc3339(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map_or_else(|| millis.to_string(), |dt| dt.to_rfc3339())
}

fn serialize_millis<S>(millis: &i64, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    s.serialize_str(&rfc3339(*millis))
}

#[allow(clippy::ref_option)]
fn serialize_millis_opt<S>(millis: &Option<i64>, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match millis {
        Some(millis) => s.serialize_str(&rfc3339(*millis)),
        None => s.serialize_none(),
    }
}

// ============================================================================
// JSON Formatter
// ============================================================================

/// JSON formatter.
pub struct JsonFormatter {
    pretty: bool,
}

impl JsonFormatter {
    /// Creates a new JSON formatter.
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    /// Formats any serializable value.
    pub fn format<T: Serialize>(&self, data: &T) -> Result<String> {
        let json = if self.pretty {
            serde_json::to_string_pretty(data)?
        } else {
            serde_json::to_string(data)?
        };
        Ok(json)
    }

    /// Formats a completed call.
    pub fn format_response(&self, response: &HttpResponse) -> Result<String> {
        self.format(&response_output(response))
    }

    /// Formats a deferred call.
    pub fn format_deferred(&self, call: &Call) -> Result<String> {
        self.format(&DeferredOutput {
            deferred: true,
            method: call.request.method.clone(),
            url: call.request.url.clone(),
            fingerprint: call.fingerprint(),
            reliable: call.is_reliable(),
        })
    }

    /// Formats the reliable-call queue.
    pub fn format_pending(&self, entities: &[ReliableRequestEntity]) -> Result<String> {
        let rows: Vec<PendingOutput> = entities.iter().map(PendingOutput::from).collect();
        self.format(&rows)
    }
}

fn response_output(response: &HttpResponse) -> ResponseOutput {
    ResponseOutput {
        status: response.status,
        url: response.url.clone(),
        from_cache: response.is_from_cache(),
        headers: response
            .headers
            .iter()
            .map(|(name, value)| HeaderOutput {
                name: name.clone(),
                value: value.clone(),
            })
            .collect(),
        body: response.text().into_owned(),
    }
}
