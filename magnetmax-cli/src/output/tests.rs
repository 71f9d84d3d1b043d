//! CLI output formatting tests.
//!
//! These tests verify that CLI output is correctly formatted for both
//! text and JSON output modes.

use std::sync::Arc;

use magnetmax_core::{
    Call, HttpRequest, HttpResponse, ManualClock, ReliableCallOptions, ResponseSource,
};
use magnetmax_store::{Database, ReliableRequestEntity, ReliableRequestStore};

const NOW: i64 = 1_700_000_000_000;

fn pending_entities() -> Vec<ReliableRequestEntity> {
    let clock = Arc::new(ManualClock::new(NOW));
    let store = ReliableRequestStore::new(Arc::new(Database::open_in_memory(clock).unwrap()));
    let options = ReliableCallOptions::builder()
        .wifi_only()
        .created_at(NOW)
        .handler("sync")
        .build();
    let request = HttpRequest::post("https://magnet.example.com/api/events").with_body("{}");
    store.save_request(&request, &options, None).unwrap();
    store
        .save_request(&request, &options, Some("Connection failed: reset"))
        .unwrap();
    store.get_all_cached_request_entities().unwrap()
}

mod text_formatter_tests {
    use super::super::text::TextFormatter;
    use super::*;

    #[test]
    fn test_response_marks_cache_hits() {
        let formatter = TextFormatter::new(false);
        let mut response = HttpResponse::new(200, "{\"ok\":true}")
            .with_url("https://magnet.example.com/api/channels");
        response.source = ResponseSource::Cache;

        let output = formatter.format_response(&response, false);
        assert!(output.starts_with("200 https://magnet.example.com/api/channels (from cache)"));
        assert!(output.ends_with("{\"ok\":true}"));
    }

    #[test]
    fn test_response_headers_only_when_requested() {
        let formatter = TextFormatter::new(false);
        let response = HttpResponse::new(204, "").with_header("ETag", "abc");

        assert!(!formatter.format_response(&response, false).contains("ETag"));
        assert!(formatter.format_response(&response, true).contains("ETag: abc"));
    }

    #[test]
    fn test_deferred_reason() {
        let formatter = TextFormatter::new(false);
        let plain = Call::new(HttpRequest::get("https://x.example.com/api/a"));
        let reliable = plain.clone().with_options(ReliableCallOptions::builder().build());

        assert!(formatter.format_deferred(&plain).contains("app token"));
        assert!(formatter.format_deferred(&reliable).contains("conditions"));
    }

    #[test]
    fn test_pending_list() {
        let formatter = TextFormatter::new(false);
        let output = formatter.format_pending(&pending_entities());

        assert!(output.contains("Pending reliable calls (1)"));
        assert!(output.contains("POST"));
        assert!(output.contains("[wifi]"));
        assert!(output.contains("1 retries"));
        assert!(output.contains("last failure: Connection failed: reset"));
    }

    #[test]
    fn test_pending_empty() {
        let formatter = TextFormatter::new(false);
        assert_eq!(formatter.format_pending(&[]), "No pending reliable calls");
    }
}

mod json_formatter_tests {
    use super::super::json::JsonFormatter;
    use super::*;

    #[test]
    fn test_response_json() {
        let formatter = JsonFormatter::new(false);
        let response = HttpResponse::new(201, "created").with_header("Location", "/api/x/1");

        let json: serde_json::Value =
            serde_json::from_str(&formatter.format_response(&response).unwrap()).unwrap();
        assert_eq!(json["status"], 201);
        assert_eq!(json["fromCache"], false);
        assert_eq!(json["body"], "created");
        assert_eq!(json["headers"][0]["name"], "Location");
    }

    #[test]
    fn test_pending_json() {
        let formatter = JsonFormatter::new(true);
        let output = formatter.format_pending(&pending_entities()).unwrap();
        assert!(output.contains('\n'));

        let json: serde_json::Value = serde_json::from_str(&output).unwrap();
        let row = &json[0];
        assert_eq!(row["method"], "POST");
        assert_eq!(row["retries"], 1);
        assert_eq!(row["wifiOnly"], true);
        assert_eq!(row["handler"], "sync");
        assert!(row["createdAt"].as_str().unwrap().starts_with("2023-11-14T"));
        assert!(row["expiresAt"].is_string());
    }

    #[test]
    fn test_deferred_json() {
        let formatter = JsonFormatter::new(false);
        let call = Call::new(HttpRequest::get("https://x.example.com/api/a"));

        let json: serde_json::Value =
            serde_json::from_str(&formatter.format_deferred(&call).unwrap()).unwrap();
        assert_eq!(json["deferred"], true);
        assert_eq!(json["reliable"], false);
        assert_eq!(json["fingerprint"], call.fingerprint());
    }
}
