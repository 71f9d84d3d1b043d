//! Text output formatting with colors.

use std::path::Path;

use chrono::{DateTime, Local, Utc};
use magnetmax_core::{Call, HttpResponse};
use magnetmax_store::{MagnetConfig, ReliableRequestEntity};

// ============================================================================
// ANSI Colors
// ============================================================================

const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const CYAN: &str = "\x1b[36m";

/// Text formatter with optional colors.
pub struct TextFormatter {
    use_colors: bool,
}

impl TextFormatter {
    /// Creates a new text formatter.
    pub fn new(use_colors: bool) -> Self {
        Self { use_colors }
    }

    /// Formats a completed call: status line, optional headers, body.
    pub fn format_response(&self, response: &HttpResponse, show_headers: bool) -> String {
        let mut lines = Vec::new();

        let mut status = format!("{} {}", self.status(response.status), response.url);
        if response.is_from_cache() {
            status.push(' ');
            status.push_str(&self.dim("(from cache)"));
        }
        lines.push(status);

        if show_headers {
            for (name, value) in &response.headers {
                lines.push(format!("{}: {value}", self.cyan(name)));
            }
        }

        let body = response.text();
        if !body.is_empty() {
            lines.push(String::new());
            lines.push(body.into_owned());
        }

        lines.join("\n")
    }

    /// Formats a call that was queued instead of sent.
    pub fn format_deferred(&self, call: &Call) -> String {
        let reason = if call.is_reliable() {
            "persisted, will be sent once its conditions hold"
        } else {
            "queued until an app token is available"
        };
        format!(
            "{} {} {}\n{}",
            self.yellow("Deferred"),
            call.request.method,
            call.request.url,
            self.dim(reason)
        )
    }

    /// Formats the reliable-call queue.
    pub fn format_pending(&self, entities: &[ReliableRequestEntity]) -> String {
        if entities.is_empty() {
            return self.dim("No pending reliable calls");
        }

        let mut lines = Vec::new();
        lines.push(self.bold(&format!("Pending reliable calls ({})", entities.len())));
        lines.push("─".repeat(50));

        for entity in entities {
            let mut line = format!(
                "#{:<4} {:<6} {}",
                entity.id, entity.http_method, entity.url
            );
            if entity.wifi_preq {
                line.push(' ');
                line.push_str(&self.cyan("[wifi]"));
            }
            lines.push(line);

            let retries = if entity.retries > 0 {
                self.yellow(&format!("{} retries", entity.retries))
            } else {
                "no retries".to_string()
            };
            let expires = if entity.expired_at > 0 {
                format!("expires {}", format_timestamp(entity.expired_at))
            } else {
                "never expires".to_string()
            };
            lines.push(format!("      {retries}, {}", self.dim(&expires)));

            if let Some(reason) = &entity.last_failure_reason {
                lines.push(format!("      {} {reason}", self.red("last failure:")));
            }
        }

        lines.join("\n")
    }

    /// Formats the configuration.
    pub fn format_config(&self, config: &MagnetConfig, path: &Path) -> String {
        let client_id = if config.client_id.is_empty() {
            self.red("(not set)")
        } else {
            config.client_id.clone()
        };

        let lines = [
            self.bold("MagnetMax Configuration"),
            "─".repeat(40),
            format!("File:               {}", path.display()),
            String::new(),
            format!("Base URL:           {}", config.base_url),
            format!("Client id:          {client_id}"),
            format!("Auth enabled:       {}", config.auth_enabled),
            format!("REST base path:     {}", config.rest_base_path),
            format!("Mock base path:     {}", config.mock_base_path),
            format!("Request timeout:    {}s", config.request_timeout_secs),
            format!("Token refresh wait: {}s", config.token_refresh_timeout_secs),
            format!("Database:           {}", config.database_path().display()),
            format!("Log level:          {}", config.log_level),
        ];
        lines.join("\n")
    }

    // ========================================================================
    // Color/style helpers
    // ========================================================================

    fn status(&self, status: u16) -> String {
        let text = status.to_string();
        match status {
            200..=299 => self.green(&text),
            400..=499 => self.yellow(&text),
            500..=599 => self.red(&text),
            _ => text,
        }
    }

    fn paint(&self, color: &str, text: &str) -> String {
        if self.use_colors {
            format!("{color}{text}{RESET}")
        } else {
            text.to_string()
        }
    }

    fn bold(&self, text: &str) -> String {
        self.paint(BOLD, text)
    }

    fn dim(&self, text: &str) -> String {
        self.paint(DIM, text)
    }

    fn green(&self, text: &str) -> String {
        self.paint(GREEN, text)
    }

    fn yellow(&self, text: &str) -> String {
        self.paint(YELLOW, text)
    }

    fn red(&self, text: &str) -> String {
        self.paint(RED, text)
    }

    fn cyan(&self, text: &str) -> String {
        self.paint(CYAN, text)
    }
}

/// Formats epoch milliseconds in local time.
fn format_timestamp(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis).map_or_else(
        || millis.to_string(),
        |dt| dt.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string(),
    )
}

// ============================================================================
// Tests
// ============================================================================
