//! Per-call policies.
//!
//! A call carries at most one policy: either [`CacheOptions`] (serve from
//! and refresh the local response cache) or [`ReliableCallOptions`]
//! (persist the call and resend it until it succeeds or expires).

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::models::condition::Condition;
use crate::traits::ConditionContext;

/// Default lifetime of a reliable call: 30 days.
pub const DEFAULT_RELIABLE_EXPIRES_IN_SECS: u64 = 30 * 24 * 60 * 60;

// ============================================================================
// Call Options
// ============================================================================

/// The policy attached to a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOptions {
    /// Response caching.
    Cache(CacheOptions),
    /// Reliable ("fire eventually") delivery.
    Reliable(ReliableCallOptions),
}

impl CallOptions {
    /// Returns true if the request should be routed to the mock endpoint.
    pub fn use_mock(&self) -> bool {
        match self {
            Self::Cache(o) => o.use_mock,
            Self::Reliable(o) => o.use_mock,
        }
    }

    /// Returns the cache policy, if this is one.
    pub fn as_cache(&self) -> Option<&CacheOptions> {
        match self {
            Self::Cache(o) => Some(o),
            Self::Reliable(_) => None,
        }
    }

    /// Returns the reliability policy, if this is one.
    pub fn as_reliable(&self) -> Option<&ReliableCallOptions> {
        match self {
            Self::Reliable(o) => Some(o),
            Self::Cache(_) => None,
        }
    }
}

impl From<CacheOptions> for CallOptions {
    fn from(options: CacheOptions) -> Self {
        Self::Cache(options)
    }
}

impl From<ReliableCallOptions> for CallOptions {
    fn from(options: ReliableCallOptions) -> Self {
        Self::Reliable(options)
    }
}

// ============================================================================
// Cache Options
// ============================================================================

/// Response caching policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheOptions {
    /// Freshness window in seconds; 0 disables fresh hits.
    pub max_cache_age: u64,
    /// Serve the cached response (even stale) whenever the device is offline.
    pub always_use_cache_if_offline: bool,
    /// Per-call response timeout.
    pub response_timeout: Option<Duration>,
    /// Route the call to the mock endpoint.
    pub use_mock: bool,
}

impl CacheOptions {
    /// Creates a builder.
    pub fn builder() -> CacheOptionsBuilder {
        CacheOptionsBuilder::default()
    }

    /// Returns true if a successful response should be written to the cache.
    pub fn should_cache(&self) -> bool {
        self.max_cache_age > 0 || self.always_use_cache_if_offline
    }

    /// Returns the expiry timestamp for an entry written at `now_millis`,
    /// or 0 when the policy grants no freshness window.
    pub fn expires_at(&self, now_millis: i64) -> i64 {
        if self.max_cache_age == 0 {
            return 0;
        }
        let age_millis = i64::try_from(self.max_cache_age.saturating_mul(1000)).unwrap_or(i64::MAX);
        now_millis.saturating_add(age_millis)
    }
}

/// Builder for [`CacheOptions`].
#[derive(Debug, Clone, Default)]
pub struct CacheOptionsBuilder {
    options: CacheOptions,
}

impl CacheOptionsBuilder {
    /// Sets the freshness window in seconds.
    pub fn max_cache_age(mut self, secs: u64) -> Self {
        self.options.max_cache_age = secs;
        self
    }

    /// Enables the offline fallback.
    pub fn always_use_cache_if_offline(mut self, enabled: bool) -> Self {
        self.options.always_use_cache_if_offline = enabled;
        self
    }

    /// Sets the response timeout.
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.options.response_timeout = Some(timeout);
        self
    }

    /// Routes the call to the mock endpoint.
    pub fn use_mock(mut self, enabled: bool) -> Self {
        self.options.use_mock = enabled;
        self
    }

    /// Builds the options.
    pub fn build(self) -> CacheOptions {
        self.options
    }
}

// ============================================================================
// Reliable Call Options
// ============================================================================

/// Reliable delivery policy.
///
/// Serialized into the `options` column of a persisted reliable request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReliableCallOptions {
    /// Lifetime in seconds from `created_at`; 0 means the call never expires.
    pub expires_in: u64,
    /// Preconditions, all of which must hold before sending.
    #[serde(default)]
    pub conditions: BTreeSet<Condition>,
    /// Capture time in epoch milliseconds.
    pub created_at: i64,
    /// Route the call to the mock endpoint.
    #[serde(default)]
    pub use_mock: bool,
    /// Tag of a registered handler that receives the outcome of a replay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
}

impl Default for ReliableCallOptions {
    /// 30-day expiry, no conditions, captured now.
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ReliableCallOptions {
    /// Creates a builder.
    pub fn builder() -> ReliableCallOptionsBuilder {
        ReliableCallOptionsBuilder::default()
    }

    /// Returns the absolute expiry in epoch milliseconds, or 0 if the call
    /// never expires.
    pub fn expires_at(&self) -> i64 {
        if self.expires_in == 0 {
            return 0;
        }
        let millis = i64::try_from(self.expires_in.saturating_mul(1000)).unwrap_or(i64::MAX);
        self.created_at.saturating_add(millis)
    }

    /// Returns true if the call outlived its lifetime at `now_millis`.
    pub fn is_expired_at(&self, now_millis: i64) -> bool {
        self.expires_in > 0 && now_millis > self.expires_at()
    }

    /// Returns true if the call waits for Wi-Fi.
    pub fn requires_wifi(&self) -> bool {
        self.conditions.contains(&Condition::Wifi)
    }

    /// Collects the conditions that do not currently hold.
    ///
    /// With `short_circuit` the scan stops at the first unmet condition, so
    /// the result is a pass/fail signal rather than a full diagnosis.
    pub fn unsatisfied_conditions(
        &self,
        ctx: &dyn ConditionContext,
        short_circuit: bool,
    ) -> BTreeSet<Condition> {
        let mut unmet = BTreeSet::new();
        for condition in &self.conditions {
            if !condition.is_met(ctx) {
                unmet.insert(condition.clone());
                if short_circuit {
                    break;
                }
            }
        }
        unmet
    }

    /// Returns true if every condition holds.
    pub fn evaluate_conditions(&self, ctx: &dyn ConditionContext, short_circuit: bool) -> bool {
        self.unsatisfied_conditions(ctx, short_circuit).is_empty()
    }
}

/// Builder for [`ReliableCallOptions`].
#[derive(Debug, Clone)]
pub struct ReliableCallOptionsBuilder {
    expires_in: u64,
    conditions: BTreeSet<Condition>,
    created_at: Option<i64>,
    use_mock: bool,
    handler: Option<String>,
}

impl Default for ReliableCallOptionsBuilder {
    fn default() -> Self {
        Self {
            expires_in: DEFAULT_RELIABLE_EXPIRES_IN_SECS,
            conditions: BTreeSet::new(),
            created_at: None,
            use_mock: false,
            handler: None,
        }
    }
}

impl ReliableCallOptionsBuilder {
    /// Sets the lifetime in seconds (0 = never expires).
    pub fn expires_in(mut self, secs: u64) -> Self {
        self.expires_in = secs;
        self
    }

    /// Adds a precondition.
    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.insert(condition);
        self
    }

    /// Requires Wi-Fi before sending.
    pub fn wifi_only(self) -> Self {
        self.condition(Condition::Wifi)
    }

    /// Overrides the capture time (epoch milliseconds).
    pub fn created_at(mut self, millis: i64) -> Self {
        self.created_at = Some(millis);
        self
    }

    /// Routes the call to the mock endpoint.
    pub fn use_mock(mut self, enabled: bool) -> Self {
        self.use_mock = enabled;
        self
    }

    /// Names the registered handler that receives replay outcomes.
    pub fn handler(mut self, tag: impl Into<String>) -> Self {
        self.handler = Some(tag.into());
        self
    }

    /// Builds the options, capturing the current time unless overridden.
    pub fn build(self) -> ReliableCallOptions {
        ReliableCallOptions {
            expires_in: self.expires_in,
            conditions: self.conditions,
            created_at: self
                .created_at
                .unwrap_or_else(|| Utc::now().timestamp_millis()),
            use_mock: self.use_mock,
            handler: self.handler,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NetworkClass;

    struct Offline;

    impl ConditionContext for Offline {
        fn network_class(&self) -> NetworkClass {
            NetworkClass::None
        }

        fn named_condition_met(&self, _name: &str) -> bool {
            false
        }
    }

    #[test]
    fn test_default_reliable_options() {
        let options = ReliableCallOptions::default();
        assert_eq!(options.expires_in, DEFAULT_RELIABLE_EXPIRES_IN_SECS);
        assert!(options.conditions.is_empty());
        assert!(!options.use_mock);
    }

    #[test]
    fn test_is_expired() {
        let options = ReliableCallOptions::builder()
            .expires_in(10)
            .created_at(1_000)
            .build();

        assert!(!options.is_expired_at(1_000));
        assert!(!options.is_expired_at(11_000));
        assert!(options.is_expired_at(11_001));
        assert_eq!(options.expires_at(), 11_000);
    }

    #[test]
    fn test_zero_expiry_never_expires() {
        let options = ReliableCallOptions::builder().expires_in(0).created_at(0).build();
        assert!(!options.is_expired_at(i64::MAX / 2));
        assert_eq!(options.expires_at(), 0);
    }

    #[test]
    fn test_unsatisfied_conditions_short_circuit() {
        let options = ReliableCallOptions::builder()
            .wifi_only()
            .condition(Condition::Online)
            .build();

        assert_eq!(options.unsatisfied_conditions(&Offline, true).len(), 1);
        assert_eq!(options.unsatisfied_conditions(&Offline, false).len(), 2);
        assert!(!options.evaluate_conditions(&Offline, true));
    }

    #[test]
    fn test_no_conditions_always_satisfied() {
        assert!(ReliableCallOptions::default().evaluate_conditions(&Offline, true));
    }

    #[test]
    fn test_cache_expiry() {
        let options = CacheOptions::builder().max_cache_age(60).build();
        assert_eq!(options.expires_at(1_000), 61_000);
        assert!(options.should_cache());

        let offline_only = CacheOptions::builder().always_use_cache_if_offline(true).build();
        assert_eq!(offline_only.expires_at(1_000), 0);
        assert!(offline_only.should_cache());

        assert!(!CacheOptions::default().should_cache());
    }

    #[test]
    fn test_use_mock_from_either_variant() {
        let cache: CallOptions = CacheOptions::builder().use_mock(true).build().into();
        let reliable: CallOptions = ReliableCallOptions::builder().use_mock(true).build().into();
        assert!(cache.use_mock());
        assert!(reliable.use_mock());
        assert!(cache.as_cache().is_some());
        assert!(reliable.as_reliable().is_some());
    }
}
