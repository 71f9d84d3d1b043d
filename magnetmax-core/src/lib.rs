// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # `MagnetMax` Core
//!
//! Core types for the `MagnetMax` client SDK.
//!
//! This crate provides the I/O-free building blocks shared by the store and
//! client crates:
//!
//! - HTTP request/response values and their persistable snapshots
//! - Per-call policies (cache vs. reliable delivery)
//! - Reliability conditions and network classes
//! - Request fingerprinting
//! - A clock abstraction so expiry logic can be driven deterministically
//!
//! ## Key Types
//!
//! ### Calls
//! - [`HttpRequest`] / [`HttpResponse`] - Transport-neutral HTTP values
//! - [`Call`] - A request plus its [`CallOptions`]
//! - [`CachedRequest`] / [`CachedResponse`] - JSON-persistable snapshots
//!
//! ### Policies
//! - [`CacheOptions`] - Response caching policy
//! - [`ReliableCallOptions`] - "Fire eventually" policy
//! - [`Condition`] - Preconditions gating a reliable call
//!
//! ### Utilities
//! - [`fingerprint()`] - Stable hash identifying "the same logical call"
//! - [`Clock`], [`SystemClock`], [`ManualClock`]

pub mod clock;
pub mod error;
pub mod fingerprint;
pub mod models;
pub mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::CoreError;
pub use fingerprint::fingerprint;

pub use models::{
    // Calls
    CachedRequest,
    CachedResponse,
    Call,
    HttpRequest,
    HttpResponse,
    ResponseSource,
    // Policies
    CacheOptions,
    CacheOptionsBuilder,
    CallOptions,
    Condition,
    NetworkClass,
    ReliableCallOptions,
    ReliableCallOptionsBuilder,
};

pub use traits::ConditionContext;
