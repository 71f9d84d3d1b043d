//! Domain models for `MagnetMax`.
//!
//! ## Submodules
//!
//! - [`http`] - Request/response values and the [`Call`] envelope
//! - [`cached`] - Persistable request/response snapshots
//! - [`condition`] - Reliability preconditions and network classes
//! - [`options`] - Per-call cache and reliability policies

mod cached;
mod condition;
mod http;
mod options;

pub use cached::{CachedRequest, CachedResponse};
pub use condition::{Condition, NetworkClass};
pub use http::{Call, HttpRequest, HttpResponse, ResponseSource};
pub use options::{
    CacheOptions, CacheOptionsBuilder, CallOptions, ReliableCallOptions,
    ReliableCallOptionsBuilder,
};
