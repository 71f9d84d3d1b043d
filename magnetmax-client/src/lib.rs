// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # `MagnetMax` Client
//!
//! The call pipeline of the `MagnetMax` SDK: response caching, auth token
//! handling and "fire eventually" delivery of reliable calls.
//!
//! ## Pipeline
//!
//! - [`MagnetClient`] - Facade; builds everything below from a config
//! - [`Dispatcher`] - Routes a call: send now, wait for a token, or park
//! - [`Interceptor`] - Cache lookup, token attachment, mock rewrite, caching
//! - [`Authenticator`] - 401 recovery with one bounded token renewal
//! - [`RequestManager`] - Token-wait queue and reliable-call resends
//!
//! ## Host Seams
//!
//! - [`Transport`] - [`HttpTransport`] over reqwest, [`ScriptedTransport`]
//!   for tests and demos
//! - [`ConnectivitySource`] - [`ConnectivityMonitor`] fed by the host
//! - [`AuthApi`] - [`RestAuthApi`] against the `MagnetMax` server
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use magnetmax_client::{MagnetClient, LoggingCallback};
//! use magnetmax_core::{Call, HttpRequest, ReliableCallOptions};
//!
//! let client = MagnetClient::builder().config(config).build()?;
//! client.start().await;
//! client.authenticate_app().await?;
//!
//! let call = Call::new(HttpRequest::post(url).with_body(payload))
//!     .with_options(ReliableCallOptions::builder().wifi_only().build());
//! client.enqueue(call, Arc::new(LoggingCallback));
//! ```

pub mod auth;
pub mod authenticator;
pub mod callback;
pub mod client;
pub mod conditions;
pub mod connectivity;
pub mod dispatcher;
pub mod error;
pub mod interceptor;
pub mod request_manager;
pub mod session;
pub mod transport;

// Errors
pub use error::{AuthError, CallError, ClientError, TransportError};

// Host seams
pub use auth::{AuthApi, RestAuthApi, TokenGrant};
pub use connectivity::{ConnectivityMonitor, ConnectivitySource};
pub use transport::{HttpTransport, ScriptedTransport, Transport};

// Pipeline
pub use authenticator::{AuthFailure, Authenticator};
pub use callback::{CallCallback, HandlerRegistry, LoggingCallback, OneshotCallback};
pub use client::{MagnetClient, MagnetClientBuilder};
pub use conditions::ConditionEvaluator;
pub use dispatcher::{CallHandle, Dispatcher};
pub use interceptor::Interceptor;
pub use request_manager::{PendingCall, RequestManager};
pub use session::{Session, SessionEvent};
