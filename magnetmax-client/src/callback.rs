//! Call outcome delivery.
//!
//! Every dispatched call carries an `Arc<dyn CallCallback>`. A reliable call
//! replayed after a restart has lost its original callback; its persisted
//! `handler` tag is resolved against the [`HandlerRegistry`] instead, falling
//! back to [`LoggingCallback`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use magnetmax_core::{Call, HttpResponse};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::CallError;

/// Receives the outcome of a call. Exactly one method is invoked per
/// delivery.
pub trait CallCallback: Send + Sync {
    /// A response arrived (from the network or the cache).
    fn on_response(&self, call: &Call, response: HttpResponse);

    /// The call failed.
    fn on_failure(&self, call: &Call, error: CallError);
}

// ============================================================================
// Logging Callback
// ============================================================================

/// Fallback callback that only logs the outcome.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingCallback;

impl CallCallback for LoggingCallback {
    fn on_response(&self, call: &Call, response: HttpResponse) {
        info!(
            method = %call.request.method,
            url = %call.request.url,
            status = response.status,
            cached = response.is_from_cache(),
            "Replayed call completed"
        );
    }

    fn on_failure(&self, call: &Call, error: CallError) {
        warn!(
            method = %call.request.method,
            url = %call.request.url,
            error = %error,
            "Replayed call failed"
        );
    }
}

// ============================================================================
// Oneshot Callback
// ============================================================================

/// Bridges a callback to a future.
///
/// The first outcome is sent down the channel; later ones are dropped.
pub struct OneshotCallback {
    tx: Mutex<Option<oneshot::Sender<Result<HttpResponse, CallError>>>>,
}

impl OneshotCallback {
    /// Creates the callback and the receiving end of its channel.
    pub fn channel() -> (Self, oneshot::Receiver<Result<HttpResponse, CallError>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    fn complete(&self, result: Result<HttpResponse, CallError>) {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(tx) = tx {
            // The caller may have stopped waiting.
            let _ = tx.send(result);
        }
    }
}

impl CallCallback for OneshotCallback {
    fn on_response(&self, _call: &Call, response: HttpResponse) {
        self.complete(Ok(response));
    }

    fn on_failure(&self, _call: &Call, error: CallError) {
        self.complete(Err(error));
    }
}

// ============================================================================
// Handler Registry
// ============================================================================

/// Statically known callbacks for replayed reliable calls, keyed by tag.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn CallCallback>>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `tag`, replacing any previous one.
    pub fn register(&self, tag: impl Into<String>, handler: Arc<dyn CallCallback>) {
        let tag = tag.into();
        debug!(tag = %tag, "Registered replay handler");
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tag, handler);
    }

    /// Removes the handler for `tag`.
    pub fn unregister(&self, tag: &str) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(tag)
            .is_some()
    }

    /// Returns the handler for `tag`, if registered.
    pub fn get(&self, tag: &str) -> Option<Arc<dyn CallCallback>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tag)
            .cloned()
    }

    /// Returns the handler for `tag`, or a [`LoggingCallback`].
    pub fn resolve(&self, tag: Option<&str>) -> Arc<dyn CallCallback> {
        match tag {
            Some(tag) => self.get(tag).unwrap_or_else(|| {
                warn!(tag, "No replay handler registered, logging outcome only");
                Arc::new(LoggingCallback)
            }),
            None => Arc::new(LoggingCallback),
        }
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tags: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("HandlerRegistry").field("tags", &tags).finish()
    }
}
