//! Call routing.
//!
//! [`Dispatcher::dispatch`] decides what happens to a call:
//!
//! - an expired reliable call fails with [`CallError::Expired`],
//! - a reliable call with unmet conditions is persisted and parked,
//! - a call that needs an app token nobody has yet waits in the token queue,
//! - everything else is sent on a spawned task.

use std::sync::Arc;

use magnetmax_core::{Call, CallOptions, HttpRequest};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::callback::CallCallback;
use crate::error::CallError;
use crate::interceptor::Interceptor;
use crate::request_manager::{RequestManager, same_callback};

// ============================================================================
// Call Handle
// ============================================================================

#[derive(Debug)]
enum HandleState {
    Sent(JoinHandle<()>),
    Deferred,
    Completed,
}

/// Handle to a dispatched call.
///
/// Dropping the handle does not cancel the call.
#[derive(Debug)]
pub struct CallHandle {
    fingerprint: String,
    state: HandleState,
}

impl CallHandle {
    fn sent(fingerprint: String, task: JoinHandle<()>) -> Self {
        Self {
            fingerprint,
            state: HandleState::Sent(task),
        }
    }

    fn deferred(fingerprint: String) -> Self {
        Self {
            fingerprint,
            state: HandleState::Deferred,
        }
    }

    fn completed(fingerprint: String) -> Self {
        Self {
            fingerprint,
            state: HandleState::Completed,
        }
    }

    /// Fingerprint of the dispatched request.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Returns true if the call was queued instead of sent.
    pub fn is_deferred(&self) -> bool {
        matches!(self.state, HandleState::Deferred)
    }

    /// Returns true once the outcome has been delivered.
    pub fn is_finished(&self) -> bool {
        match &self.state {
            HandleState::Sent(task) => task.is_finished(),
            HandleState::Deferred => false,
            HandleState::Completed => true,
        }
    }

    /// Aborts an in-progress send. The callback is not invoked.
    ///
    /// Deferred calls stay queued; cancel a deferred reliable call with
    /// `MagnetClient::cancel_reliable`.
    pub fn cancel(&self) {
        if let HandleState::Sent(task) = &self.state {
            task.abort();
        }
    }

    /// Waits for a sent call to finish. Returns immediately otherwise.
    pub async fn join(self) {
        if let HandleState::Sent(task) = self.state {
            // A cancelled task is still finished.
            let _ = task.await;
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Routes calls to the network or to a pending queue.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    interceptor: Arc<Interceptor>,
    manager: Arc<RequestManager>,
}

impl Dispatcher {
    /// Creates a dispatcher.
    pub fn new(interceptor: Arc<Interceptor>, manager: Arc<RequestManager>) -> Self {
        Self {
            interceptor,
            manager,
        }
    }

    /// Returns the interceptor calls are sent through.
    pub fn interceptor(&self) -> &Arc<Interceptor> {
        &self.interceptor
    }

    /// Returns the pending-call manager.
    pub fn manager(&self) -> &Arc<RequestManager> {
        &self.manager
    }

    /// Returns true if `request` needs an app token that is not available.
    pub fn awaiting_token(&self, request: &HttpRequest) -> bool {
        let session = self.interceptor.session();
        let path = request.path().unwrap_or_default();
        session.requires_auth(&path) && !session.has_app_token()
    }

    /// Routes `call`; `callback` receives the outcome exactly once, unless
    /// the call is cancelled or dropped by a logout.
    pub fn dispatch(&self, call: Call, callback: Arc<dyn CallCallback>) -> CallHandle {
        let fingerprint = call.fingerprint();

        if let Some(options) = call.options.as_ref().and_then(CallOptions::as_reliable) {
            if self.manager.is_expired(options) {
                debug!(url = %call.request.url, "Reliable call expired before sending");
                callback.on_failure(&call, CallError::Expired);
                return CallHandle::completed(fingerprint);
            }
            if !self.manager.conditions_met(options) {
                info!(url = %call.request.url, "Conditions unmet, deferring reliable call");
                self.manager
                    .save_reliable_request(&call, Some(callback), None);
                return CallHandle::deferred(fingerprint);
            }
        }

        if self.awaiting_token(&call.request) {
            self.manager.save_pending_call(call, callback);
            // A token may have landed between the check and the push.
            if self.interceptor.session().has_app_token() {
                self.resume_token_waiters();
            }
            return CallHandle::deferred(fingerprint);
        }

        self.send(call, callback)
    }

    /// Sends `call` now, skipping routing.
    pub fn send(&self, call: Call, callback: Arc<dyn CallCallback>) -> CallHandle {
        let fingerprint = call.fingerprint();
        let dispatcher = self.clone();
        let task = tokio::spawn(async move {
            dispatcher.run(call, callback).await;
        });
        CallHandle::sent(fingerprint, task)
    }

    /// Drains the token-wait queue if an app token is available.
    ///
    /// Any path that installs a token (an explicit update or a renewal by
    /// the authenticator) ends up here, so queued calls are never stranded.
    /// Returns the number of calls drained.
    pub fn resume_token_waiters(&self) -> usize {
        if !self.interceptor.session().has_app_token() || self.manager.pending_call_count() == 0 {
            return 0;
        }
        self.manager.resend_pending_calls_for_token(self)
    }

    /// Resends a reliable call, marked in flight until the task ends.
    pub(crate) fn replay(
        &self,
        call: Call,
        callback: Arc<dyn CallCallback>,
        request_hash: String,
    ) {
        let guard = InFlight {
            manager: self.manager.clone(),
            request_hash,
        };
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            dispatcher.run(call, callback).await;
        });
    }

    async fn run(&self, call: Call, callback: Arc<dyn CallCallback>) {
        let result = self.interceptor.intercept(&call).await;
        // The send may have renewed the app token.
        self.resume_token_waiters();

        match result {
            Ok(response) => {
                // A delivered reliable call also settles an identical parked one.
                let parked = if call.is_reliable() {
                    self.manager.take_parked(&call.fingerprint())
                } else {
                    None
                };
                if let Some(parked) = parked.filter(|p| !same_callback(&p.callback, &callback)) {
                    debug!(url = %call.request.url, "Delivered call settles parked duplicate");
                    parked.callback.on_response(&parked.call, response.clone());
                }
                callback.on_response(&call, response);
            }
            Err(error) => {
                if call.is_reliable() && error.is_retryable() {
                    let reason = error.to_string();
                    self.manager.save_reliable_request(&call, None, Some(&reason));
                }
                callback.on_failure(&call, error);
            }
        }
    }
}

/// Clears the in-flight mark when the replay task ends, aborted or not.
struct InFlight {
    manager: Arc<RequestManager>,
    request_hash: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.manager.finish(&self.request_hash);
    }
}
