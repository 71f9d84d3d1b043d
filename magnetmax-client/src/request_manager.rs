//! Pending-call bookkeeping.
//!
//! Holds the calls that could not be sent yet:
//!
//! - calls waiting for the first application token (FIFO),
//! - reliable calls parked until their conditions hold (by fingerprint),
//!
//! and resends them when a token arrives, connectivity changes, or the
//! client starts. Reliable calls are mirrored in the
//! [`ReliableRequestStore`] so they survive restarts; after a restart the
//! original callback is gone and the call's handler tag is resolved against
//! the [`HandlerRegistry`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use magnetmax_core::{Call, CallOptions, Clock, HttpRequest, NetworkClass, ReliableCallOptions};
use magnetmax_store::{ReliableRequestEntity, ReliableRequestStore};
use tracing::{debug, info, instrument, warn};

use crate::callback::{CallCallback, HandlerRegistry};
use crate::conditions::ConditionEvaluator;
use crate::dispatcher::Dispatcher;
use crate::error::CallError;

/// A call together with the callback waiting for it.
pub struct PendingCall {
    /// The deferred call.
    pub call: Call,
    /// Receives the outcome once the call is sent.
    pub callback: Arc<dyn CallCallback>,
}

impl PendingCall {
    fn reliable_options(&self) -> Option<&ReliableCallOptions> {
        self.call.options.as_ref().and_then(CallOptions::as_reliable)
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("method", &self.call.request.method)
            .field("url", &self.call.request.url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct Queues {
    waiting_for_token: VecDeque<PendingCall>,
    waiting_for_prerequisite: HashMap<String, PendingCall>,
    in_flight: HashSet<String>,
}

/// Queues of deferred calls and the logic that resends them.
#[derive(Debug)]
pub struct RequestManager {
    queues: Mutex<Queues>,
    resend_guard: tokio::sync::Mutex<()>,
    store: ReliableRequestStore,
    conditions: Arc<ConditionEvaluator>,
    handlers: Arc<HandlerRegistry>,
    clock: Arc<dyn Clock>,
}

impl RequestManager {
    /// Creates a manager over the reliable-request store.
    pub fn new(
        store: ReliableRequestStore,
        conditions: Arc<ConditionEvaluator>,
        handlers: Arc<HandlerRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queues: Mutex::new(Queues::default()),
            resend_guard: tokio::sync::Mutex::new(()),
            store,
            conditions,
            handlers,
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Queues> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the reliable-request store.
    pub fn store(&self) -> &ReliableRequestStore {
        &self.store
    }

    /// Returns true if every condition of `options` holds right now.
    pub fn conditions_met(&self, options: &ReliableCallOptions) -> bool {
        options.evaluate_conditions(self.conditions.as_ref(), true)
    }

    /// Returns true if `options` has outlived its expiry.
    pub fn is_expired(&self, options: &ReliableCallOptions) -> bool {
        options.is_expired_at(self.clock.now_millis())
    }

    // ========================================================================
    // Token Wait
    // ========================================================================

    /// Queues a call until an application token is available.
    pub fn save_pending_call(&self, call: Call, callback: Arc<dyn CallCallback>) {
        debug!(url = %call.request.url, "Queued call until app token arrives");
        self.lock()
            .waiting_for_token
            .push_back(PendingCall { call, callback });
    }

    /// Number of calls waiting for a token.
    pub fn pending_call_count(&self) -> usize {
        self.lock().waiting_for_token.len()
    }

    /// Drains the token-wait queue in FIFO order through `dispatcher`.
    ///
    /// Returns the number of calls drained.
    pub fn resend_pending_calls_for_token(&self, dispatcher: &Dispatcher) -> usize {
        let drained = std::mem::take(&mut self.lock().waiting_for_token);
        let count = drained.len();
        if count > 0 {
            info!(count, "Resending calls queued for app token");
        }
        for pending in drained {
            dispatcher.dispatch(pending.call, pending.callback);
        }
        count
    }

    // ========================================================================
    // Reliable Calls
    // ========================================================================

    /// Persists a reliable call, bumping its retry count if already stored.
    ///
    /// With a `callback` the call is also parked in memory so a resend in
    /// this process reaches the original caller. Parking a fingerprint that
    /// is already parked replaces the older entry, whose callback fails with
    /// [`CallError::Superseded`]. Persistence failures are logged and
    /// reported as `None`.
    #[instrument(skip_all, fields(url = %call.request.url))]
    pub fn save_reliable_request(
        &self,
        call: &Call,
        callback: Option<Arc<dyn CallCallback>>,
        failure_reason: Option<&str>,
    ) -> Option<ReliableRequestEntity> {
        let Some(options) = call.options.as_ref().and_then(CallOptions::as_reliable) else {
            warn!("Refusing to persist a call without reliable options");
            return None;
        };

        if let Some(callback) = callback {
            let displaced = self.lock().waiting_for_prerequisite.insert(
                call.fingerprint(),
                PendingCall {
                    call: call.clone(),
                    callback: callback.clone(),
                },
            );
            if let Some(old) = displaced.filter(|old| !same_callback(&old.callback, &callback)) {
                debug!("Parked call superseded by an identical one");
                old.callback.on_failure(&old.call, CallError::Superseded);
            }
        }

        match self.store.save_request(&call.request, options, failure_reason) {
            Ok(entity) => {
                debug!(id = entity.id, retries = entity.retries, "Reliable request saved");
                Some(entity)
            }
            Err(e) => {
                warn!(error = %e, "Failed to persist reliable request");
                None
            }
        }
    }

    /// Forgets a reliable call: drops it from memory and from the store.
    ///
    /// Returns true if anything was removed.
    pub fn remove_reliable_request(&self, request: &HttpRequest) -> bool {
        let hash = request.fingerprint();
        let parked = self
            .lock()
            .waiting_for_prerequisite
            .remove(&hash)
            .is_some();
        let stored = match self.store.remove_by_hash(&hash) {
            Ok(n) => n > 0,
            Err(e) => {
                warn!(error = %e, "Failed to remove reliable request");
                false
            }
        };
        parked || stored
    }

    /// Takes the parked entry for `request_hash` out of memory, if any.
    pub(crate) fn take_parked(&self, request_hash: &str) -> Option<PendingCall> {
        self.lock().waiting_for_prerequisite.remove(request_hash)
    }

    /// Number of reliable calls parked in memory.
    pub fn parked_call_count(&self) -> usize {
        self.lock().waiting_for_prerequisite.len()
    }

    /// Returns true if a resend of `request_hash` is in progress.
    pub fn is_in_flight(&self, request_hash: &str) -> bool {
        self.lock().in_flight.contains(request_hash)
    }

    pub(crate) fn finish(&self, request_hash: &str) {
        self.lock().in_flight.remove(request_hash);
    }

    /// Resends every stored reliable call whose conditions hold.
    ///
    /// Expired rows are pruned by the store read. Returns the number of
    /// calls handed to the dispatcher.
    pub async fn resend_reliable_calls(&self, dispatcher: &Dispatcher) -> usize {
        self.resend_ready(dispatcher).await
    }

    /// Resends parked and stored reliable calls after a connectivity change.
    pub async fn on_connectivity_change(
        &self,
        network: NetworkClass,
        dispatcher: &Dispatcher,
    ) -> usize {
        if !network.is_connected() {
            debug!("Offline, nothing to resend");
            return 0;
        }
        self.resend_ready(dispatcher).await
    }

    /// Drops every reliable call, parked and stored.
    pub fn clear_pending_calls(&self) -> usize {
        self.lock().waiting_for_prerequisite.clear();
        match self.store.clear_pending_calls() {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Failed to clear reliable requests");
                0
            }
        }
    }

    fn is_ready(&self, call: &Call, dispatcher: &Dispatcher) -> bool {
        let Some(options) = call.options.as_ref().and_then(CallOptions::as_reliable) else {
            return false;
        };
        self.conditions_met(options) && !dispatcher.awaiting_token(&call.request)
    }

    async fn resend_ready(&self, dispatcher: &Dispatcher) -> usize {
        let _guard = self.resend_guard.lock().await;

        let stored = match self.store.get_all_cached_request_entities() {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "Failed to read reliable requests");
                Vec::new()
            }
        };
        let now = self.clock.now_millis();

        // Snapshot under the lock; conditions are evaluated without it.
        let (parked_calls, busy) = {
            let mut queues = self.lock();
            queues.waiting_for_prerequisite.retain(|hash, pending| {
                let expired = pending
                    .reliable_options()
                    .is_some_and(|o| o.is_expired_at(now));
                if expired {
                    debug!(request_hash = %hash, "Dropped expired parked call");
                }
                !expired
            });
            let parked_calls: Vec<(String, Call)> = queues
                .waiting_for_prerequisite
                .iter()
                .filter(|(hash, _)| !queues.in_flight.contains(*hash))
                .map(|(hash, pending)| (hash.clone(), pending.call.clone()))
                .collect();
            let busy: HashSet<String> = queues
                .waiting_for_prerequisite
                .keys()
                .chain(queues.in_flight.iter())
                .cloned()
                .collect();
            (parked_calls, busy)
        };

        let ready_parked: Vec<String> = parked_calls
            .into_iter()
            .filter(|(_, call)| self.is_ready(call, dispatcher))
            .map(|(hash, _)| hash)
            .collect();
        let ready_stored: Vec<(String, Call)> = stored
            .into_iter()
            .filter(|entity| !busy.contains(&entity.request_hash))
            .map(|entity| {
                let call = Call::new(entity.request.to_request()).with_options(entity.options);
                (entity.request_hash, call)
            })
            .filter(|(_, call)| self.is_ready(call, dispatcher))
            .collect();

        let mut ready = Vec::new();
        {
            let mut queues = self.lock();
            let Queues {
                waiting_for_prerequisite: parked,
                in_flight,
                ..
            } = &mut *queues;

            // Parked calls keep their original callback.
            for hash in ready_parked {
                if in_flight.contains(&hash) {
                    continue;
                }
                if let Some(pending) = parked.remove(&hash) {
                    in_flight.insert(hash.clone());
                    ready.push((hash, pending.call, pending.callback));
                }
            }

            for (hash, call) in ready_stored {
                if parked.contains_key(&hash) || !in_flight.insert(hash.clone()) {
                    continue;
                }
                let handler = call
                    .options
                    .as_ref()
                    .and_then(CallOptions::as_reliable)
                    .and_then(|o| o.handler.as_deref());
                let callback = self.handlers.resolve(handler);
                ready.push((hash, call, callback));
            }
        }

        let count = ready.len();
        if count > 0 {
            info!(count, "Resending reliable calls");
        }
        for (hash, call, callback) in ready {
            dispatcher.replay(call, callback, hash);
        }
        count
    }
}

pub(crate) fn same_callback(a: &Arc<dyn CallCallback>, b: &Arc<dyn CallCallback>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
