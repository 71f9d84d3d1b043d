//! Live evaluation of reliable-call conditions.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use magnetmax_core::{ConditionContext, NetworkClass};
use tracing::debug;

use crate::connectivity::ConnectivitySource;

type Predicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// Answers [`magnetmax_core::Condition`] checks from connectivity and
/// application-registered predicates.
pub struct ConditionEvaluator {
    connectivity: Arc<dyn ConnectivitySource>,
    predicates: RwLock<HashMap<String, Predicate>>,
}

impl ConditionEvaluator {
    /// Creates an evaluator over a connectivity source.
    pub fn new(connectivity: Arc<dyn ConnectivitySource>) -> Self {
        Self {
            connectivity,
            predicates: RwLock::new(HashMap::new()),
        }
    }

    /// Registers the predicate behind `Condition::Named(name)`.
    ///
    /// Predicates must be side-effect free. They run on whichever task
    /// evaluates the call, never under the request manager's queue lock.
    pub fn register<F>(&self, name: impl Into<String>, predicate: F)
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(name = %name, "Registered condition");
        self.predicates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, Arc::new(predicate));
    }

    /// Removes a named predicate.
    pub fn unregister(&self, name: &str) {
        self.predicates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    /// Returns true if the device is known to be offline.
    pub fn is_offline(&self) -> bool {
        !self.connectivity.current().is_connected()
    }
}

impl ConditionContext for ConditionEvaluator {
    fn network_class(&self) -> NetworkClass {
        self.connectivity.current()
    }

    fn named_condition_met(&self, name: &str) -> bool {
        let predicate = self
            .predicates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned();
        predicate.is_some_and(|p| p())
    }
}

impl std::fmt::Debug for ConditionEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .predicates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("ConditionEvaluator")
            .field("network", &self.connectivity.current())
            .field("predicates", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::ConnectivityMonitor;
    use magnetmax_core::{Condition, ReliableCallOptions};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn evaluator(class: NetworkClass) -> (ConditionEvaluator, Arc<ConnectivityMonitor>) {
        let monitor = Arc::new(ConnectivityMonitor::new(class));
        (ConditionEvaluator::new(monitor.clone()), monitor)
    }

    #[test]
    fn test_wifi_tracks_connectivity() {
        let (eval, monitor) = evaluator(NetworkClass::Mobile);
        assert!(!Condition::Wifi.is_met(&eval));
        assert!(Condition::Online.is_met(&eval));

        monitor.set(NetworkClass::Wifi);
        assert!(Condition::Wifi.is_met(&eval));

        monitor.set(NetworkClass::None);
        assert!(!Condition::Online.is_met(&eval));
        assert!(eval.is_offline());
    }

    #[test]
    fn test_named_predicates() {
        let (eval, _monitor) = evaluator(NetworkClass::Wifi);
        let charging = Arc::new(AtomicBool::new(false));
        let flag = charging.clone();
        eval.register("charging", move || flag.load(Ordering::SeqCst));

        let condition = Condition::Named("charging".into());
        assert!(!condition.is_met(&eval));
        charging.store(true, Ordering::SeqCst);
        assert!(condition.is_met(&eval));

        eval.unregister("charging");
        assert!(!condition.is_met(&eval));
        assert!(!Condition::Named("unknown".into()).is_met(&eval));
    }

    #[test]
    fn test_short_circuit_through_evaluator() {
        let (eval, _monitor) = evaluator(NetworkClass::None);
        let options = ReliableCallOptions::builder()
            .wifi_only()
            .condition(Condition::Online)
            .build();

        assert_eq!(options.unsatisfied_conditions(&eval, true).len(), 1);
        assert_eq!(options.unsatisfied_conditions(&eval, false).len(), 2);
        assert!(!options.evaluate_conditions(&eval, true));
    }
}
