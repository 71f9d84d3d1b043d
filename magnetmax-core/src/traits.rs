//! Trait definitions for `MagnetMax`.

use crate::models::NetworkClass;

/// Live device state consulted when evaluating a [`Condition`].
///
/// Implemented by the client's condition evaluator; conditions themselves
/// stay plain data so they can be persisted with a reliable call.
///
/// [`Condition`]: crate::Condition
pub trait ConditionContext {
    /// Returns the current network class.
    fn network_class(&self) -> NetworkClass;

    /// Returns true if the application-registered predicate `name` holds.
    ///
    /// Unknown names are reported as unmet.
    fn named_condition_met(&self, name: &str) -> bool;
}
