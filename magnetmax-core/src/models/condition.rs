//! Reliability conditions and network classes.

use serde::{Deserialize, Serialize};

use crate::traits::ConditionContext;

// ============================================================================
// Network Class
// ============================================================================

/// Coarse class of the current network connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkClass {
    /// No connectivity.
    None,
    /// Connected over Wi-Fi.
    Wifi,
    /// Connected over a mobile data network.
    Mobile,
    /// Connected, type not known.
    #[default]
    Unknown,
}

impl NetworkClass {
    /// Returns true unless the device is known to be offline.
    pub fn is_connected(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Returns true when connected over Wi-Fi.
    pub fn is_wifi(&self) -> bool {
        matches!(self, Self::Wifi)
    }
}

// ============================================================================
// Condition
// ============================================================================

/// A precondition that must hold before a reliable call may be sent.
///
/// Conditions are plain data so they persist with the call; they are
/// evaluated against a [`ConditionContext`] that exposes live device state.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "name")]
pub enum Condition {
    /// Device is on Wi-Fi.
    Wifi,
    /// Device has any connectivity.
    Online,
    /// Application-defined predicate registered under this name.
    Named(String),
}

impl Condition {
    /// Returns true if the condition currently holds.
    pub fn is_met(&self, ctx: &dyn ConditionContext) -> bool {
        match self {
            Self::Wifi => ctx.network_class().is_wifi(),
            Self::Online => ctx.network_class().is_connected(),
            Self::Named(name) => ctx.named_condition_met(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(NetworkClass);

    impl ConditionContext for Fixed {
        fn network_class(&self) -> NetworkClass {
            self.0
        }

        fn named_condition_met(&self, name: &str) -> bool {
            name == "charging"
        }
    }

    #[test]
    fn test_wifi_condition() {
        assert!(Condition::Wifi.is_met(&Fixed(NetworkClass::Wifi)));
        assert!(!Condition::Wifi.is_met(&Fixed(NetworkClass::Mobile)));
        assert!(!Condition::Wifi.is_met(&Fixed(NetworkClass::None)));
    }

    #[test]
    fn test_online_condition() {
        assert!(Condition::Online.is_met(&Fixed(NetworkClass::Mobile)));
        assert!(Condition::Online.is_met(&Fixed(NetworkClass::Unknown)));
        assert!(!Condition::Online.is_met(&Fixed(NetworkClass::None)));
    }

    #[test]
    fn test_named_condition() {
        let ctx = Fixed(NetworkClass::None);
        assert!(Condition::Named("charging".into()).is_met(&ctx));
        assert!(!Condition::Named("idle".into()).is_met(&ctx));
    }
}
