//! Supporting types shared by the catalog CRDs

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
///
/// The catalog operator reports exactly one condition type, `Ready`, on every
/// instance; the reason field is a stable machine-readable string that
/// downstream consumers match on.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., Ready)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned between status values
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_new_timestamps_now() {
        let before = Utc::now();
        let cond = Condition::new("Ready", ConditionStatus::True, "Provisioned", "ok");
        let after = Utc::now();

        assert!(cond.last_transition_time >= before);
        assert!(cond.last_transition_time <= after);
    }

    #[test]
    fn test_condition_serializes_with_kubernetes_field_names() {
        let cond = Condition::new("Ready", ConditionStatus::False, "Provisioning", "working");
        let json = serde_json::to_value(&cond).unwrap();

        assert_eq!(json["type"], "Ready");
        assert_eq!(json["status"], "False");
        assert!(json.get("lastTransitionTime").is_some());
    }

    #[test]
    fn test_condition_status_display() {
        assert_eq!(ConditionStatus::True.to_string(), "True");
        assert_eq!(ConditionStatus::False.to_string(), "False");
        assert_eq!(ConditionStatus::Unknown.to_string(), "Unknown");
    }
}
