//! ServiceInstance Custom Resource Definition
//!
//! A ServiceInstance is a namespaced request for one externally provisioned
//! service (a database, a queue, ...). The spec names a ServiceClass/plan pair
//! and carries an opaque parameter payload forwarded to the broker verbatim.
//! The status is owned exclusively by the catalog controller.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, ConditionStatus};

/// Finalizer token owned by the catalog controller
///
/// Present on every instance from its first reconciliation until the broker
/// confirms the external resource is gone. The controller never touches other
/// controllers' tokens.
pub const FINALIZER_TOKEN: &str = "servicecatalog.dev/catalog-controller";

/// Specification for a ServiceInstance
///
/// Treated as immutable while a broker operation is in flight; edits are
/// picked up on the next reconciliation pass via the spec checksum.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "servicecatalog.dev",
    version = "v1alpha1",
    kind = "ServiceInstance",
    plural = "serviceinstances",
    shortname = "si",
    status = "ServiceInstanceStatus",
    namespaced,
    printcolumn = r#"{"name":"Class","type":"string","jsonPath":".spec.className"}"#,
    printcolumn = r#"{"name":"Plan","type":"string","jsonPath":".spec.planName"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstanceSpec {
    /// Name of the ServiceClass to provision from
    pub class_name: String,

    /// Name of the plan within the referenced class
    pub plan_name: String,

    /// Broker-facing instance identifier, assigned at creation
    ///
    /// Sent to the broker as the service instance ID on every call.
    pub external_id: String,

    /// Opaque provisioning parameters, forwarded to the broker verbatim
    ///
    /// Must be a JSON object when present; anything else is rejected at
    /// provision time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// Status for a ServiceInstance, owned by the catalog controller
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstanceStatus {
    /// Checksum of the last spec this controller reconciled against
    ///
    /// `None` means the instance was never reconciled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,

    /// True exactly while a broker async operation token is outstanding
    #[serde(default)]
    pub async_op_in_progress: bool,

    /// Opaque operation token from the broker, replayed on every poll
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<String>,

    /// Broker-supplied user-facing dashboard link
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard_url: Option<String>,

    /// Conditions representing the instance state, keyed by condition type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl ServiceInstanceStatus {
    /// Look up a condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Upsert a condition, preserving transition-time bookkeeping
    ///
    /// A new condition type, or an existing one whose status value changed,
    /// gets the incoming (fresh) transition time. An unchanged status value
    /// keeps the prior transition time even when reason or message changed.
    ///
    /// Returns true if the status value transitioned.
    pub fn set_condition(&mut self, mut condition: Condition) -> bool {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.type_ == condition.type_)
        {
            Some(existing) => {
                let transitioned = existing.status != condition.status;
                if !transitioned {
                    condition.last_transition_time = existing.last_transition_time;
                }
                *existing = condition;
                transitioned
            }
            None => {
                self.conditions.push(condition);
                true
            }
        }
    }

    /// True when the Ready condition is present with status True
    pub fn is_ready(&self) -> bool {
        self.condition("Ready")
            .map(|c| c.status == ConditionStatus::True)
            .unwrap_or(false)
    }
}

impl ServiceInstance {
    /// Returns true if the catalog controller's finalizer token is present
    pub fn has_finalizer(&self) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .map(|f| f.iter().any(|t| t == FINALIZER_TOKEN))
            .unwrap_or(false)
    }

    /// Returns true if the store has marked this instance for deletion
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Returns true if a broker async operation is outstanding
    pub fn async_op_in_progress(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| s.async_op_in_progress)
            .unwrap_or(false)
    }

    /// The finalizer list with this controller's token removed, others untouched
    ///
    /// Order of the remaining tokens is preserved; this controller must never
    /// reorder or remove tokens owned by cooperating controllers.
    pub fn finalizers_without_token(&self) -> Vec<String> {
        self.metadata
            .finalizers
            .clone()
            .unwrap_or_default()
            .into_iter()
            .filter(|t| t != FINALIZER_TOKEN)
            .collect()
    }
}
