//! Spec change detection
//!
//! Reconciliation computes a checksum of the instance spec once per pass; if
//! it matches the checksum recorded on status, nothing relevant changed and
//! the pass is a pure no-op. This is the only guard against redundant broker
//! calls on spurious re-deliveries and status-only updates.

use sha2::{Digest, Sha256};

use crate::crd::ServiceInstanceSpec;
use crate::{Error, Result};

/// Compute the checksum of an instance spec
///
/// The digest is over the spec's canonical JSON form. `serde_json` maps are
/// BTreeMap-backed, so parameter key order never affects the result: two specs
/// with identical semantic content produce identical digests.
pub fn instance_spec_checksum(spec: &ServiceInstanceSpec) -> Result<String> {
    let canonical = serde_json::to_vec(spec).map_err(|e| Error::serialization(e.to_string()))?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_spec(parameters: Option<serde_json::Value>) -> ServiceInstanceSpec {
        ServiceInstanceSpec {
            class_name: "postgres".to_string(),
            plan_name: "small".to_string(),
            external_id: "9d2cba44-0f5e-4f19-a743-000001".to_string(),
            parameters,
        }
    }

    /// Story: re-serialized parameters hash identically regardless of key order
    ///
    /// Watch re-deliveries can present the same parameter map with different
    /// key ordering; the checksum must not see that as a change.
    #[test]
    fn story_parameter_key_order_does_not_change_checksum() {
        let a = sample_spec(Some(json!({
            "maxConnections": 100,
            "highAvailability": true,
            "region": "us-west",
        })));
        let b = sample_spec(Some(json!({
            "region": "us-west",
            "highAvailability": true,
            "maxConnections": 100,
        })));

        assert_eq!(
            instance_spec_checksum(&a).unwrap(),
            instance_spec_checksum(&b).unwrap()
        );
    }

    /// Story: nested parameter objects are also order-independent
    #[test]
    fn story_nested_parameters_are_order_independent() {
        let a = sample_spec(Some(json!({"tuning": {"a": 1, "b": 2}})));
        let b = sample_spec(Some(json!({"tuning": {"b": 2, "a": 1}})));

        assert_eq!(
            instance_spec_checksum(&a).unwrap(),
            instance_spec_checksum(&b).unwrap()
        );
    }

    /// Story: a semantic edit produces a different checksum
    #[test]
    fn story_changed_spec_changes_checksum() {
        let small = sample_spec(None);
        let mut large = sample_spec(None);
        large.plan_name = "large".to_string();

        assert_ne!(
            instance_spec_checksum(&small).unwrap(),
            instance_spec_checksum(&large).unwrap()
        );
    }

    #[test]
    fn test_checksum_is_stable_across_calls() {
        let spec = sample_spec(Some(json!({"maxConnections": 100})));
        assert_eq!(
            instance_spec_checksum(&spec).unwrap(),
            instance_spec_checksum(&spec).unwrap()
        );
    }

    #[test]
    fn test_checksum_is_a_hex_sha256_digest() {
        let sum = instance_spec_checksum(&sample_spec(None)).unwrap();
        assert_eq!(sum.len(), 64);
        assert!(sum.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
