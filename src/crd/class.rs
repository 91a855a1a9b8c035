//! ServiceClass Custom Resource Definition
//!
//! ServiceClasses are read-only reference data from the controller's point of
//! view: instances name a class and a plan, and the class carries the
//! broker-facing external IDs used on every broker call.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for a ServiceClass
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "servicecatalog.dev",
    version = "v1alpha1",
    kind = "ServiceClass",
    plural = "serviceclasses",
    shortname = "sc",
    printcolumn = r#"{"name":"Broker","type":"string","jsonPath":".spec.brokerName"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceClassSpec {
    /// Name of the ServiceBroker that offers this class
    pub broker_name: String,

    /// Broker-facing service identifier
    pub external_id: String,

    /// Human-readable description of the offering
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Plans offered under this class
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plans: Vec<ServicePlan>,
}

impl ServiceClassSpec {
    /// Look up a plan by name
    pub fn plan(&self, name: &str) -> Option<&ServicePlan> {
        self.plans.iter().find(|p| p.name == name)
    }
}

/// A plan offered under a ServiceClass
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServicePlan {
    /// Plan name, referenced by ServiceInstance specs
    pub name: String,

    /// Broker-facing plan identifier
    pub external_id: String,

    /// Human-readable description of the plan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_class() -> ServiceClassSpec {
        ServiceClassSpec {
            broker_name: "osb-broker".to_string(),
            external_id: "srv-1111".to_string(),
            description: None,
            plans: vec![
                ServicePlan {
                    name: "small".to_string(),
                    external_id: "plan-aaaa".to_string(),
                    description: None,
                },
                ServicePlan {
                    name: "large".to_string(),
                    external_id: "plan-bbbb".to_string(),
                    description: Some("for production workloads".to_string()),
                },
            ],
        }
    }

    #[test]
    fn test_plan_lookup_by_name() {
        let class = sample_class();
        assert_eq!(class.plan("small").unwrap().external_id, "plan-aaaa");
        assert_eq!(class.plan("large").unwrap().external_id, "plan-bbbb");
        assert!(class.plan("huge").is_none());
    }

    #[test]
    fn test_spec_serializes_with_camel_case_keys() {
        let class = sample_class();
        let json = serde_json::to_value(&class).unwrap();
        assert_eq!(json["brokerName"], "osb-broker");
        assert_eq!(json["externalId"], "srv-1111");
        assert_eq!(json["plans"][0]["externalId"], "plan-aaaa");
    }
}
