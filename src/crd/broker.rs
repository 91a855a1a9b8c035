//! ServiceBroker Custom Resource Definition
//!
//! A ServiceBroker names an Open Service Broker endpoint. The broker client
//! factory turns one of these into an HTTP client; the controller never
//! mutates them.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for a ServiceBroker
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "servicecatalog.dev",
    version = "v1alpha1",
    kind = "ServiceBroker",
    plural = "servicebrokers",
    shortname = "sb",
    printcolumn = r#"{"name":"URL","type":"string","jsonPath":".spec.url"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceBrokerSpec {
    /// Base URL of the broker (e.g. `https://broker.example.com`)
    pub url: String,

    /// Basic-auth username for broker requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_username: Option<String>,

    /// Basic-auth password for broker requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_password: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_spec_round_trips_through_yaml() {
        let yaml = r#"
url: https://broker.example.com
authUsername: admin
authPassword: hunter2
"#;
        let spec: ServiceBrokerSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.url, "https://broker.example.com");
        assert_eq!(spec.auth_username.as_deref(), Some("admin"));

        let out = serde_yaml::to_string(&spec).unwrap();
        let parsed: ServiceBrokerSpec = serde_yaml::from_str(&out).unwrap();
        assert_eq!(spec, parsed);
    }
}
