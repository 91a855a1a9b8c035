//! Custom Resource Definitions for the catalog operator
//!
//! - [`ServiceInstance`] - a request for one externally provisioned service
//! - [`ServiceClass`] / [`ServicePlan`] - read-only reference data resolved by
//!   name; carry the broker-facing external IDs
//! - [`ServiceBroker`] - the endpoint and credentials of an Open Service Broker

mod broker;
mod class;
mod instance;
mod types;

pub use broker::{ServiceBroker, ServiceBrokerSpec};
pub use class::{ServiceClass, ServiceClassSpec, ServicePlan};
pub use instance::{
    ServiceInstance, ServiceInstanceSpec, ServiceInstanceStatus, FINALIZER_TOKEN,
};
pub use types::{Condition, ConditionStatus};

/// API group shared by all catalog CRDs
pub const API_GROUP: &str = "servicecatalog.dev";

#[cfg(test)]
mod tests {
    use kube::CustomResourceExt;

    use super::*;

    /// The group constant is what CRD installation composes names from, so
    /// every derive must agree with it, as must the finalizer token's domain.
    #[test]
    fn all_resources_share_the_api_group() {
        assert_eq!(ServiceInstance::crd().spec.group, API_GROUP);
        assert_eq!(ServiceClass::crd().spec.group, API_GROUP);
        assert_eq!(ServiceBroker::crd().spec.group, API_GROUP);
        assert!(FINALIZER_TOKEN.starts_with(API_GROUP));
    }
}
