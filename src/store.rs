//! Control-plane store access
//!
//! The store is the only authoritative, shared mutable state: every handler
//! re-reads the object it works on and submits mutations through optimistic
//! concurrency. A write against a stale revision fails with a conflict, which
//! propagates out of the handler and requeues the key - there is no in-place
//! merging.

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::{ServiceBroker, ServiceClass, ServiceInstance};
use crate::{Error, Result};

/// Trait abstracting control-plane store operations
///
/// This trait allows mocking the store in tests while using the real
/// Kubernetes client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Fetch the latest revision of an instance; `None` when it no longer exists
    async fn get_instance(&self, namespace: &str, name: &str) -> Result<Option<ServiceInstance>>;

    /// Replace an instance's status subresource
    ///
    /// The write carries the instance's resourceVersion; a concurrent writer
    /// wins by making this call fail with a conflict.
    async fn update_instance_status(&self, instance: &ServiceInstance) -> Result<ServiceInstance>;

    /// Replace an instance's finalizer list
    async fn replace_instance_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<ServiceInstance>;

    /// Fetch a ServiceClass by name; `None` when it does not exist
    async fn get_service_class(&self, name: &str) -> Result<Option<ServiceClass>>;

    /// Fetch a ServiceBroker by name; `None` when it does not exist
    async fn get_broker(&self, name: &str) -> Result<Option<ServiceBroker>>;
}

/// Real store implementation backed by the Kubernetes API
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Create a store wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn instances(&self, namespace: &str) -> Api<ServiceInstance> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Collapse 404s into `None`; any other API error propagates
fn not_found_to_none<T>(result: kube::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl StoreClient for KubeStore {
    async fn get_instance(&self, namespace: &str, name: &str) -> Result<Option<ServiceInstance>> {
        not_found_to_none(self.instances(namespace).get(name).await)
    }

    async fn update_instance_status(&self, instance: &ServiceInstance) -> Result<ServiceInstance> {
        let namespace = instance
            .namespace()
            .ok_or_else(|| Error::validation("instance has no namespace"))?;
        let name = instance.name_any();
        let data = serde_json::to_vec(instance).map_err(|e| Error::serialization(e.to_string()))?;

        debug!(namespace = %namespace, name = %name, "replacing instance status");
        Ok(self
            .instances(&namespace)
            .replace_status(&name, &PostParams::default(), data)
            .await?)
    }

    async fn replace_instance_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<ServiceInstance> {
        let patch = serde_json::json!({
            "metadata": { "finalizers": finalizers }
        });
        debug!(namespace, name, ?patch, "replacing instance finalizers");
        Ok(self
            .instances(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }

    async fn get_service_class(&self, name: &str) -> Result<Option<ServiceClass>> {
        let api: Api<ServiceClass> = Api::all(self.client.clone());
        not_found_to_none(api.get(name).await)
    }

    async fn get_broker(&self, name: &str) -> Result<Option<ServiceBroker>> {
        let api: Api<ServiceBroker> = Api::all(self.client.clone());
        not_found_to_none(api.get(name).await)
    }
}
