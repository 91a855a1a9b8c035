//! Open Service Broker client capability
//!
//! The controller treats the broker as an opaque capability with three
//! operations. Every response carries the HTTP status code alongside the
//! typed body because the status code is semantic: 2xx means the operation
//! completed synchronously, 202 means the broker accepted it for asynchronous
//! completion, and 410 on a poll during deletion means "already gone", which
//! counts as success.

mod client;

pub use client::{HttpBrokerClient, HttpBrokerClientFactory};

use async_trait::async_trait;
use reqwest::StatusCode;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

use crate::crd::ServiceBroker;
use crate::Result;

/// Platform identifier sent in the OSB context profile
pub const OSB_CONTEXT_PLATFORM: &str = "kubernetes";

/// A typed broker response body plus the HTTP status code it arrived with
#[derive(Clone, Debug, PartialEq)]
pub struct BrokerResponse<T> {
    /// HTTP status code of the broker response
    pub status: StatusCode,
    /// Parsed response body
    pub body: T,
}

impl<T> BrokerResponse<T> {
    /// True when the broker accepted the operation for asynchronous completion
    pub fn is_async(&self) -> bool {
        self.status == StatusCode::ACCEPTED
    }
}

/// Context profile attached to provision requests
///
/// Identifies the originating platform and namespace to brokers that
/// differentiate behavior by caller.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct OsbContext {
    /// Originating platform, always `kubernetes`
    pub platform: String,
    /// Namespace of the instance being provisioned
    pub namespace: String,
}

impl OsbContext {
    /// Build a context profile for the given namespace
    pub fn for_namespace(namespace: impl Into<String>) -> Self {
        Self {
            platform: OSB_CONTEXT_PLATFORM.to_string(),
            namespace: namespace.into(),
        }
    }
}

/// Request body for provisioning a service instance
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct CreateInstanceRequest {
    /// Broker-facing service identifier (from the ServiceClass)
    pub service_id: String,
    /// Broker-facing plan identifier (from the ServicePlan)
    pub plan_id: String,
    /// Opaque provisioning parameters, forwarded verbatim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
    /// Caller organization identity, passed through
    pub organization_guid: String,
    /// Caller space identity, passed through
    pub space_guid: String,
    /// Optional platform context profile
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<OsbContext>,
    /// Whether the caller tolerates an asynchronous response
    ///
    /// Always true for this controller; sent as a query parameter, not in
    /// the body.
    #[serde(skip_serializing)]
    pub accepts_incomplete: bool,
}

/// Response body from a provision call
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct CreateInstanceResponse {
    /// Broker-supplied user-facing dashboard link
    #[serde(default)]
    pub dashboard_url: Option<String>,
    /// Operation token to replay on poll calls, present on 202 responses
    #[serde(default)]
    pub operation: Option<String>,
}

/// Request parameters for deprovisioning a service instance
///
/// Sent entirely as query parameters per the OSB API.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct DeleteInstanceRequest {
    /// Broker-facing service identifier
    pub service_id: String,
    /// Broker-facing plan identifier
    pub plan_id: String,
    /// Whether the caller tolerates an asynchronous response
    pub accepts_incomplete: bool,
}

/// Response body from a deprovision call
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct DeleteInstanceResponse {
    /// Operation token to replay on poll calls, present on 202 responses
    #[serde(default)]
    pub operation: Option<String>,
}

/// Request parameters for polling the last operation
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct LastOperationRequest {
    /// Broker-facing service identifier
    pub service_id: String,
    /// Broker-facing plan identifier
    pub plan_id: String,
    /// Operation token from the accepted create/delete response, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

/// State reported by the broker for an asynchronous operation
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum OperationState {
    /// The operation has not finished yet
    #[serde(rename = "in progress")]
    InProgress,
    /// The operation finished successfully
    #[serde(rename = "succeeded")]
    Succeeded,
    /// The operation failed terminally
    #[serde(rename = "failed")]
    Failed,
    /// Any state string this controller does not recognize
    #[serde(other)]
    Unrecognized,
}

/// Response body from a last-operation poll
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LastOperationResponse {
    /// Reported operation state
    pub state: OperationState,
    /// Human-readable progress description
    #[serde(default)]
    pub description: Option<String>,
}

/// Synchronous request/response interface to an Open Service Broker
///
/// Implementations must bound each request with a timeout; the controller
/// has no cancellation of its own beyond process shutdown.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Provision a service instance
    async fn create_instance(
        &self,
        instance_id: &str,
        request: &CreateInstanceRequest,
    ) -> Result<BrokerResponse<CreateInstanceResponse>>;

    /// Deprovision a service instance
    async fn delete_instance(
        &self,
        instance_id: &str,
        request: &DeleteInstanceRequest,
    ) -> Result<BrokerResponse<DeleteInstanceResponse>>;

    /// Poll the state of the last asynchronous operation
    async fn poll_last_operation(
        &self,
        instance_id: &str,
        request: &LastOperationRequest,
    ) -> Result<BrokerResponse<LastOperationResponse>>;
}

/// Builds broker clients from ServiceBroker resources
///
/// Kept separate from [`BrokerClient`] so the controller can resolve the
/// broker per reconciliation pass without holding per-broker connections.
#[cfg_attr(test, automock)]
pub trait BrokerClientFactory: Send + Sync {
    /// Build (or fetch a cached) client for the given broker
    fn client_for(&self, broker: &ServiceBroker) -> Result<Arc<dyn BrokerClient>>;
}
