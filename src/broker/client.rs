//! HTTP implementation of the broker client
//!
//! Speaks the Open Service Broker v2 surface this controller needs:
//! `PUT`/`DELETE /v2/service_instances/{id}` and
//! `GET /v2/service_instances/{id}/last_operation`. Every request carries a
//! bounded timeout and `accepts_incomplete=true`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{
    BrokerClient, BrokerClientFactory, BrokerResponse, CreateInstanceRequest,
    CreateInstanceResponse, DeleteInstanceRequest, DeleteInstanceResponse, LastOperationRequest,
    LastOperationResponse, OperationState,
};
use crate::crd::ServiceBroker;
use crate::{Error, Result};

/// Protocol revision sent on every request
const API_VERSION_HEADER: &str = "X-Broker-API-Version";
const API_VERSION: &str = "2.13";

/// Error body shape brokers use for failure responses
#[derive(Debug, Default, Deserialize)]
struct BrokerErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Broker client over HTTP with basic-auth pass-through
pub struct HttpBrokerClient {
    base_url: String,
    auth: Option<(String, String)>,
    client: Client,
}

impl HttpBrokerClient {
    /// Create a client for the given broker endpoint
    pub fn new(
        base_url: impl Into<String>,
        auth: Option<(String, String)>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
            client,
        })
    }

    fn instance_url(&self, instance_id: &str) -> String {
        format!("{}/v2/service_instances/{}", self.base_url, instance_id)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let mut builder = self
            .client
            .request(method, url)
            .header(API_VERSION_HEADER, API_VERSION);
        if let Some((user, pass)) = &self.auth {
            builder = builder.basic_auth(user, Some(pass));
        }
        builder
    }

    /// Map a failure response into a broker error carrying the description
    async fn failure(response: Response) -> Error {
        let status = response.status().as_u16();
        let body: BrokerErrorBody = response.json().await.unwrap_or_default();
        let message = body
            .description
            .or(body.error)
            .unwrap_or_else(|| "no description provided".to_string());
        Error::broker(status, message)
    }

    /// Parse a success response, tolerating the empty bodies some brokers
    /// send on synchronous 200s
    async fn parse<T: for<'de> Deserialize<'de> + Default>(
        response: Response,
    ) -> Result<BrokerResponse<T>> {
        let status = response.status();
        let bytes = response.bytes().await?;
        let body = if bytes.is_empty() {
            T::default()
        } else {
            serde_json::from_slice(&bytes).map_err(|e| Error::serialization(e.to_string()))?
        };
        Ok(BrokerResponse { status, body })
    }
}

#[async_trait]
impl BrokerClient for HttpBrokerClient {
    #[instrument(skip(self, request), fields(instance_id))]
    async fn create_instance(
        &self,
        instance_id: &str,
        request: &CreateInstanceRequest,
    ) -> Result<BrokerResponse<CreateInstanceResponse>> {
        let response = self
            .request(Method::PUT, &self.instance_url(instance_id))
            .query(&[("accepts_incomplete", request.accepts_incomplete)])
            .json(request)
            .send()
            .await?;

        debug!(status = %response.status(), "provision response");
        if response.status().is_client_error() || response.status().is_server_error() {
            return Err(Self::failure(response).await);
        }
        Self::parse(response).await
    }

    #[instrument(skip(self, request), fields(instance_id))]
    async fn delete_instance(
        &self,
        instance_id: &str,
        request: &DeleteInstanceRequest,
    ) -> Result<BrokerResponse<DeleteInstanceResponse>> {
        let response = self
            .request(Method::DELETE, &self.instance_url(instance_id))
            .query(&[
                ("service_id", request.service_id.as_str()),
                ("plan_id", request.plan_id.as_str()),
                (
                    "accepts_incomplete",
                    if request.accepts_incomplete { "true" } else { "false" },
                ),
            ])
            .send()
            .await?;

        debug!(status = %response.status(), "deprovision response");
        if response.status().is_client_error() || response.status().is_server_error() {
            return Err(Self::failure(response).await);
        }
        Self::parse(response).await
    }

    #[instrument(skip(self, request), fields(instance_id))]
    async fn poll_last_operation(
        &self,
        instance_id: &str,
        request: &LastOperationRequest,
    ) -> Result<BrokerResponse<LastOperationResponse>> {
        let url = format!("{}/last_operation", self.instance_url(instance_id));
        let mut query = vec![
            ("service_id", request.service_id.clone()),
            ("plan_id", request.plan_id.clone()),
        ];
        if let Some(op) = &request.operation {
            query.push(("operation", op.clone()));
        }
        let response = self.request(Method::GET, &url).query(&query).send().await?;

        debug!(status = %response.status(), "last-operation response");
        // 410 during deletion means the instance is already gone; the caller
        // decides based on the status code, so it must not become an error
        if response.status() == StatusCode::GONE {
            return Ok(BrokerResponse {
                status: StatusCode::GONE,
                body: LastOperationResponse {
                    state: OperationState::Unrecognized,
                    description: None,
                },
            });
        }
        if response.status().is_client_error() || response.status().is_server_error() {
            return Err(Self::failure(response).await);
        }
        Self::parse_last_operation(response).await
    }
}

impl HttpBrokerClient {
    async fn parse_last_operation(
        response: Response,
    ) -> Result<BrokerResponse<LastOperationResponse>> {
        let status = response.status();
        let body: LastOperationResponse = response
            .json()
            .await
            .map_err(|e| Error::serialization(e.to_string()))?;
        Ok(BrokerResponse { status, body })
    }
}

/// Factory that builds an [`HttpBrokerClient`] from a ServiceBroker resource
pub struct HttpBrokerClientFactory {
    timeout: Duration,
}

impl HttpBrokerClientFactory {
    /// Create a factory with the given per-request timeout
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for HttpBrokerClientFactory {
    fn default() -> Self {
        Self::new(Duration::from_secs(crate::DEFAULT_BROKER_TIMEOUT_SECS))
    }
}

impl BrokerClientFactory for HttpBrokerClientFactory {
    fn client_for(&self, broker: &ServiceBroker) -> Result<Arc<dyn BrokerClient>> {
        let auth = match (&broker.spec.auth_username, &broker.spec.auth_password) {
            (Some(user), Some(pass)) => Some((user.clone(), pass.clone())),
            _ => None,
        };
        Ok(Arc::new(HttpBrokerClient::new(
            broker.spec.url.clone(),
            auth,
            self.timeout,
        )?))
    }
}
