//! HTTP broker client integration tests
//!
//! Exercises [`HttpBrokerClient`] against a wiremock broker: request shape
//! (paths, query parameters, headers, auth), status-code mapping for
//! synchronous and asynchronous responses, and the tolerances real brokers
//! need (empty success bodies, descriptive error bodies, 410 on polls).

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::json;
use wiremock::matchers::{basic_auth, body_json_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use catalog_operator::broker::{
    BrokerClient, CreateInstanceRequest, DeleteInstanceRequest, HttpBrokerClient,
    LastOperationRequest, OperationState,
};
use catalog_operator::Error;

const TIMEOUT: Duration = Duration::from_secs(5);

fn client_for(server: &MockServer) -> HttpBrokerClient {
    HttpBrokerClient::new(server.uri(), None, TIMEOUT).expect("client should build")
}

fn create_request() -> CreateInstanceRequest {
    CreateInstanceRequest {
        service_id: "srv-1111".to_string(),
        plan_id: "plan-aaaa".to_string(),
        parameters: Some(json!({"size": "small"})),
        organization_guid: "kubernetes".to_string(),
        space_guid: "kubernetes".to_string(),
        context: None,
        accepts_incomplete: true,
    }
}

fn delete_request() -> DeleteInstanceRequest {
    DeleteInstanceRequest {
        service_id: "srv-1111".to_string(),
        plan_id: "plan-aaaa".to_string(),
        accepts_incomplete: true,
    }
}

fn last_operation_request(operation: Option<&str>) -> LastOperationRequest {
    LastOperationRequest {
        service_id: "srv-1111".to_string(),
        plan_id: "plan-aaaa".to_string(),
        operation: operation.map(str::to_string),
    }
}

#[tokio::test]
async fn provision_sends_osb_request_and_parses_sync_response() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v2/service_instances/inst-ext-1"))
        .and(query_param("accepts_incomplete", "true"))
        .and(header("X-Broker-API-Version", "2.13"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "dashboard_url": "http://dash.invalid/inst-ext-1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = client_for(&server)
        .create_instance("inst-ext-1", &create_request())
        .await
        .expect("provision should succeed");

    assert_eq!(response.status, StatusCode::OK);
    assert!(!response.is_async());
    assert_eq!(
        response.body.dashboard_url.as_deref(),
        Some("http://dash.invalid/inst-ext-1")
    );
    assert!(response.body.operation.is_none());
}

#[tokio::test]
async fn provision_body_excludes_accepts_incomplete() {
    let server = MockServer::start().await;
    // accepts_incomplete travels as a query parameter only; the body carries
    // just the OSB provision fields.
    Mock::given(method("PUT"))
        .and(path("/v2/service_instances/inst-ext-1"))
        .and(body_json_string(
            json!({
                "service_id": "srv-1111",
                "plan_id": "plan-aaaa",
                "parameters": {"size": "small"},
                "organization_guid": "kubernetes",
                "space_guid": "kubernetes"
            })
            .to_string(),
        ))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    client_for(&server)
        .create_instance("inst-ext-1", &create_request())
        .await
        .expect("provision should succeed");
}

#[tokio::test]
async fn accepted_provision_is_async_with_operation_token() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v2/service_instances/inst-ext-1"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "operation": "task-42"
        })))
        .mount(&server)
        .await;

    let response = client_for(&server)
        .create_instance("inst-ext-1", &create_request())
        .await
        .expect("provision should be accepted");

    assert_eq!(response.status, StatusCode::ACCEPTED);
    assert!(response.is_async());
    assert_eq!(response.body.operation.as_deref(), Some("task-42"));
}

#[tokio::test]
async fn basic_auth_credentials_are_forwarded() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v2/service_instances/inst-ext-1"))
        .and(basic_auth("osb-user", "osb-pass"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpBrokerClient::new(
        server.uri(),
        Some(("osb-user".to_string(), "osb-pass".to_string())),
        TIMEOUT,
    )
    .expect("client should build");

    client
        .create_instance("inst-ext-1", &create_request())
        .await
        .expect("authenticated provision should succeed");
}

#[tokio::test]
async fn broker_error_carries_description() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v2/service_instances/inst-ext-1"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error": "ConcurrencyError",
            "description": "another operation is in progress"
        })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .create_instance("inst-ext-1", &create_request())
        .await
        .expect_err("conflict should surface as an error");

    match err {
        Error::Broker { status, message } => {
            assert_eq!(status, 409);
            assert_eq!(message, "another operation is in progress");
        }
        other => panic!("expected broker error, got {other:?}"),
    }
}

#[tokio::test]
async fn deprovision_sends_identifiers_as_query_parameters() {
    let server = MockServer::start().await;
    // Synchronous deprovisions often answer 200 with an empty body.
    Mock::given(method("DELETE"))
        .and(path("/v2/service_instances/inst-ext-1"))
        .and(query_param("service_id", "srv-1111"))
        .and(query_param("plan_id", "plan-aaaa"))
        .and(query_param("accepts_incomplete", "true"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let response = client_for(&server)
        .delete_instance("inst-ext-1", &delete_request())
        .await
        .expect("deprovision should succeed");

    assert_eq!(response.status, StatusCode::OK);
    assert!(!response.is_async());
    assert!(response.body.operation.is_none());
}

#[tokio::test]
async fn last_operation_poll_parses_state_and_forwards_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/service_instances/inst-ext-1/last_operation"))
        .and(query_param("service_id", "srv-1111"))
        .and(query_param("plan_id", "plan-aaaa"))
        .and(query_param("operation", "task-42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "state": "in progress",
            "description": "still working"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = client_for(&server)
        .poll_last_operation("inst-ext-1", &last_operation_request(Some("task-42")))
        .await
        .expect("poll should succeed");

    assert_eq!(response.body.state, OperationState::InProgress);
    assert_eq!(response.body.description.as_deref(), Some("still working"));
}

#[tokio::test]
async fn gone_on_poll_is_a_response_not_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/service_instances/inst-ext-1/last_operation"))
        .respond_with(ResponseTemplate::new(410).set_body_json(json!({})))
        .mount(&server)
        .await;

    let response = client_for(&server)
        .poll_last_operation("inst-ext-1", &last_operation_request(None))
        .await
        .expect("410 polls must not error, deletion treats them as done");

    assert_eq!(response.status, StatusCode::GONE);
}

#[tokio::test]
async fn slow_brokers_hit_the_request_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/service_instances/inst-ext-1/last_operation"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"state": "succeeded"}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let client = HttpBrokerClient::new(server.uri(), None, Duration::from_millis(200))
        .expect("client should build");

    let err = client
        .poll_last_operation("inst-ext-1", &last_operation_request(None))
        .await
        .expect_err("a response slower than the timeout must surface as an error");
    assert!(matches!(err, Error::Transport(_)));
}

#[tokio::test]
async fn unknown_operation_states_parse_as_unrecognized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/service_instances/inst-ext-1/last_operation"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "state": "paused"
        })))
        .mount(&server)
        .await;

    let response = client_for(&server)
        .poll_last_operation("inst-ext-1", &last_operation_request(None))
        .await
        .expect("poll should succeed");

    assert_eq!(response.body.state, OperationState::Unrecognized);
}
