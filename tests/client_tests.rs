// API client tests against a mock server
// Author: kelexine (https://github.com/kelexine)

use estate_client::auth::{AuthToken, MemoryTokenStore, TokenStore};
use estate_client::client::{
    multipart, ApiClient, ApiRequest, Navigator, NetworkStatus, SessionRoute,
};
use estate_client::config::{ApiConfig, AuthConfig};
use estate_client::error::ApiError;
use mockito::Matcher;
use serde_json::{json, Value};
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

fn api_config(base_url: String) -> ApiConfig {
    ApiConfig {
        base_url,
        timeout_ms: 2_000,
        ..ApiConfig::default()
    }
}

fn client_for(server: &mockito::Server) -> ApiClient {
    ApiClient::builder(&api_config(format!("{}/api", server.url())))
        .build()
        .unwrap()
}

/// Accepts connections but never answers.
fn silent_listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/api", listener.local_addr().unwrap());
    (listener, url)
}

#[tokio::test]
async fn test_get_decodes_json() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/estates")
        .match_header("content-type", "application/json")
        .match_header("x-request-id", Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"id":"e1","name":"Green Acres"}]"#)
        .create_async()
        .await;

    let client = client_for(&server);
    let estates: Value = tokio_test::assert_ok!(client.get("/estates").await);

    assert_eq!(estates[0]["name"], "Green Acres");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_query_parameters_are_sent() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/plots")
        .match_query(Matcher::UrlEncoded("status".into(), "for sale".into()))
        .with_status(200)
        .with_body("[]")
        .create_async()
        .await;

    let client = client_for(&server);
    let response = client
        .execute(ApiRequest::get("/plots").query("status", "for sale"))
        .await
        .unwrap();

    assert!(response.is_success());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_structured_error_body_is_classified() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/api/estates")
        .with_status(422)
        .with_header("content-type", "application/json")
        .with_body(r#"{"code":"VALIDATION_FAILED","message":"name is required","details":{"field":"name"}}"#)
        .create_async()
        .await;

    let client = client_for(&server);
    let err = client
        .post::<_, Value>("/estates", &json!({"location": "Lagos"}))
        .await
        .unwrap_err();

    assert_eq!(err.status(), 422);
    assert_eq!(err.code(), "VALIDATION_FAILED");
    assert_eq!(err.details().unwrap()["field"], "name");
    assert!(err.to_string().contains("name is required"));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_error_without_body_uses_status_text() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/documents")
        .with_status(502)
        .with_body("upstream unavailable")
        .create_async()
        .await;

    let client = client_for(&server);
    let err = client.get::<Value>("/documents").await.unwrap_err();

    match &err {
        ApiError::Http { status, code, message, details } => {
            assert_eq!(*status, 502);
            assert_eq!(code, "HTTP_502");
            assert_eq!(message, "Bad Gateway");
            assert!(details.is_none());
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_bearer_token_is_attached() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/estates")
        .match_header("authorization", "Bearer session-token")
        .with_status(200)
        .with_body("[]")
        .create_async()
        .await;

    let store = Arc::new(MemoryTokenStore::with_token(AuthToken::new("session-token")));
    let client = ApiClient::builder(&api_config(format!("{}/api", server.url())))
        .with_auth(store, Arc::new(SessionRoute::new("/")), &AuthConfig::default())
        .build()
        .unwrap();

    let _: Value = client.get("/estates").await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_unauthorized_clears_token_and_redirects_once() {
    let mut server = mockito::Server::new_async().await;
    let with_token = server
        .mock("GET", "/api/estates")
        .match_header("authorization", "Bearer expired")
        .with_status(401)
        .with_body(r#"{"code":"UNAUTHORIZED","message":"Token expired"}"#)
        .expect(1)
        .create_async()
        .await;
    let without_token = server
        .mock("GET", "/api/estates")
        .match_header("authorization", Matcher::Missing)
        .with_status(401)
        .expect(1)
        .create_async()
        .await;

    let store = Arc::new(MemoryTokenStore::with_token(AuthToken::new("expired")));
    let route = Arc::new(SessionRoute::new("/estates"));
    let client = ApiClient::builder(&api_config(format!("{}/api", server.url())))
        .with_auth(store.clone(), route.clone(), &AuthConfig::default())
        .build()
        .unwrap();

    let first = client.get::<Value>("/estates").await.unwrap_err();
    assert_eq!(first.status(), 401);
    assert_eq!(first.code(), "UNAUTHORIZED");
    assert!(store.load().unwrap().is_none());
    assert_eq!(route.current_route(), "/login");

    let second = client.get::<Value>("/estates").await.unwrap_err();
    assert_eq!(second.status(), 401);
    assert_eq!(route.navigations(), 1);

    with_token.assert_async().await;
    without_token.assert_async().await;
}

#[tokio::test]
async fn test_offline_fails_without_network_call() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/estates")
        .expect(0)
        .create_async()
        .await;

    let status = NetworkStatus::new(false);
    let client = ApiClient::builder(&api_config(format!("{}/api", server.url())))
        .connectivity(Arc::new(status.clone()))
        .build()
        .unwrap();

    let err = client.get::<Value>("/estates").await.unwrap_err();
    assert!(matches!(err, ApiError::Offline(_)));
    assert_eq!(err.status(), 0);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_upload_sends_multipart_boundary() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/documents/upload")
        .match_header(
            "content-type",
            Matcher::Regex("^multipart/form-data; boundary=".to_string()),
        )
        .match_body(Matcher::Regex("survey-2024.pdf".to_string()))
        .with_status(201)
        .with_body(r#"{"id":"d1","name":"survey-2024.pdf"}"#)
        .create_async()
        .await;

    let client = client_for(&server);
    let part = multipart::Part::bytes(b"%PDF-1.7".to_vec()).file_name("survey-2024.pdf");
    let form = multipart::Form::new().part("file", part);
    let document: Value = client.upload("/documents/upload", form).await.unwrap();

    assert_eq!(document["id"], "d1");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_concurrent_identical_gets_share_one_call() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/estates")
        .with_status(200)
        .with_body(r#"[{"id":"e1"}]"#)
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server);
    let (a, b) = futures::join!(client.get::<Value>("/estates"), client.get::<Value>("/estates"));

    assert_eq!(a.unwrap(), b.unwrap());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_posts_are_never_coalesced() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/estates")
        .with_status(201)
        .with_body(r#"{"id":"e1"}"#)
        .expect(2)
        .create_async()
        .await;

    let client = client_for(&server);
    let body = json!({"name": "Lakeside"});
    let (a, b) = futures::join!(
        client.post::<_, Value>("/estates", &body),
        client.post::<_, Value>("/estates", &body)
    );

    assert!(a.is_ok() && b.is_ok());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_request_times_out() {
    let (_listener, base_url) = silent_listener();
    let client = ApiClient::builder(&api_config(base_url)).build().unwrap();

    let err = client
        .execute(ApiRequest::get("/estates").timeout(Duration::from_millis(100)))
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Timeout { timeout_ms: 100 }));
    assert_eq!(err.code(), "TIMEOUT");
}

#[tokio::test]
async fn test_cancelling_a_scope_leaves_others_running() {
    let (_listener, base_url) = silent_listener();
    let client = ApiClient::builder(&api_config(base_url)).build().unwrap();

    let scope = client.cancellation_token();
    let other = client.cancellation_token();

    let cancelled = tokio::spawn({
        let client = client.clone();
        let scope = scope.clone();
        async move {
            client
                .execute(ApiRequest::get("/estates").cancel_with(scope))
                .await
        }
    });
    let untouched = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .execute(
                    ApiRequest::get("/plots")
                        .cancel_with(other)
                        .timeout(Duration::from_millis(300)),
                )
                .await
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    scope.cancel();

    let err = cancelled.await.unwrap().unwrap_err();
    assert!(matches!(err, ApiError::Cancelled));
    let err = untouched.await.unwrap().unwrap_err();
    assert!(matches!(err, ApiError::Timeout { .. }));
}

#[tokio::test]
async fn test_cancel_all_aborts_every_request() {
    let (_listener, base_url) = silent_listener();
    let client = ApiClient::builder(&api_config(base_url)).build().unwrap();

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.get::<Value>("/estates").await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    client.cancel_all();

    assert!(matches!(pending.await.unwrap(), Err(ApiError::Cancelled)));
    // Later requests are cancelled before dispatch.
    let scoped = ApiRequest::get("/plots").cancel_with(client.cancellation_token());
    assert!(matches!(client.execute(scoped).await, Err(ApiError::Cancelled)));
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base_url = format!("http://{}/api", listener.local_addr().unwrap());
    drop(listener);

    let client = ApiClient::builder(&api_config(base_url)).build().unwrap();
    let err = client.get::<Value>("/estates").await.unwrap_err();

    assert!(matches!(err, ApiError::Network(_)), "got {:?}", err);
    assert_eq!(err.code(), "NETWORK_ERROR");
    assert!(err.is_retryable());
}
