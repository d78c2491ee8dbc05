use regolo_core::store::JsonFile;
use regolo_core::{AuthenticatedRequester, CredentialStore, Credentials, RegoloError};
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn requester_with(
    dir: &TempDir,
    server: &MockServer,
    creds: Credentials,
) -> AuthenticatedRequester {
    let store = CredentialStore::load_with(
        JsonFile::private(dir.path().join("regolo_config.json")),
        &server.uri(),
        reqwest::Client::new(),
    )
    .await
    .expect("store");
    store.save(creds).await.expect("seed credentials");
    AuthenticatedRequester::new(store, Duration::from_secs(5))
}

async fn hits(server: &MockServer, route: &str) -> usize {
    server
        .received_requests()
        .await
        .expect("request recording")
        .iter()
        .filter(|request| request.url.path() == route)
        .count()
}

async fn mount_rotating_gpus(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/inference/gpus"))
        .and(header("authorization", "Bearer old"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "expired"})))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/inference/gpus"))
        .and(header("authorization", "Bearer new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"gpus": ["H100"]})))
        .mount(server)
        .await;
}

#[tokio::test]
async fn expired_token_is_refreshed_and_request_retried_once() {
    let server = MockServer::start().await;
    mount_rotating_gpus(&server).await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(json!({"refresh_token": "r1"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "new", "refresh_token": "r2"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("temp dir");
    let requester =
        requester_with(&dir, &server, Credentials::new("old", Some("r1".into()))).await;

    let body = requester.get("/inference/gpus").await.expect("gpus");
    assert_eq!(body, json!({"gpus": ["H100"]}));
    assert_eq!(hits(&server, "/inference/gpus").await, 2);

    let reloaded = CredentialStore::load_with(
        JsonFile::private(dir.path().join("regolo_config.json")),
        &server.uri(),
        reqwest::Client::new(),
    )
    .await
    .expect("reload");
    assert_eq!(
        reloaded.credentials(),
        Credentials::new("new", Some("r2".into()))
    );
}

#[tokio::test]
async fn failed_refresh_asks_to_login_again_without_retrying() {
    let server = MockServer::start().await;
    mount_rotating_gpus(&server).await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"detail": "revoked"})))
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("temp dir");
    let requester =
        requester_with(&dir, &server, Credentials::new("old", Some("r1".into()))).await;

    let err = requester.get("/inference/gpus").await.unwrap_err();
    assert!(matches!(err, RegoloError::Auth { .. }));
    assert_eq!(
        err.user_message(),
        "Authentication failed. Please login again."
    );
    assert_eq!(hits(&server, "/inference/gpus").await, 1);
    assert_eq!(
        requester.credentials().access_token().as_deref(),
        Some("old")
    );
}

#[tokio::test]
async fn second_unauthorized_after_refresh_is_returned_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "nope"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "new"})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("temp dir");
    let requester =
        requester_with(&dir, &server, Credentials::new("old", Some("r1".into()))).await;

    let err = requester.get("/models").await.unwrap_err();
    assert_eq!(err.status_code(), Some(401));
    assert_eq!(hits(&server, "/models").await, 2);
}

#[tokio::test]
async fn concurrent_rejections_share_one_refresh() {
    let server = MockServer::start().await;
    mount_rotating_gpus(&server).await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "new", "refresh_token": "r2"}))
                .set_delay(Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("temp dir");
    let requester =
        requester_with(&dir, &server, Credentials::new("old", Some("r1".into()))).await;
    let other = requester.clone();

    let (first, second) = tokio::join!(
        requester.get("/inference/gpus"),
        other.get("/inference/gpus")
    );
    assert_eq!(first.expect("first"), json!({"gpus": ["H100"]}));
    assert_eq!(second.expect("second"), json!({"gpus": ["H100"]}));
    assert_eq!(hits(&server, "/auth/refresh").await, 1);
}
