use regolo_core::store::JsonFile;
use regolo_core::{
    AuthenticatedRequester, CredentialStore, Credentials, ManagementClient, RegoloError,
};
use serde_json::{json, Value};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn open(dir: &TempDir, server: &MockServer) -> CredentialStore {
    CredentialStore::load_with(
        JsonFile::private(dir.path().join("regolo_config.json")),
        &server.uri(),
        reqwest::Client::new(),
    )
    .await
    .expect("store")
}

#[tokio::test]
async fn login_persists_exactly_the_token_pair() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_json(json!({"username": "ada", "password": "s3cret"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "a1",
            "refresh_token": "r1",
            "token_type": "bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("temp dir");
    let client = ManagementClient::new(AuthenticatedRequester::new(
        open(&dir, &server).await,
        Duration::from_secs(5),
    ));
    client.login("ada", "s3cret").await.expect("login");

    let raw = std::fs::read_to_string(dir.path().join("regolo_config.json")).expect("record");
    let record: Value = serde_json::from_str(&raw).expect("json");
    assert_eq!(record, json!({"access_token": "a1", "refresh_token": "r1"}));

    let reopened = open(&dir, &server).await;
    assert_eq!(
        reopened.credentials(),
        Credentials::new("a1", Some("r1".into()))
    );
}

#[tokio::test]
async fn logout_then_request_fails_without_network() {
    let server = MockServer::start().await;
    let dir = TempDir::new().expect("temp dir");
    let store = open(&dir, &server).await;
    store
        .save(Credentials::new("a1", Some("r1".into())))
        .await
        .expect("seed");
    let client = ManagementClient::new(AuthenticatedRequester::new(store, Duration::from_secs(5)));

    client.logout().await.expect("logout");
    let err = client.ssh_keys().await.unwrap_err();
    assert!(matches!(err, RegoloError::Unauthenticated));
    assert!(server.received_requests().await.expect("recording").is_empty());

    let reopened = open(&dir, &server).await;
    assert!(reopened.credentials().is_empty());
}

#[tokio::test]
async fn record_without_refresh_token_loads() {
    let server = MockServer::start().await;
    let dir = TempDir::new().expect("temp dir");
    std::fs::write(
        dir.path().join("regolo_config.json"),
        r#"{"access_token": "a1"}"#,
    )
    .expect("seed");

    let store = open(&dir, &server).await;
    assert_eq!(store.access_token().as_deref(), Some("a1"));
    assert!(!store.has_refresh_token());
    assert!(store.issued_at().is_none());
}
