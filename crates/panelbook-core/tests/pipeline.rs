//! Request pipeline behaviour against a mock backend: token attachment,
//! refresh-and-replay, single-flight refresh and failure handling.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use panelbook_core::api::Method;
use panelbook_core::auth::{AuthState, CredentialStore, REFRESH_TOKEN_KEY};
use panelbook_core::{ApiError, MemoryStore};
use serde_json::{json, Value};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{client_for, client_with_timeout, logged_in_client, refresh_calls};

async fn mount_refresh(server: &MockServer, access: &str, refresh: &str, delay_ms: u64) {
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "accessToken": access, "refreshToken": refresh }))
                .set_delay(Duration::from_millis(delay_ms)),
        )
        .mount(server)
        .await;
}

/// `GET /interviews` rejects `Bearer A1` and accepts `Bearer A2`.
async fn mount_token_gated(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/interviews"))
        .and(header("Authorization", "Bearer A1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/interviews"))
        .and(header("Authorization", "Bearer A2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 1 }])))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_attaches_current_access_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/interviews/1"))
        .and(header("Authorization", "Bearer A1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 1, "title": "T" })))
        .expect(1)
        .mount(&server)
        .await;

    let (client, _) = logged_in_client(&server, "A1", "R1");
    let body: Value = client.get_json("/interviews/1").await.unwrap();
    assert_eq!(body["title"], "T");
    assert_eq!(refresh_calls(&server).await, 0);
    server.verify().await;
}

#[tokio::test]
async fn test_unauthenticated_request_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Arc::new(MemoryStore::new()));
    let body: Value = client.get_json("/health").await.unwrap();
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn test_concurrent_401s_share_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(json!({ "refreshToken": "R1" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "accessToken": "A2", "refreshToken": "R2" }))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/interviews"))
        .and(header("Authorization", "Bearer A1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(5)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/interviews"))
        .and(header("Authorization", "Bearer A2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(5)
        .mount(&server)
        .await;

    let (client, store) = logged_in_client(&server, "A1", "R1");

    // Requests fault at t = 0, 10, 20, 30, 40ms while the refresh takes 100ms
    let requests = (0..5u64).map(|i| {
        let client = client.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(i * 10)).await;
            client.get_json::<Value>("/interviews").await
        }
    });
    let results = futures::future::join_all(requests).await;

    for result in results {
        assert_eq!(result.unwrap(), json!([]));
    }
    assert_eq!(refresh_calls(&server).await, 1);
    assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("R2"));
    assert_eq!(client.session().access_token().as_deref(), Some("A2"));
    server.verify().await;
}

#[tokio::test]
async fn test_requests_after_refresh_use_new_token_directly() {
    let server = MockServer::start().await;
    mount_refresh(&server, "A2", "R2", 0).await;
    mount_token_gated(&server).await;

    let (client, _) = logged_in_client(&server, "A1", "R1");
    client.get_json::<Value>("/interviews").await.unwrap();
    client.get_json::<Value>("/interviews").await.unwrap();
    client.get_json::<Value>("/interviews").await.unwrap();

    assert_eq!(refresh_calls(&server).await, 1);
    let requests = server.received_requests().await.unwrap();
    // 401, refresh, replay, then two direct successes
    assert_eq!(requests.len(), 5);
}

#[tokio::test]
async fn test_second_401_is_returned_not_retried() {
    let server = MockServer::start().await;
    mount_refresh(&server, "A2", "R2", 0).await;
    Mock::given(method("GET"))
        .and(path("/interviews"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let (client, store) = logged_in_client(&server, "A1", "R1");
    let result = client.get_json::<Value>("/interviews").await;

    assert!(matches!(result, Err(ApiError::Unauthorized)));
    assert_eq!(refresh_calls(&server).await, 1);
    // The refresh itself succeeded, so the session stays
    assert_eq!(client.session().access_token().as_deref(), Some("A2"));
    assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("R2"));
    server.verify().await;
}

#[tokio::test]
async fn test_replay_keeps_method_and_body() {
    let server = MockServer::start().await;
    mount_refresh(&server, "A2", "R2", 0).await;
    let payload = json!({ "title": "Panel", "participants": [] });

    Mock::given(method("POST"))
        .and(path("/interviews"))
        .and(header("Authorization", "Bearer A1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/interviews"))
        .and(header("Authorization", "Bearer A2"))
        .and(body_json(payload.clone()))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 77 })))
        .expect(1)
        .mount(&server)
        .await;

    let (client, _) = logged_in_client(&server, "A1", "R1");
    let created: Value = client.post_json("/interviews", &payload).await.unwrap();
    assert_eq!(created["id"], 77);
    server.verify().await;
}

#[tokio::test]
async fn test_rejected_refresh_logs_out_every_waiter() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_string("refresh token revoked")
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/interviews"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let (client, store) = logged_in_client(&server, "A1", "R1");
    let mut auth_rx = client.session().subscribe();

    let requests = (0..4u64).map(|i| {
        let client = client.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(i * 10)).await;
            client.request(Method::GET, "/interviews", None).await
        }
    });
    let results = futures::future::join_all(requests).await;

    for result in results {
        let err = result.expect_err("refresh failure must reach every request");
        assert!(matches!(err, ApiError::RefreshFailed(ref msg) if msg.contains("401")));
        assert!(err.is_auth_failure());
    }
    assert_eq!(refresh_calls(&server).await, 1);
    assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap(), None);
    assert!(!client.session().is_authenticated());
    assert_eq!(client.session().identity(), None);
    assert_eq!(*auth_rx.borrow_and_update(), AuthState::Unauthenticated);
    server.verify().await;
}

#[tokio::test]
async fn test_missing_refresh_token_logs_out_without_network() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/interviews"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let (client, store) = logged_in_client(&server, "A1", "R1");
    store.delete(REFRESH_TOKEN_KEY).unwrap();

    let result = client.get_json::<Value>("/interviews").await;
    assert!(matches!(result, Err(ApiError::NoRefreshToken)));
    assert!(!client.session().is_authenticated());
    assert_eq!(client.session().auth_state(), AuthState::Unauthenticated);
    server.verify().await;
}

#[tokio::test]
async fn test_other_error_statuses_surface_unchanged() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/interviews/404"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such interview"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/interviews/500"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/interviews/403"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let (client, store) = logged_in_client(&server, "A1", "R1");

    let not_found = client.get_json::<Value>("/interviews/404").await;
    assert!(matches!(not_found, Err(ApiError::NotFound(ref body)) if body == "no such interview"));

    let server_error = client.get_json::<Value>("/interviews/500").await;
    assert!(matches!(server_error, Err(ApiError::ServerError(_))));

    let denied = client.get_json::<Value>("/interviews/403").await;
    assert!(matches!(denied, Err(ApiError::AccessDenied(_))));

    assert_eq!(refresh_calls(&server).await, 0);
    assert!(client.session().is_authenticated());
    assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("R1"));
}

#[tokio::test]
async fn test_transport_error_never_refreshes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let client = client_with_timeout(&server, store.clone(), 1);
    client.session().set_session("A1", "R1").unwrap();

    let result = client.request(Method::GET, "/slow", None).await;
    let err = result.expect_err("request should time out");
    assert!(err.is_transport());
    assert!(!err.is_auth_failure());

    assert_eq!(refresh_calls(&server).await, 0);
    assert!(client.session().is_authenticated());
    assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("R1"));
}

#[tokio::test]
async fn test_unreachable_refresh_keeps_stored_token() {
    let server = MockServer::start().await;
    mount_refresh(&server, "A2", "R2", 3000).await;
    Mock::given(method("GET"))
        .and(path("/interviews"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let client = client_with_timeout(&server, store.clone(), 1);
    client.session().set_session("A1", "R1").unwrap();

    let err = client
        .get_json::<Value>("/interviews")
        .await
        .expect_err("refresh should time out");
    assert!(err.is_transport());
    assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("R1"));
    assert_eq!(client.session().access_token().as_deref(), Some("A1"));
}

#[tokio::test]
async fn test_rate_limited_request_is_retried_with_backoff() {
    let server = MockServer::start().await;
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    Mock::given(method("GET"))
        .and(path("/interviews"))
        .respond_with(move |_req: &wiremock::Request| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(429)
            } else {
                ResponseTemplate::new(200).set_body_json(json!([{ "id": 3 }]))
            }
        })
        .mount(&server)
        .await;

    let (client, _) = logged_in_client(&server, "A1", "R1");
    let body: Value = client.get_json("/interviews").await.unwrap();
    assert_eq!(body[0]["id"], 3);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(refresh_calls(&server).await, 0);
}
