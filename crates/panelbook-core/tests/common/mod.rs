#![allow(dead_code)]

use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use panelbook_core::{ApiClient, Config, MemoryStore};
use wiremock::MockServer;

/// Unsigned JWT carrying `claims` as its payload.
pub fn jwt(claims: &str) -> String {
    format!(
        "{}.{}.sig",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#),
        URL_SAFE_NO_PAD.encode(claims)
    )
}

pub fn client_for(server: &MockServer, store: Arc<MemoryStore>) -> ApiClient {
    ApiClient::new(&Config::for_base_url(server.uri()), store).expect("client should build")
}

pub fn client_with_timeout(server: &MockServer, store: Arc<MemoryStore>, secs: u64) -> ApiClient {
    let mut config = Config::for_base_url(server.uri());
    config.request_timeout_secs = secs;
    ApiClient::new(&config, store).expect("client should build")
}

/// Client already holding access token `access` with `refresh` stored.
pub fn logged_in_client(server: &MockServer, access: &str, refresh: &str) -> (ApiClient, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let client = client_for(server, store.clone());
    client
        .session()
        .set_session(access, refresh)
        .expect("session should be set");
    (client, store)
}

pub async fn refresh_calls(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == "/auth/refresh")
        .count()
}
