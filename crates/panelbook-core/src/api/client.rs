//! Authenticated API client for the scheduling backend.
//!
//! Every request goes through [`ApiClient::request`], which attaches the
//! current access token, refreshes it once on a 401 and replays the request
//! with the new token. Refreshes are single-flight: concurrent 401s share one
//! call to `/auth/refresh`. A rejected refresh ends the session.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Client, Method, Response, StatusCode, Url};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::auth::{
    AuthState, CredentialStore, Identity, RefreshCoordinator, RefreshOutcome, SessionState,
    REFRESH_TOKEN_KEY,
};
use crate::config::Config;
use crate::models::{LoginRequest, LoginResponse, RefreshRequest, RefreshResponse};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

const LOGIN_PATH: &str = "/auth/login";
const REFRESH_PATH: &str = "/auth/refresh";

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

struct ClientInner {
    http: Client,
    base_url: String,
    session: SessionState,
    coordinator: RefreshCoordinator,
    restored: OnceCell<AuthState>,
}

/// API client for the scheduling backend.
/// Clone is cheap - all clones share the session, the refresh coordinator and
/// the connection pool.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

impl ApiClient {
    /// Create a client for the configured backend.
    pub fn new(config: &Config, store: Arc<dyn CredentialStore>) -> Result<Self, ApiError> {
        let base_url = Url::parse(&config.api_base_url)
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", config.api_base_url, e)))?;

        let http = Client::builder().timeout(config.request_timeout()).build()?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                http,
                base_url: base_url.as_str().trim_end_matches('/').to_string(),
                session: SessionState::new(store),
                coordinator: RefreshCoordinator::new(),
                restored: OnceCell::new(),
            }),
        })
    }

    pub fn session(&self) -> &SessionState {
        &self.inner.session
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.inner.base_url, path.trim_start_matches('/'))
    }

    // ===== Session lifecycle =====

    /// Log in with email and password, establishing a new session.
    ///
    /// Returns the decoded identity, `None` if the token carries none.
    pub async fn login(&self, email: &str, password: &str) -> Result<Option<Identity>, ApiError> {
        let response = self
            .inner
            .http
            .post(self.url(LOGIN_PATH))
            .header(header::ACCEPT, "application/json")
            .json(&LoginRequest { email, password })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    ApiError::InvalidCredentials(ApiError::truncate_body(&body))
                }
                _ => ApiError::from_status(status, &body),
            });
        }

        let tokens: LoginResponse = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse login response: {}", e)))?;

        self.session().set_session(&tokens.token, &tokens.refresh_token)?;
        info!("Logged in");
        Ok(self.session().identity())
    }

    /// Re-establish the session from the stored refresh token.
    ///
    /// Runs once per client; later calls return the first outcome without
    /// touching the network. With no stored token no request is made.
    pub async fn restore_session(&self) -> AuthState {
        *self
            .inner
            .restored
            .get_or_init(|| self.restore_from_store())
            .await
    }

    async fn restore_from_store(&self) -> AuthState {
        let session = self.session();
        let refresh_token = match session.store().get(REFRESH_TOKEN_KEY) {
            Ok(Some(token)) => token,
            Ok(None) => {
                debug!("No stored refresh token, starting unauthenticated");
                session.mark_unauthenticated();
                return AuthState::Unauthenticated;
            }
            Err(e) => {
                warn!(error = %e, "Could not read stored refresh token");
                session.mark_unauthenticated();
                return AuthState::Unauthenticated;
            }
        };

        match self.exchange_refresh_token(&refresh_token).await {
            Ok(tokens) => {
                if let Err(e) = session.set_session(&tokens.access_token, &tokens.refresh_token) {
                    warn!(error = %e, "Failed to persist rotated refresh token");
                }
                info!("Session restored");
                AuthState::Authenticated
            }
            Err(e) if e.is_transport() => {
                warn!(error = %e, "Session restore could not reach the server");
                session.mark_unauthenticated();
                AuthState::Unauthenticated
            }
            Err(e) => {
                warn!(error = %e, "Stored refresh token rejected");
                self.hard_logout();
                AuthState::Unauthenticated
            }
        }
    }

    /// Explicit user logout.
    pub fn logout(&self) {
        info!("User logged out");
        self.hard_logout();
    }

    /// Drop the session and the stored refresh token.
    ///
    /// Every path that ends a session goes through here. Idempotent.
    pub fn hard_logout(&self) {
        self.session().hard_logout();
    }

    // ===== Token refresh =====

    /// Obtain a new access token, sharing any refresh already in flight.
    pub async fn ensure_fresh_token(&self) -> RefreshOutcome {
        self.inner.coordinator.run(|| self.refresh_once()).await
    }

    async fn refresh_once(&self) -> RefreshOutcome {
        let session = self.session();
        let refresh_token = match session.store().get(REFRESH_TOKEN_KEY)? {
            Some(token) => token,
            None => {
                warn!("Access token expired and no refresh token is stored");
                self.hard_logout();
                return Err(ApiError::NoRefreshToken);
            }
        };

        match self.exchange_refresh_token(&refresh_token).await {
            Ok(tokens) => {
                if let Err(e) = session.set_session(&tokens.access_token, &tokens.refresh_token) {
                    warn!(error = %e, "Failed to persist rotated refresh token");
                }
                info!("Access token refreshed");
                Ok(tokens.access_token)
            }
            Err(e) if e.is_transport() => {
                warn!(error = %e, "Token refresh could not reach the server");
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh rejected, ending session");
                self.hard_logout();
                Err(e)
            }
        }
    }

    /// The refresh network call. Non-2xx answers become `RefreshFailed`.
    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError> {
        let response = self
            .inner
            .http
            .post(self.url(REFRESH_PATH))
            .header(header::ACCEPT, "application/json")
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::RefreshFailed(format!(
                "Status {}: {}",
                status,
                ApiError::truncate_body(&body)
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ApiError::RefreshFailed(format!("Malformed refresh response: {}", e)))
    }

    // ===== Request pipeline =====

    /// Send an authenticated request.
    ///
    /// A 401 triggers one refresh and one replay with the same method, path
    /// and body. A 401 on the replay is returned as `Unauthorized`. Any other
    /// error status is returned unchanged.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Response, ApiError> {
        let mut token = self.session().access_token();
        let mut retried = false;

        loop {
            let response = self.send(&method, path, body, token.as_deref()).await?;

            if response.status() != StatusCode::UNAUTHORIZED || retried {
                return Self::check_response(response).await;
            }

            retried = true;
            debug!(%method, path, "Request unauthorized, refreshing access token");
            token = Some(self.ensure_fresh_token().await?);
        }
    }

    fn auth_headers(token: Option<&str>) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );
        if let Some(token) = token {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| ApiError::InvalidRequest("access token is not a valid header value".into()))?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// One transport-level exchange, retrying 429 with exponential backoff.
    async fn send(
        &self,
        method: &Method,
        path: &str,
        body: Option<&Value>,
        token: Option<&str>,
    ) -> Result<Response, ApiError> {
        let url = self.url(path);
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let mut builder = self
                .inner
                .http
                .request(method.clone(), &url)
                .headers(Self::auth_headers(token)?);
            if let Some(body) = body {
                builder = builder.json(body);
            }

            let response = builder.send().await?;
            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }

            retries += 1;
            if retries > MAX_RATE_LIMIT_RETRIES {
                return Err(ApiError::RateLimited);
            }
            warn!(url = %url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            backoff_ms *= 2;
        }
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    // ===== JSON helpers =====

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send_json(Method::GET, path, None).await
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to encode body: {}", e)))?;
        self.send_json(Method::POST, path, Some(&body)).await
    }

    pub async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, ApiError> {
        let response = self.request(method, path, body).await?;
        response.json().await.map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", path, e))
        })
    }
}
