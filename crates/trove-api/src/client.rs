//! Authenticated request executor.
//!
//! [`ApiClient`] is the single path for control-plane calls: it attaches
//! bearer tokens, stamps idempotency keys, and resolves 401s with a
//! *single-flight* token refresh — under a storm of concurrent expired
//! requests exactly one refresh call goes out, every other caller parks on it,
//! and each parked request is retried at most once with the new token.
//!
//! The executor never retries for any other reason; classification and retry
//! policy for non-auth failures live with callers.

use std::sync::Arc;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::contracts::{LogoutRequest, TokenRefreshRequest, TokenRefreshResponse};
use crate::error::{ClientError, Result};
use crate::events::{SessionEvent, SessionEvents};
use crate::token::{TokenPair, TokenStore};

/// Header carrying the client-generated idempotency key.
const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Mints a fresh idempotency key.
///
/// Callers that need replay-safe retries (upload complete, publish) mint the
/// key *once* per logical operation and pass it through [`RequestOptions`] on
/// every resend — a fresh key per HTTP attempt would defeat server-side
/// deduplication.
#[must_use]
pub fn idempotency_key() -> String {
    Uuid::new_v4().to_string()
}

/// Per-request execution options.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Whether a bearer token must be attached. When `true` and no token is
    /// held, the call fails with [`ClientError::Unauthenticated`] before any
    /// network traffic.
    pub requires_auth: bool,
    /// Idempotency key to stamp on the request, for operations that must not
    /// be double-executed.
    pub idempotency_key: Option<String>,
}

impl RequestOptions {
    /// Options for an authenticated call.
    #[must_use]
    pub const fn authed() -> Self {
        Self {
            requires_auth: true,
            idempotency_key: None,
        }
    }

    /// Options for an unauthenticated call.
    #[must_use]
    pub const fn public() -> Self {
        Self {
            requires_auth: false,
            idempotency_key: None,
        }
    }

    /// Options for an authenticated, idempotency-keyed call.
    #[must_use]
    pub fn idempotent(key: impl Into<String>) -> Self {
        Self {
            requires_auth: true,
            idempotency_key: Some(key.into()),
        }
    }
}

/// The control-plane HTTP executor.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    store: Arc<dyn TokenStore>,
    events: SessionEvents,
    /// In-flight refresh, if any. While `Some`, late 401s subscribe instead of
    /// issuing a second refresh call; the payload is the new access token (or
    /// `None` when refresh failed). Every subscriber is resumed exactly once.
    refresh_flight: Mutex<Option<broadcast::Sender<Option<String>>>>,
}

impl ApiClient {
    /// Creates an executor rooted at `base_url` (including the API version
    /// prefix, e.g. `http://host:8000/v1`).
    #[must_use]
    pub fn new(base_url: impl Into<String>, store: Arc<dyn TokenStore>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            http: reqwest::Client::new(),
            base_url,
            store,
            events: SessionEvents::default(),
            refresh_flight: Mutex::new(None),
        }
    }

    /// The session event bus; subscribe to observe session expiry.
    #[must_use]
    pub const fn session_events(&self) -> &SessionEvents {
        &self.events
    }

    /// Issues a `GET` and decodes the JSON response.
    pub async fn get<T: DeserializeOwned>(&self, endpoint: &str, opts: RequestOptions) -> Result<T> {
        self.request(Method::GET, endpoint, None, opts).await
    }

    /// Issues a `POST` with a JSON body and decodes the JSON response.
    pub async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &B,
        opts: RequestOptions,
    ) -> Result<T> {
        let body = serde_json::to_vec(body).map_err(ClientError::Decoding)?;
        self.request(Method::POST, endpoint, Some(body), opts).await
    }

    /// Core request path: attach credentials, send, resolve 401 via refresh,
    /// decode. The body is serialized once up front so the post-refresh retry
    /// replays the byte-identical payload (and the identical idempotency key).
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Vec<u8>>,
        opts: RequestOptions,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, endpoint);

        let token = if opts.requires_auth {
            match self.store.get().await {
                Some(pair) => Some(pair.access_token),
                None => return Err(ClientError::Unauthenticated),
            }
        } else {
            None
        };

        let response = self
            .send_once(
                method.clone(),
                &url,
                body.as_deref(),
                token.as_deref(),
                opts.idempotency_key.as_deref(),
            )
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED && opts.requires_auth {
            debug!(endpoint, "access token rejected, entering refresh flight");
            let Some(fresh) = self.refresh_access_token().await else {
                self.events.send(SessionEvent::Expired);
                return Err(ClientError::Unauthenticated);
            };

            let retry = self
                .send_once(
                    method,
                    &url,
                    body.as_deref(),
                    Some(&fresh),
                    opts.idempotency_key.as_deref(),
                )
                .await?;
            if retry.status() == StatusCode::UNAUTHORIZED {
                // The freshly minted token was rejected too; the session is gone.
                self.events.send(SessionEvent::Expired);
                return Err(ClientError::Unauthenticated);
            }
            return Self::decode(retry).await;
        }

        Self::decode(response).await
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        body: Option<&[u8]>,
        token: Option<&str>,
        idempotency_key: Option<&str>,
    ) -> Result<reqwest::Response> {
        let url =
            reqwest::Url::parse(url).map_err(|_| ClientError::InvalidUrl(url.to_string()))?;
        let mut builder = self
            .http
            .request(method, url)
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(key) = idempotency_key {
            builder = builder.header(IDEMPOTENCY_HEADER, key);
        }
        if let Some(body) = body {
            builder = builder.body(body.to_vec());
        }
        builder.send().await.map_err(ClientError::Network)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Http {
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().await.map_err(ClientError::Network)?;
        serde_json::from_slice(&bytes).map_err(ClientError::Decoding)
    }

    // ========================================================================
    // Token refresh (single-flight)
    // ========================================================================

    /// Returns a fresh access token, coalescing concurrent callers onto one
    /// refresh call. `None` means the refresh itself failed.
    async fn refresh_access_token(&self) -> Option<String> {
        let waiter = {
            let mut flight = self.refresh_flight.lock().await;
            if let Some(tx) = flight.as_ref() {
                Some(tx.subscribe())
            } else {
                // Capacity 1 is enough: exactly one value is ever sent.
                let (tx, _) = broadcast::channel(1);
                *flight = Some(tx);
                None
            }
        };

        if let Some(mut rx) = waiter {
            debug!("joining in-flight token refresh");
            return rx.recv().await.ok().flatten();
        }

        let result = self.perform_refresh().await;

        // Resume every waiter with the shared result, then retire the flight.
        let mut flight = self.refresh_flight.lock().await;
        if let Some(tx) = flight.take() {
            let _ = tx.send(result.clone());
        }
        result
    }

    /// Calls the refresh endpoint. The new pair is written through the token
    /// store *before* this returns, so the result is visible to every waiter
    /// atomically with their resumption.
    async fn perform_refresh(&self) -> Option<String> {
        let refresh_token = self.store.get().await?.refresh_token?;

        let url = format!("{}/auth/token/refresh", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&TokenRefreshRequest {
                refresh_token: refresh_token.clone(),
            })
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            warn!(status = response.status().as_u16(), "token refresh rejected");
            return None;
        }
        let tokens: TokenRefreshResponse = response.json().await.ok()?;

        self.store
            .set(TokenPair {
                access_token: tokens.access_token.clone(),
                // Servers may not rotate the refresh token; keep the old one.
                refresh_token: tokens.refresh_token.or(Some(refresh_token)),
            })
            .await;
        Some(tokens.access_token)
    }

    // ========================================================================
    // Logout
    // ========================================================================

    /// Revokes the refresh token server-side (best effort) and clears the
    /// local store.
    pub async fn logout(&self) {
        if let Some(TokenPair {
            refresh_token: Some(refresh_token),
            ..
        }) = self.store.get().await
        {
            let url = format!("{}/auth/logout", self.base_url);
            if let Err(err) = self
                .http
                .post(&url)
                .json(&LogoutRequest { refresh_token })
                .send()
                .await
            {
                debug!(error = %err, "logout notification failed, clearing locally anyway");
            }
        }
        self.store.clear().await;
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
