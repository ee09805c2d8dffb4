//! Bezz REST client with bearer auth, envelope decoding and safe logging.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER, USER_AGENT};
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// User agent string for all API requests.
const CLIENT_USER_AGENT: &str = concat!("bezz-client/", env!("CARGO_PKG_VERSION"));

/// Query parameter keys (case-insensitive) that should have their values redacted.
const SENSITIVE_QUERY_PARAMS: &[&str] = &[
    "token",
    "access_token",
    "id_token",
    "session_id",
    "signature",
    "authorization",
];

// ─────────────────────────────────────────────────────────────────────────────
// LoggingMode
// ─────────────────────────────────────────────────────────────────────────────

/// Controls how URLs are sanitized for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoggingMode {
    /// Log only the path component. Example: `/api/briefs/abc`
    #[default]
    PathOnly,

    /// Log path and query parameters, with sensitive values redacted.
    /// Example: `/api/briefs?limit=20&token=***`
    PathAndQueryRedacted,
}

/// Determines if a query parameter key is sensitive and should be redacted.
fn is_sensitive_param(key: &str) -> bool {
    let key_lower = key.to_ascii_lowercase();
    SENSITIVE_QUERY_PARAMS
        .iter()
        .any(|&sensitive| key_lower == sensitive)
}

/// Sanitizes a URL for safe logging. The result never contains the scheme,
/// host or fragment.
pub fn sanitize_url_for_logs(url: &Url, mode: LoggingMode) -> String {
    let path = url.path();

    match mode {
        LoggingMode::PathOnly => path.to_string(),
        LoggingMode::PathAndQueryRedacted => {
            let query_pairs: Vec<_> = url.query_pairs().collect();
            if query_pairs.is_empty() {
                return path.to_string();
            }

            let redacted_pairs: Vec<String> = query_pairs
                .into_iter()
                .map(|(key, value)| {
                    if is_sensitive_param(&key) {
                        format!("{}=***", key)
                    } else {
                        format!("{}={}", key, value)
                    }
                })
                .collect();

            format!("{}?{}", path, redacted_pairs.join("&"))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SharedToken
// ─────────────────────────────────────────────────────────────────────────────

/// Bearer token slot shared between the session store (writer) and the API
/// client (reader).
#[derive(Clone, Default)]
pub struct SharedToken {
    inner: Arc<RwLock<Option<SecretString>>>,
}

impl std::fmt::Debug for SharedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedToken")
            .field("token", &self.get().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl SharedToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, token: SecretString) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(token);
    }

    pub fn clear(&self) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }

    pub fn get(&self) -> Option<SecretString> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Envelope
// ─────────────────────────────────────────────────────────────────────────────

/// Response envelope used by every endpoint.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Error body of a non-2xx response. `field` is present when the server
/// attributes the rejection to one input.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    field: Option<String>,
}

/// Whether a request carries the session bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Auth {
    Bearer,
    Anonymous,
}

/// Maps a non-success status and its body to a normalized error.
pub(crate) fn error_for_status(
    status: StatusCode,
    retry_after: Option<u64>,
    body: &[u8],
) -> AppError {
    let body: ErrorBody = serde_json::from_slice(body).unwrap_or_default();
    let message = body
        .error
        .or(body.message)
        .unwrap_or_else(|| "Request rejected".to_string());

    match status {
        StatusCode::UNAUTHORIZED => AppError::SessionExpired,
        StatusCode::PAYMENT_REQUIRED => AppError::InsufficientCredits { balance: 0 },
        StatusCode::NOT_FOUND => AppError::NotFound(message),
        StatusCode::TOO_MANY_REQUESTS => AppError::RateLimited {
            retry_after_secs: retry_after,
        },
        s if s.is_server_error() => AppError::ServerError { status: s.as_u16() },
        _ => AppError::Rejected {
            field: body.field,
            message,
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ApiClient
// ─────────────────────────────────────────────────────────────────────────────

/// Thread-safe HTTP client for the Bezz API.
///
/// Cloning is cheap; clones share the connection pool and the token slot.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    token: SharedToken,
    logging_mode: LoggingMode,
}

impl ApiClient {
    /// Creates a client for `config.api_url`, reading the bearer token from
    /// `token` on every authenticated request.
    pub fn new(config: &ClientConfig, token: SharedToken) -> Result<Self, AppError> {
        let base_url = Url::parse(&config.api_url)
            .map_err(|_| AppError::Config(format!("Invalid API URL: {}", config.api_url)))?;
        let http = build_http_client(config.request_timeout())?;
        Ok(Self {
            http,
            base_url,
            token,
            logging_mode: if config.log_query_params {
                LoggingMode::PathAndQueryRedacted
            } else {
                LoggingMode::PathOnly
            },
        })
    }

    /// Updates the logging mode for URL sanitization.
    pub fn with_logging_mode(mut self, mode: LoggingMode) -> Self {
        self.logging_mode = mode;
        self
    }

    pub fn token(&self) -> &SharedToken {
        &self.token
    }

    /// Builds a full URL by joining the path with the base URL.
    pub fn build_url(&self, path: &str) -> Result<Url, AppError> {
        self.base_url
            .join(path)
            .map_err(|_| AppError::Internal(format!("Invalid path: {}", path)))
    }

    /// Sends a request and decodes the envelope's `data`.
    pub async fn send<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        auth: Auth,
    ) -> Result<Envelope<T>, AppError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = match body {
            Some(body) => Some(serde_json::to_vec(body).map_err(|e| {
                AppError::Internal(format!("Failed to encode request body: {}", e))
            })?),
            None => None,
        };

        let response = self.execute(method, path, body, auth).await?;
        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        let bytes = response.bytes().await.map_err(map_transport_error)?;

        if !status.is_success() {
            return Err(error_for_status(status, retry_after, &bytes));
        }

        let envelope: Envelope<T> = serde_json::from_slice(&bytes).map_err(|_| {
            warn!("[API] Unexpected response format (HTTP {})", status.as_u16());
            AppError::Internal("Unexpected response from server".to_string())
        })?;

        if !envelope.success {
            return Err(AppError::Rejected {
                field: None,
                message: envelope
                    .error
                    .clone()
                    .unwrap_or_else(|| "Request rejected".to_string()),
            });
        }

        Ok(envelope)
    }

    /// Sends a request and requires `data` to be present.
    pub async fn send_for_data<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        auth: Auth,
    ) -> Result<T, AppError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(method, path, body, auth)
            .await?
            .data
            .ok_or_else(|| AppError::Internal("Response carried no data".to_string()))
    }

    /// Executes a single request with timing and logging.
    ///
    /// Never logs the Authorization header, request/response bodies or the
    /// host part of the URL. Transport errors are normalized so no raw
    /// reqwest error (which may contain the full URL) escapes.
    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        auth: Auth,
    ) -> Result<reqwest::Response, AppError> {
        let url = self.build_url(path)?;
        let start = Instant::now();
        let sanitized_url = sanitize_url_for_logs(&url, self.logging_mode);

        let mut request = self.http.request(method.clone(), url.as_str());
        if auth == Auth::Bearer {
            let token = self.token.get().ok_or(AppError::NotAuthenticated)?;
            request = request.bearer_auth(token.expose_secret());
        }
        if let Some(body_bytes) = body {
            request = request
                .header("Content-Type", "application/json")
                .body(body_bytes);
        }

        let result = request.send().await;
        let duration_ms = start.elapsed().as_millis();

        match result {
            Ok(response) => {
                info!(
                    "[API] {} {} {} {}ms",
                    method,
                    sanitized_url,
                    response.status().as_u16(),
                    duration_ms
                );
                Ok(response)
            }
            Err(e) => {
                info!("[API] {} {} FAILED {}ms", method, sanitized_url, duration_ms);
                Err(map_transport_error(e))
            }
        }
    }
}

/// Normalizes a reqwest error without exposing its text.
fn map_transport_error(e: reqwest::Error) -> AppError {
    if e.is_timeout() {
        AppError::Timeout
    } else {
        AppError::ConnectionFailed("Connection to the Bezz API failed".to_string())
    }
}

/// Builds the configured HTTP client.
fn build_http_client(timeout: Duration) -> Result<reqwest::Client, AppError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
