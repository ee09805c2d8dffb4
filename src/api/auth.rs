//! Authentication endpoints: sign-in, sign-up, token refresh, password reset
//! and profile fetch.
//!
//! Never logs passwords or tokens.

use std::future::Future;
use std::pin::Pin;

use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::api::client::{ApiClient, Auth};
use crate::error::AppError;
use crate::session::UserProfile;

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct SignInRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct SignUpRequest<'a> {
    email: &'a str,
    password: &'a str,
    display_name: &'a str,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    token: &'a str,
}

#[derive(Serialize)]
struct ResetPasswordRequest<'a> {
    email: &'a str,
}

#[derive(Deserialize)]
struct WireAuthResponse {
    #[serde(default)]
    token: String,
    user: UserProfile,
}

/// Token and profile returned by the auth endpoints.
///
/// `token` is `None` when the account was created but no token was issued.
#[derive(Debug, Clone)]
pub struct AuthResponse {
    pub token: Option<SecretString>,
    pub user: UserProfile,
}

impl From<WireAuthResponse> for AuthResponse {
    fn from(wire: WireAuthResponse) -> Self {
        let token = if wire.token.trim().is_empty() {
            None
        } else {
            Some(SecretString::from(wire.token))
        };
        Self {
            token,
            user: wire.user,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// AuthOps
// ─────────────────────────────────────────────────────────────────────────────

/// Auth operations used by the session store, allowing test fakes.
pub trait AuthOps: Send + Sync {
    /// Exchanges credentials for a token and profile.
    fn sign_in<'a>(
        &'a self,
        email: &'a str,
        password: &'a SecretString,
    ) -> Pin<Box<dyn Future<Output = Result<AuthResponse, AppError>> + Send + 'a>>;

    /// Creates an account. The response may carry no token.
    fn sign_up<'a>(
        &'a self,
        email: &'a str,
        password: &'a SecretString,
        display_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<AuthResponse, AppError>> + Send + 'a>>;

    /// Exchanges the current token for a fresh one.
    fn refresh<'a>(
        &'a self,
        token: &'a SecretString,
    ) -> Pin<Box<dyn Future<Output = Result<AuthResponse, AppError>> + Send + 'a>>;

    /// Requests a password reset email.
    fn reset_password<'a>(
        &'a self,
        email: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;

    /// Fetches the signed-in user's profile (credits included).
    fn get_profile(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<UserProfile, AppError>> + Send + '_>>;
}

/// Maps errors of the credential endpoints. A 401 there means bad
/// credentials, not an expired session.
fn map_sign_in_error(err: AppError) -> AppError {
    match err {
        AppError::SessionExpired => AppError::InvalidCredentials,
        AppError::Rejected { message, .. } if message.to_ascii_lowercase().contains("disabled") => {
            AppError::AccountDisabled
        }
        other => other,
    }
}

impl ApiClient {
    pub async fn sign_in(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<AuthResponse, AppError> {
        info!("[API] Signing in");
        let body = SignInRequest {
            email,
            password: password.expose_secret(),
        };
        let wire: WireAuthResponse = self
            .send_for_data(Method::POST, "/api/auth/signin", Some(&body), Auth::Anonymous)
            .await
            .map_err(map_sign_in_error)?;
        Ok(wire.into())
    }

    pub async fn sign_up(
        &self,
        email: &str,
        password: &SecretString,
        display_name: &str,
    ) -> Result<AuthResponse, AppError> {
        info!("[API] Creating account");
        let body = SignUpRequest {
            email,
            password: password.expose_secret(),
            display_name,
        };
        let wire: WireAuthResponse = self
            .send_for_data(Method::POST, "/api/auth/signup", Some(&body), Auth::Anonymous)
            .await
            .map_err(map_sign_in_error)?;
        Ok(wire.into())
    }

    /// Refreshes the session token.
    ///
    /// # Errors
    ///
    /// - `AppError::SessionExpired` - The token was refused (400 or 401)
    /// - `AppError::ConnectionFailed` / `AppError::Timeout` - Network error
    pub async fn refresh_token(&self, token: &SecretString) -> Result<AuthResponse, AppError> {
        info!("[API] Refreshing session token...");
        let body = RefreshRequest {
            token: token.expose_secret(),
        };
        let result = self
            .send_for_data::<_, WireAuthResponse>(
                Method::POST,
                "/api/auth/refresh",
                Some(&body),
                Auth::Anonymous,
            )
            .await;

        match result {
            Ok(wire) => {
                info!("[API] Token refresh successful");
                Ok(wire.into())
            }
            Err(AppError::SessionExpired) | Err(AppError::Rejected { .. }) => {
                error!("[API] Token refresh refused");
                Err(AppError::SessionExpired)
            }
            Err(e) => {
                error!("[API] Token refresh failed: {:?}", e.category());
                Err(e)
            }
        }
    }

    pub async fn reset_password(&self, email: &str) -> Result<(), AppError> {
        let body = ResetPasswordRequest { email };
        self.send::<_, serde_json::Value>(
            Method::POST,
            "/api/auth/reset-password",
            Some(&body),
            Auth::Anonymous,
        )
        .await?;
        Ok(())
    }

    pub async fn get_profile(&self) -> Result<UserProfile, AppError> {
        self.send_for_data::<(), _>(Method::GET, "/api/user/profile", None, Auth::Bearer)
            .await
    }
}

impl AuthOps for ApiClient {
    fn sign_in<'a>(
        &'a self,
        email: &'a str,
        password: &'a SecretString,
    ) -> Pin<Box<dyn Future<Output = Result<AuthResponse, AppError>> + Send + 'a>> {
        Box::pin(ApiClient::sign_in(self, email, password))
    }

    fn sign_up<'a>(
        &'a self,
        email: &'a str,
        password: &'a SecretString,
        display_name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<AuthResponse, AppError>> + Send + 'a>> {
        Box::pin(ApiClient::sign_up(self, email, password, display_name))
    }

    fn refresh<'a>(
        &'a self,
        token: &'a SecretString,
    ) -> Pin<Box<dyn Future<Output = Result<AuthResponse, AppError>> + Send + 'a>> {
        Box::pin(ApiClient::refresh_token(self, token))
    }

    fn reset_password<'a>(
        &'a self,
        email: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(ApiClient::reset_password(self, email))
    }

    fn get_profile(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<UserProfile, AppError>> + Send + '_>> {
        Box::pin(ApiClient::get_profile(self))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod wiremock_tests {
    use super::*;
    use crate::api::client::tests::test_client;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn user_json() -> serde_json::Value {
        serde_json::json!({
            "id": "uid-1",
            "email": "ada@example.com",
            "displayName": "Ada",
            "credits": 3,
            "createdAt": "2024-05-01T10:00:00Z"
        })
    }

    fn password() -> SecretString {
        SecretString::from("hunter22".to_string())
    }

    #[tokio::test]
    async fn sign_in_success_returns_token_and_profile() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/auth/signin"))
            .and(body_json(serde_json::json!({
                "email": "ada@example.com",
                "password": "hunter22"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "data": { "token": "id-token-1", "user": user_json() }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server.uri(), None);
        let response = client.sign_in("ada@example.com", &password()).await.unwrap();

        assert_eq!(response.token.unwrap().expose_secret(), "id-token-1");
        assert_eq!(response.user.credits, 3);
        assert_eq!(response.user.display_name.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn sign_in_unauthorized_is_invalid_credentials() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/auth/signin"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "success": false,
                "error": "Invalid email or password"
            })))
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server.uri(), None);
        let err = client
            .sign_in("ada@example.com", &password())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::InvalidCredentials));
        assert!(!err.is_session_invalid());
    }

    #[tokio::test]
    async fn sign_in_disabled_account() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/auth/signin"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "success": false,
                "error": "USER_DISABLED: account disabled"
            })))
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server.uri(), None);
        let err = client
            .sign_in("ada@example.com", &password())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::AccountDisabled));
    }

    #[tokio::test]
    async fn sign_in_rate_limited_reads_retry_after() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/auth/signin"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server.uri(), None);
        let err = client
            .sign_in("ada@example.com", &password())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::RateLimited {
                retry_after_secs: Some(30)
            }
        ));
    }

    #[tokio::test]
    async fn sign_up_without_token_is_pending() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/auth/signup"))
            .and(body_json(serde_json::json!({
                "email": "ada@example.com",
                "password": "hunter22",
                "display_name": "Ada"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "success": true,
                "message": "Account created successfully. Please sign in.",
                "data": { "token": "", "user": user_json() }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server.uri(), None);
        let response = client
            .sign_up("ada@example.com", &password(), "Ada")
            .await
            .unwrap();

        assert!(response.token.is_none());
        assert_eq!(response.user.id, "uid-1");
    }

    #[tokio::test]
    async fn refresh_sends_current_token() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .and(body_json(serde_json::json!({ "token": "old-token" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "data": { "token": "new-token", "user": user_json() }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server.uri(), None);
        let response = client
            .refresh_token(&SecretString::from("old-token".to_string()))
            .await
            .unwrap();

        assert_eq!(response.token.unwrap().expose_secret(), "new-token");
    }

    #[tokio::test]
    async fn refresh_refused_returns_session_expired() {
        for status in [400u16, 401] {
            let mock_server = MockServer::start().await;

            Mock::given(method("POST"))
                .and(path("/api/auth/refresh"))
                .respond_with(ResponseTemplate::new(status).set_body_json(serde_json::json!({
                    "success": false,
                    "error": "Invalid token"
                })))
                .expect(1)
                .mount(&mock_server)
                .await;

            let client = test_client(&mock_server.uri(), None);
            let result = client
                .refresh_token(&SecretString::from("expired".to_string()))
                .await;

            assert!(
                matches!(result, Err(AppError::SessionExpired)),
                "status {}",
                status
            );
        }
    }

    #[tokio::test]
    async fn refresh_server_error_stays_transient() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/auth/refresh"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server.uri(), None);
        let result = client
            .refresh_token(&SecretString::from("t".to_string()))
            .await;

        assert!(matches!(result, Err(AppError::ServerError { status: 500 })));
    }

    #[tokio::test]
    async fn reset_password_posts_email() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/auth/reset-password"))
            .and(body_json(serde_json::json!({ "email": "ada@example.com" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "message": "Password reset email sent successfully"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server.uri(), None);
        client.reset_password("ada@example.com").await.unwrap();
    }

    #[tokio::test]
    async fn get_profile_uses_bearer_token() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/user/profile"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "data": user_json()
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server.uri(), Some("tok"));
        let profile = client.get_profile().await.unwrap();

        assert_eq!(profile.email, "ada@example.com");
    }
}
