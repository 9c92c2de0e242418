// Session/token manager.
//
// Single owner of the persisted token pair. Every authenticated call goes
// through `authorized_request`, which retries once after a 401 using a
// refreshed access token. Refreshes, logins and logouts are serialized by
// one async lock so concurrent callers never race each other on the store.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::db::TokenStore;
use crate::error::{AuthError, ClientError, FieldError, ValidationErrors};
use crate::http::{ApiRequest, ApiResponse, HttpTransport, Method};
use crate::protocol::{
    LoginRequest, PasswordResetRequest, RefreshRequest, RefreshResponse, Registration, TokenPair,
    CODE_BAD_EMAIL, CODE_BAD_PASSWORD,
};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

pub const LOGIN_PATH: &str = "/api/v1/auth/login/";
pub const REGISTER_PATH: &str = "/api/v1/auth/register/";
pub const REFRESH_PATH: &str = "/api/v1/auth/refresh/";
pub const PASSWORD_RESET_PATH: &str = "/api/v1/auth/request_password_reset/";

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Snapshot of the stored credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

pub struct SessionManager {
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn TokenStore>,
    base_url: String,
    /// Serializes every write to the token pair.
    store_lock: Mutex<()>,
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn TokenStore>,
        base_url: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            transport,
            store,
            base_url,
            store_lock: Mutex::new(()),
        }
    }

    /// Absolute URL for an API path.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // -- Reads ---------------------------------------------------------------

    /// The stored access token, or `None` if nobody is logged in.
    pub fn access_token(&self) -> Result<Option<String>, ClientError> {
        self.read(ACCESS_TOKEN_KEY)
    }

    pub fn session(&self) -> Result<Session, ClientError> {
        Ok(Session {
            access_token: self.read(ACCESS_TOKEN_KEY)?,
            refresh_token: self.read(REFRESH_TOKEN_KEY)?,
        })
    }

    fn read(&self, key: &str) -> Result<Option<String>, ClientError> {
        self.store.get(key).map_err(ClientError::storage)
    }

    /// Persist tokens as one unit so a failed write never leaves a new
    /// access token next to a stale refresh token.
    fn write_tokens(&self, access: &str, refresh: Option<&str>) -> Result<(), ClientError> {
        let mut entries = vec![(ACCESS_TOKEN_KEY, access)];
        if let Some(refresh) = refresh {
            entries.push((REFRESH_TOKEN_KEY, refresh));
        }
        self.store.set_all(&entries).map_err(ClientError::storage)
    }

    // -- Requests ------------------------------------------------------------

    /// Send an unauthenticated request.
    pub async fn public_request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<ApiResponse, ClientError> {
        let request = ApiRequest::new(method, self.url(path)).with_body(body);
        self.dispatch(request).await
    }

    /// Send a request with the current access token.
    ///
    /// A 401 triggers one refresh and one retry with the new token. If the
    /// retry is also rejected the call fails with `Auth(Unauthorized)`; any
    /// other retried response is returned to the caller unchanged.
    pub async fn authorized_request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<ApiResponse, ClientError> {
        let token = self
            .access_token()?
            .ok_or(ClientError::Auth(AuthError::NotLoggedIn))?;
        let url = self.url(path);

        let first = ApiRequest::new(method, url.clone())
            .with_bearer(token.clone())
            .with_body(body.clone());
        let response = self.dispatch(first).await?;
        if !response.is_unauthorized() {
            return Ok(response);
        }

        info!(%url, "access token rejected, refreshing");
        let fresh = self.refresh_after(&token).await?;

        let retry = ApiRequest::new(method, url.clone())
            .with_bearer(fresh)
            .with_body(body);
        let response = self.dispatch(retry).await?;
        if response.is_unauthorized() {
            warn!(%url, "request still unauthorized after refresh");
            return Err(AuthError::Unauthorized.into());
        }
        Ok(response)
    }

    async fn dispatch(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let method = request.method;
        let url = request.url.clone();
        self.transport.send(request).await.map_err(|e| {
            warn!(method = method.as_str(), %url, "request failed: {e}");
            ClientError::Network(e.to_string())
        })
    }

    // -- Refresh -------------------------------------------------------------

    /// Exchange the refresh token for a new access token and persist it.
    pub async fn refresh(&self) -> Result<String, ClientError> {
        let _guard = self.store_lock.lock().await;
        self.refresh_locked().await
    }

    /// Refresh on behalf of a caller whose `rejected` token got a 401. If
    /// another caller already replaced that token while we waited for the
    /// lock, its result is reused without another network call.
    async fn refresh_after(&self, rejected: &str) -> Result<String, ClientError> {
        let _guard = self.store_lock.lock().await;
        if let Some(current) = self.access_token()? {
            if current != rejected {
                debug!("access token already refreshed by a concurrent request");
                return Ok(current);
            }
        }
        self.refresh_locked().await
    }

    /// Caller must hold `store_lock`.
    async fn refresh_locked(&self) -> Result<String, ClientError> {
        let Some(refresh_token) = self.read(REFRESH_TOKEN_KEY)? else {
            return Err(AuthError::NoRefreshToken.into());
        };

        let body = to_json(&RefreshRequest {
            refresh: &refresh_token,
        })?;
        let request = ApiRequest::new(Method::Post, self.url(REFRESH_PATH)).with_body(Some(body));

        let response = match self.transport.send(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("token refresh request failed: {e}");
                return Err(AuthError::RefreshFailed.into());
            }
        };
        if !response.is_success() {
            warn!(status = response.status, "token refresh rejected");
            return Err(AuthError::RefreshFailed.into());
        }

        let parsed: RefreshResponse = response.json().unwrap_or_default();
        let Some(access) = parsed.access.filter(|a| !a.is_empty()) else {
            warn!("token refresh response had no access token");
            return Err(AuthError::RefreshFailed.into());
        };

        let rotated = parsed.refresh.filter(|r| !r.is_empty());
        self.write_tokens(&access, rotated.as_deref())?;
        info!("access token refreshed");
        Ok(access)
    }

    // -- Account -------------------------------------------------------------

    /// Log in and persist the returned token pair.
    ///
    /// Server codes `001`/`003` come back as validation errors on `email`
    /// and `password`.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, ClientError> {
        let mut missing = Vec::new();
        if email.trim().is_empty() {
            missing.push(FieldError::new("email", "Email is required"));
        }
        if password.is_empty() {
            missing.push(FieldError::new("password", "Password is required"));
        }
        if let Some(errors) = ValidationErrors::from_vec(missing) {
            return Err(errors.into());
        }

        let body = to_json(&LoginRequest { email, password })?;
        let response = self.public_request(Method::Post, LOGIN_PATH, Some(body)).await?;

        if let Some(err) = field_error_from(&response) {
            return Err(err);
        }
        if !response.is_success() {
            warn!(status = response.status, "login rejected");
            return Err(AuthError::LoginFailed.into());
        }

        let pair: TokenPair = response.json().unwrap_or_default();
        let (Some(access), Some(refresh)) = (pair.access, pair.refresh) else {
            warn!("login response did not contain a token pair");
            return Err(AuthError::LoginFailed.into());
        };

        let _guard = self.store_lock.lock().await;
        self.write_tokens(&access, Some(&refresh))?;
        info!("logged in");

        Ok(Session {
            access_token: Some(access),
            refresh_token: Some(refresh),
        })
    }

    /// Create an account.
    ///
    /// The server normally answers with a verification email and no tokens,
    /// giving `Ok(None)`. If it does issue a token pair, the pair is stored
    /// and returned as a logged-in session.
    pub async fn register(
        &self,
        registration: &Registration,
    ) -> Result<Option<Session>, ClientError> {
        registration.validate()?;

        let body = to_json(registration)?;
        let response = self
            .public_request(Method::Post, REGISTER_PATH, Some(body))
            .await?;

        if let Some(err) = field_error_from(&response) {
            return Err(err);
        }
        let reported_error = response.error_body().and_then(|b| b.error);
        if !response.is_success() || reported_error.is_some() {
            return Err(ClientError::Server {
                status: response.status,
                message: reported_error.unwrap_or_else(|| response.error_message()),
            });
        }

        let pair: TokenPair = response.json().unwrap_or_default();
        let (Some(access), Some(refresh)) = (pair.access, pair.refresh) else {
            info!("registration accepted, awaiting verification");
            return Ok(None);
        };

        let _guard = self.store_lock.lock().await;
        self.write_tokens(&access, Some(&refresh))?;
        info!("registration accepted, session stored");
        Ok(Some(Session {
            access_token: Some(access),
            refresh_token: Some(refresh),
        }))
    }

    /// Ask the server to email a password reset link.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), ClientError> {
        if email.trim().is_empty() {
            return Err(ClientError::validation("email", "Please enter your email"));
        }

        let body = to_json(&PasswordResetRequest { email })?;
        let response = self
            .public_request(Method::Post, PASSWORD_RESET_PATH, Some(body))
            .await?;
        if !response.is_success() {
            return Err(ClientError::Server {
                status: response.status,
                message: response.error_message(),
            });
        }
        Ok(())
    }

    /// Forget both tokens. No network call.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let _guard = self.store_lock.lock().await;
        self.store
            .remove(ACCESS_TOKEN_KEY)
            .map_err(ClientError::storage)?;
        self.store
            .remove(REFRESH_TOKEN_KEY)
            .map_err(ClientError::storage)?;
        info!("logged out");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<Value, ClientError> {
    serde_json::to_value(value).map_err(|e| ClientError::Json(e.to_string()))
}

/// Map the auth endpoints' field codes to validation errors. Checked on
/// every response, since the server may report them with a 2xx status.
fn field_error_from(response: &ApiResponse) -> Option<ClientError> {
    let body = response.error_body()?;
    let field = match body.code.as_deref()? {
        CODE_BAD_EMAIL => "email",
        CODE_BAD_PASSWORD => "password",
        _ => return None,
    };
    let message = body
        .text()
        .map(str::to_string)
        .unwrap_or_else(|| format!("Invalid {field}"));
    Some(ClientError::validation(field, message))
}
