//! Session operations: login, registration, logout and token refresh.
//!
//! Login, registration and logout talk to the backend origin directly with a
//! single attempt. They neither retry nor touch the connection state.

use std::time::Duration;

use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::{
    client::{encode_body, ApiClient},
    storage::{StoreError, AUTH_TOKEN_KEY, USER_DATA_KEY},
    ApiError, ApiResponse, ErrorKind, ResponseBody, Result,
};

#[derive(Clone, Debug, Serialize)]
pub struct LoginCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct LoginResponse {
    pub username: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub jwt: Option<String>,
    #[serde(default)]
    pub status: bool,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterCredentials {
    pub username: String,
    pub password: String,
    pub enabled: bool,
    pub account_not_expired: bool,
    pub account_not_locked: bool,
    pub credential_not_expired: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles_list: Option<Vec<String>>,
}

impl RegisterCredentials {
    /// Enabled, unexpired, unlocked account without explicit roles.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            enabled: true,
            account_not_expired: true,
            account_not_locked: true,
            credential_not_expired: true,
            roles_list: None,
        }
    }
}

/// Minimal identity cached next to the token.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserData {
    #[serde(default)]
    pub id: Option<String>,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogoutOutcome {
    /// Whether the backend acknowledged the logout. Local state is cleared
    /// either way.
    pub remote: bool,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct RefreshedToken {
    token: Option<String>,
}

impl ApiClient {
    /// Authenticates and stores the returned JWT and user identity.
    pub async fn login(
        &self,
        credentials: &LoginCredentials,
    ) -> Result<ApiResponse<LoginResponse>> {
        let url = self.origin_url("/auth/login")?;
        let payload = encode_body(credentials)?;
        let body = self
            .send_direct(Method::POST, url.as_str(), None, Some(payload))
            .await?;
        let envelope = body.into_envelope::<LoginResponse>()?;
        let response = envelope.data;

        let token = match (&response.jwt, response.status) {
            (Some(jwt), true) if !jwt.trim().is_empty() => jwt.trim().to_owned(),
            _ => {
                return Err(ApiError::LoginRejected(
                    response
                        .message
                        .clone()
                        .unwrap_or_else(|| "login failed".to_owned()),
                ))
            }
        };

        let user = UserData {
            id: None,
            username: response.username.clone(),
            email: None,
        };
        self.store().set(AUTH_TOKEN_KEY, &token)?;
        let user = serde_json::to_string(&user).map_err(StoreError::from)?;
        self.store().set(USER_DATA_KEY, &user)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(username = %response.username, "login succeeded");

        Ok(ApiResponse {
            success: true,
            message: response.message.clone(),
            data: response,
        })
    }

    /// Creates a user account. Does not log in.
    pub async fn register<T>(&self, credentials: &RegisterCredentials) -> Result<ApiResponse<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = self.origin_url("/api/users")?;
        let payload = encode_body(credentials)?;
        let body = self
            .send_direct(Method::POST, url.as_str(), None, Some(payload))
            .await?;
        let mut envelope = body.into_envelope::<T>()?;
        envelope.message.get_or_insert_with(|| "user registered".to_owned());
        Ok(envelope)
    }

    /// Invalidates the token on the backend when possible and always clears
    /// the local session.
    pub async fn logout(&self) -> LogoutOutcome {
        let Some(token) = self.token() else {
            self.clear_session();
            return LogoutOutcome {
                remote: false,
                message: "session closed".to_owned(),
            };
        };

        let outcome = match self.origin_url("/auth/logout") {
            Ok(url) => self
                .send_direct(Method::POST, url.as_str(), Some(&token), None)
                .await
                .map(|body| LogoutOutcome {
                    remote: true,
                    message: body
                        .into_envelope::<serde_json::Value>()
                        .ok()
                        .and_then(|envelope| envelope.message)
                        .unwrap_or_else(|| "session closed".to_owned()),
                }),
            Err(err) => Err(err),
        };

        self.clear_session();
        outcome.unwrap_or_else(|_err| {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %_err, "backend logout failed, session closed locally");
            LogoutOutcome {
                remote: false,
                message: "session closed locally".to_owned(),
            }
        })
    }

    /// Exchanges the current token for a fresh one and stores it.
    pub async fn refresh_token(&self) -> Result<ApiResponse<Option<String>>> {
        let response = self.post_empty::<RefreshedToken>("/auth/refresh").await?;
        if let Some(token) = response.data.token.as_deref().filter(|t| !t.trim().is_empty()) {
            self.store().set(AUTH_TOKEN_KEY, token.trim())?;
        }
        Ok(ApiResponse {
            success: response.success,
            data: response.data.token,
            message: response.message,
        })
    }

    pub async fn profile(&self) -> Result<ApiResponse<UserData>> {
        self.get("/auth/profile").await
    }

    pub fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    /// Cached identity, `None` when absent or unreadable.
    pub fn user_data(&self) -> Option<UserData> {
        let raw = self.store().get(USER_DATA_KEY)?;
        serde_json::from_str(&raw).ok()
    }

    pub fn clear_session(&self) {
        self.clear_stored_session();
    }

    /// Single attempt without retry or connection-state bookkeeping.
    async fn send_direct(
        &self,
        method: Method,
        url: &str,
        token: Option<&str>,
        payload: Option<Vec<u8>>,
    ) -> Result<ResponseBody> {
        let timeout = Duration::from_millis(self.options().timeout_ms);
        let raw = self
            .send_once(&method, url, token, payload, timeout)
            .await
            .map_err(|err| {
                let kind = ErrorKind::from_transport(&err);
                ApiError::Transport {
                    kind,
                    message: kind.user_message().to_owned(),
                    source: err,
                }
            })?;

        if raw.status.is_success() {
            Ok(raw.body)
        } else {
            let message = raw.body.error_message(raw.status);
            Err(ApiError::Http {
                status: raw.status.as_u16(),
                kind: ErrorKind::from_status(raw.status),
                message,
                body: raw.body,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{RegisterCredentials, UserData};
    use crate::{
        storage::{KeyValueStore, MemoryStore, AUTH_TOKEN_KEY, USER_DATA_KEY},
        ApiClient,
    };

    #[test]
    fn register_defaults_enable_account() {
        let body = serde_json::to_value(RegisterCredentials::new("ana", "pw")).expect("encode");
        assert_eq!(body["enabled"], true);
        assert_eq!(body["accountNotExpired"], true);
        assert_eq!(body["accountNotLocked"], true);
        assert_eq!(body["credentialNotExpired"], true);
        assert!(body.get("rolesList").is_none());
    }

    #[test]
    fn user_data_reads_cached_identity() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(USER_DATA_KEY, r#"{"id":"1","username":"ana","email":""}"#)
            .expect("set");
        let client = ApiClient::new("http://localhost").with_store(store);
        assert_eq!(
            client.user_data(),
            Some(UserData {
                id: Some("1".to_owned()),
                username: "ana".to_owned(),
                email: Some(String::new()),
            })
        );
    }

    #[test]
    fn corrupt_user_data_is_none() {
        let store = Arc::new(MemoryStore::new());
        store.set(USER_DATA_KEY, "{").expect("set");
        let client = ApiClient::new("http://localhost").with_store(store);
        assert_eq!(client.user_data(), None);
    }

    #[test]
    fn clear_session_removes_token_and_user() {
        let store = Arc::new(MemoryStore::new());
        store.set(AUTH_TOKEN_KEY, "jwt").expect("set");
        store.set(USER_DATA_KEY, r#"{"username":"ana"}"#).expect("set");
        let client = ApiClient::new("http://localhost").with_store(store.clone());
        assert!(client.is_authenticated());

        client.clear_session();
        assert!(!client.is_authenticated());
        assert_eq!(store.get(USER_DATA_KEY), None);
    }
}
