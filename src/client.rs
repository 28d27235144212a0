use std::{fmt, sync::Arc, time::Duration};

use reqwest::{header, Method, StatusCode, Url};
use serde::{de::DeserializeOwned, Serialize};
use tokio::time::sleep;

use crate::{
    retry::{backoff_delay, is_auth_failure, is_retryable_status},
    storage::{KeyValueStore, MemoryStore, AUTH_TOKEN_KEY, USER_DATA_KEY},
    ApiError, ApiResponse, ClientOptions, ConnectionMonitor, ConnectionState, ErrorKind,
    ResponseBody, Result, Subscription,
};

const DEFAULT_API_URL: &str = "http://localhost:8080/api/v1";

/// Signal raised when the backend rejects the stored session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AuthInvalidated {
    pub status: u16,
    /// Where the UI should send the user.
    pub redirect_to: String,
}

type AuthHandler = Arc<dyn Fn(&AuthInvalidated) + Send + Sync>;

/// One finished attempt with its body already read.
pub(crate) struct RawResponse {
    pub(crate) status: StatusCode,
    pub(crate) body: ResponseBody,
}

#[derive(Clone)]
/// HTTP client for the finance backend.
///
/// Clones share the HTTP pool, the session store and the connection monitor.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    store: Arc<dyn KeyValueStore>,
    monitor: ConnectionMonitor,
    on_auth_invalidated: Option<AuthHandler>,
    options: ClientOptions,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("monitor", &self.monitor)
            .field("options", &self.options)
            .finish()
    }
}

impl ApiClient {
    /// Creates a client for `base_url` (e.g. `https://host/api/v1`) with an
    /// in-memory session store.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            store: Arc::new(MemoryStore::new()),
            monitor: ConnectionMonitor::new(),
            on_auth_invalidated: None,
            options: ClientOptions::default(),
        }
    }

    /// Creates a client from environment variables.
    ///
    /// Reads:
    /// - `GESTOR_API_URL`: API base URL, defaults to `http://localhost:8080/api/v1`
    /// - `GESTOR_REQUEST_TIMEOUT_MS`: optional per-attempt timeout
    pub fn from_env() -> std::result::Result<Self, String> {
        let url = std::env::var("GESTOR_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_owned());
        if url.trim().is_empty() {
            return Err("GESTOR_API_URL is set but empty".to_owned());
        }
        Url::parse(url.trim()).map_err(|err| format!("GESTOR_API_URL is not a valid url: {err}"))?;

        let mut options = ClientOptions::default();
        if let Ok(raw) = std::env::var("GESTOR_REQUEST_TIMEOUT_MS") {
            options.timeout_ms = raw
                .trim()
                .parse()
                .map_err(|err| format!("GESTOR_REQUEST_TIMEOUT_MS must be an integer: {err}"))?;
        }
        Ok(Self::new(url.trim()).with_options(options))
    }

    /// Applies client options such as timeout and retry behavior.
    pub fn with_options(mut self, opts: ClientOptions) -> Self {
        self.options = opts;
        self
    }

    /// Uses `store` for the session token and user data.
    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = store;
        self
    }

    /// Publishes connection health through an existing monitor, so several
    /// clients can feed one status banner.
    pub fn with_monitor(mut self, monitor: ConnectionMonitor) -> Self {
        self.monitor = monitor;
        self
    }

    /// Registers the handler for the 401/403 redirect signal.
    pub fn on_auth_invalidated<F>(mut self, handler: F) -> Self
    where
        F: Fn(&AuthInvalidated) + Send + Sync + 'static,
    {
        self.on_auth_invalidated = Some(Arc::new(handler));
        self
    }

    /// Base URL with any trailing slash removed.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Session store holding the token and cached user data.
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Monitor fed by every request from this client and its clones.
    pub fn connection_monitor(&self) -> &ConnectionMonitor {
        &self.monitor
    }

    /// Shorthand for [`ConnectionMonitor::subscribe`] on this client's monitor.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe_to_connection_state<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        self.monitor.subscribe(callback)
    }

    /// Current connection snapshot.
    pub fn connection_state(&self) -> ConnectionState {
        self.monitor.state()
    }

    /// Marks the connection healthy without a network call, e.g. when the
    /// user dismisses a failure banner.
    pub fn reset_connection_state(&self) {
        self.monitor.reset();
    }

    /// GET `path` under the base URL.
    ///
    /// Retryable failures are retried with exponential backoff; every attempt
    /// is reflected in the connection state.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>> {
        let url = self.api_url(path);
        self.request(Method::GET, &url, None).await
    }

    /// GET against a full URL instead of a path under the base URL.
    pub async fn get_absolute<T: DeserializeOwned>(&self, url: &str) -> Result<ApiResponse<T>> {
        self.request(Method::GET, url, None).await
    }

    /// POST `body` serialized as JSON.
    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = self.api_url(path);
        let payload = encode_body(body)?;
        self.request(Method::POST, &url, Some(payload)).await
    }

    /// POST without a request body.
    pub async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>> {
        let url = self.api_url(path);
        self.request(Method::POST, &url, None).await
    }

    /// PUT `body` serialized as JSON.
    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = self.api_url(path);
        let payload = encode_body(body)?;
        self.request(Method::PUT, &url, Some(payload)).await
    }

    /// PUT without a request body.
    pub async fn put_empty<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>> {
        let url = self.api_url(path);
        self.request(Method::PUT, &url, None).await
    }

    /// DELETE `path`. An empty response decodes into `()` or `Option<T>`.
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>> {
        let url = self.api_url(path);
        self.request(Method::DELETE, &url, None).await
    }

    /// Calls `<origin>/health` once, without auth or retries, and records the
    /// outcome in the connection state.
    pub async fn check_connection(&self) -> bool {
        let url = match self.origin_url("/health") {
            Ok(url) => url,
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %_err, "cannot build health url");
                return false;
            }
        };

        let response = self
            .http
            .get(url)
            .header(header::CONTENT_TYPE, "application/json")
            .timeout(Duration::from_millis(self.options.health_timeout_ms))
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => {
                self.monitor.record_health_check(None);
                true
            }
            Ok(_response) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(status = %_response.status(), "health check failed");
                self.monitor.record_health_check(Some(ErrorKind::Server));
                false
            }
            Err(err) => {
                self.monitor
                    .record_health_check(Some(ErrorKind::from_transport(&err)));
                false
            }
        }
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        payload: Option<Vec<u8>>,
    ) -> Result<ApiResponse<T>> {
        let token = self.token();
        let raw = self
            .send_with_retry(&method, url, token.as_deref(), payload)
            .await?;
        raw.body.into_envelope()
    }

    async fn send_with_retry(
        &self,
        method: &Method,
        url: &str,
        token: Option<&str>,
        payload: Option<Vec<u8>>,
    ) -> Result<RawResponse> {
        let max_retries = self.options.max_retries;
        let mut attempt = 0u32;
        loop {
            let timeout = Duration::from_millis(self.options.timeout_ms);
            match self
                .send_once(method, url, token, payload.clone(), timeout)
                .await
            {
                Ok(raw) if raw.status.is_success() => {
                    self.monitor.record_success();
                    return Ok(raw);
                }
                Ok(raw) => {
                    let kind = ErrorKind::from_status(raw.status);
                    if is_retryable_status(raw.status) && attempt < max_retries {
                        let message = format!(
                            "Server responded {}, retrying...",
                            raw.status.as_u16()
                        );
                        self.wait_before_retry(attempt, kind, message).await;
                        attempt += 1;
                        continue;
                    }

                    let err = self.status_error(raw);
                    self.monitor.record_failure(attempt, kind, err.message());
                    return Err(err);
                }
                Err(err) => {
                    let kind = ErrorKind::from_transport(&err);
                    let message = kind.user_message().to_owned();
                    if kind.is_transient() && attempt < max_retries {
                        self.wait_before_retry(attempt, kind, message).await;
                        attempt += 1;
                        continue;
                    }

                    #[cfg(feature = "tracing")]
                    tracing::warn!(%method, url, %kind, attempt, "request failed: {err}");

                    self.monitor.record_failure(attempt, kind, message.clone());
                    return Err(ApiError::Transport {
                        kind,
                        message,
                        source: err,
                    });
                }
            }
        }
    }

    /// Performs a single attempt and reads the whole body.
    pub(crate) async fn send_once(
        &self,
        method: &Method,
        url: &str,
        token: Option<&str>,
        payload: Option<Vec<u8>>,
        timeout: Duration,
    ) -> std::result::Result<RawResponse, reqwest::Error> {
        let mut request = self
            .http
            .request(method.clone(), url)
            .header(header::CONTENT_TYPE, "application/json")
            .timeout(timeout);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(payload) = payload {
            request = request.body(payload);
        }

        let response = request.send().await?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let text = response.text().await?;

        let body = ResponseBody::parse(content_type.as_deref(), text);
        Ok(RawResponse { status, body })
    }

    /// Publishes the retrying state, then waits for the backoff of `attempt`.
    async fn wait_before_retry(&self, attempt: u32, kind: ErrorKind, message: String) {
        let delay = backoff_delay(&self.options, attempt);

        #[cfg(feature = "tracing")]
        tracing::warn!(
            %kind,
            retry = attempt + 1,
            max_retries = self.options.max_retries,
            "retrying request after {} ms",
            delay.as_millis()
        );

        self.monitor.record_retry(attempt + 1, kind, message);
        sleep(delay).await;
    }

    /// Builds the error for a final non-success response, tearing down the
    /// session on 401/403.
    pub(crate) fn status_error(&self, raw: RawResponse) -> ApiError {
        let message = raw.body.error_message(raw.status);
        let status = raw.status.as_u16();
        if is_auth_failure(raw.status) {
            self.invalidate_session(status);
            return ApiError::Unauthorized {
                status,
                message,
                body: raw.body,
            };
        }
        ApiError::Http {
            status,
            kind: ErrorKind::from_status(raw.status),
            message,
            body: raw.body,
        }
    }

    fn invalidate_session(&self, status: u16) {
        #[cfg(feature = "tracing")]
        tracing::warn!(status, "session token rejected, clearing session");

        self.clear_stored_session();
        if let Some(handler) = &self.on_auth_invalidated {
            handler(&AuthInvalidated {
                status,
                redirect_to: self.options.login_path.clone(),
            });
        }
    }

    /// Removes token and user data, logging instead of failing.
    pub(crate) fn clear_stored_session(&self) {
        for key in [AUTH_TOKEN_KEY, USER_DATA_KEY] {
            if let Err(_err) = self.store.remove(key) {
                #[cfg(feature = "tracing")]
                tracing::warn!(key, error = %_err, "failed to clear session entry");
            }
        }
    }

    pub(crate) fn token(&self) -> Option<String> {
        self.store
            .get(AUTH_TOKEN_KEY)
            .map(|token| token.trim().to_owned())
            .filter(|token| !token.is_empty())
    }

    fn api_url(&self, path: &str) -> String {
        if path.is_empty() || path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    /// Resolves an absolute path against the scheme and host of the base URL,
    /// dropping its API prefix.
    pub(crate) fn origin_url(&self, path: &str) -> Result<Url> {
        let base = Url::parse(&self.base_url)
            .map_err(|err| ApiError::InvalidUrl(format!("{}: {err}", self.base_url)))?;
        base.join(path)
            .map_err(|err| ApiError::InvalidUrl(format!("{path}: {err}")))
    }
}

pub(crate) fn encode_body<B: Serialize + ?Sized>(body: &B) -> Result<Vec<u8>> {
    serde_json::to_vec(body)
        .map_err(|err| ApiError::Decode(format!("request body is not serializable: {err}")))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::ApiClient;
    use crate::storage::{KeyValueStore, MemoryStore, AUTH_TOKEN_KEY};

    #[test]
    fn api_url_joins_with_single_slash() {
        let client = ApiClient::new("https://api.example.com/api/v1/");
        assert_eq!(client.api_url("/category"), "https://api.example.com/api/v1/category");
        assert_eq!(client.api_url("category"), "https://api.example.com/api/v1/category");
    }

    #[test]
    fn origin_url_drops_api_prefix() {
        let client = ApiClient::new("https://api.example.com/api/v1");
        let url = client.origin_url("/auth/login").expect("must resolve");
        assert_eq!(url.as_str(), "https://api.example.com/auth/login");
    }

    #[test]
    fn origin_url_rejects_invalid_base() {
        let client = ApiClient::new("not a url");
        assert!(client.origin_url("/health").is_err());
    }

    #[test]
    fn blank_token_is_ignored() {
        let store = Arc::new(MemoryStore::new());
        store.set(AUTH_TOKEN_KEY, "   ").expect("set");
        let client = ApiClient::new("http://localhost").with_store(store.clone());
        assert_eq!(client.token(), None);

        store.set(AUTH_TOKEN_KEY, " jwt ").expect("set");
        assert_eq!(client.token().as_deref(), Some("jwt"));
    }

    #[test]
    fn debug_does_not_leak_store_contents() {
        let store = Arc::new(MemoryStore::new());
        store.set(AUTH_TOKEN_KEY, "secret-token").expect("set");
        let client = ApiClient::new("http://localhost").with_store(store);
        let debug = format!("{client:?}");
        assert!(!debug.contains("secret-token"));
    }
}
