/// Configures HTTP timeouts, retry behavior and the login redirect target.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientOptions {
    /// Per-attempt request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Base retry backoff in milliseconds (exponential strategy).
    pub retry_backoff_ms: u64,
    /// Upper bound for a single backoff delay in milliseconds.
    pub max_backoff_ms: u64,
    /// Timeout for the health check in milliseconds.
    pub health_timeout_ms: u64,
    /// Path handed to the auth-invalidation handler on 401/403.
    pub login_path: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_retries: 3,
            retry_backoff_ms: 1_000,
            max_backoff_ms: 8_000,
            health_timeout_ms: 5_000,
            login_path: "/login".to_owned(),
        }
    }
}
