use std::time::Duration;

use reqwest::StatusCode;

use crate::ClientOptions;

/// Computes the delay before retry `attempt` (0-indexed from the first retry).
///
/// Pure exponential backoff without jitter: `min(base * 2^attempt, max)`.
pub fn backoff_delay(options: &ClientOptions, attempt: u32) -> Duration {
    let exp = attempt.min(16);
    let multiplier = 1u64 << exp;
    let delay_ms = options
        .retry_backoff_ms
        .saturating_mul(multiplier)
        .min(options.max_backoff_ms);
    Duration::from_millis(delay_ms)
}

/// Statuses worth repeating verbatim: request timeout, rate limiting and
/// transient gateway/server failures.
pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// 401 and 403 invalidate the stored session.
pub fn is_auth_failure(status: StatusCode) -> bool {
    matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::StatusCode;

    use super::{backoff_delay, is_auth_failure, is_retryable_status};
    use crate::ClientOptions;

    #[test]
    fn default_backoff_doubles_from_one_second() {
        let options = ClientOptions::default();
        assert_eq!(backoff_delay(&options, 0), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(&options, 1), Duration::from_millis(2_000));
        assert_eq!(backoff_delay(&options, 2), Duration::from_millis(4_000));
    }

    #[test]
    fn backoff_is_capped_at_max_delay() {
        let options = ClientOptions::default();
        assert_eq!(backoff_delay(&options, 3), Duration::from_millis(8_000));
        assert_eq!(backoff_delay(&options, 40), Duration::from_millis(8_000));
    }

    #[test]
    fn retryable_statuses() {
        for code in [408, 429, 500, 502, 503, 504] {
            let status = StatusCode::from_u16(code).expect("valid status");
            assert!(is_retryable_status(status), "{code} must be retryable");
        }
        for code in [400, 401, 403, 404, 409, 422, 501] {
            let status = StatusCode::from_u16(code).expect("valid status");
            assert!(!is_retryable_status(status), "{code} must not be retryable");
        }
    }

    #[test]
    fn only_401_and_403_are_auth_failures() {
        assert!(is_auth_failure(StatusCode::UNAUTHORIZED));
        assert!(is_auth_failure(StatusCode::FORBIDDEN));
        assert!(!is_auth_failure(StatusCode::NOT_FOUND));
    }
}
