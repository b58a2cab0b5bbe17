//! Shared HTTP client construction and response status classification.

use std::time::Duration;

use reqwest::StatusCode;

use crate::error::LlmError;

/// Create a shared HTTP client with standard Quarry configuration.
///
/// Config: 30s connect timeout, 60s request timeout, rustls TLS,
/// `quarry/{version}` user-agent, redirect limit 10.
#[must_use]
pub fn default_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .timeout(Duration::from_secs(60))
        .user_agent(concat!("quarry/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .expect("default HTTP client construction must not fail")
}

/// Parse the `Retry-After` header value as whole seconds.
pub(crate) fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    if let Some(val) = response.headers().get("retry-after")
        && let Ok(s) = val.to_str()
        && let Ok(secs) = s.trim().parse::<u64>()
    {
        return Some(Duration::from_secs(secs));
    }
    None
}

/// Pass successful responses through; turn every other status into a classified error.
///
/// # Errors
///
/// 429 maps to [`LlmError::RateLimited`], 408 and 5xx to [`LlmError::Unavailable`],
/// 401/403 to [`LlmError::Unauthorized`] and remaining statuses to [`LlmError::Rejected`].
pub(crate) async fn check_status(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = retry_after(&response);
        tracing::warn!(provider, ?retry_after, "rate limited");
        return Err(LlmError::RateLimited { retry_after });
    }

    let body = response.text().await.unwrap_or_default();
    tracing::error!(provider, status = status.as_u16(), "API error: {body}");

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::Unauthorized {
            provider: provider.to_owned(),
            status: status.as_u16(),
        },
        s if s.is_server_error() || s == StatusCode::REQUEST_TIMEOUT => {
            LlmError::Unavailable(format!("{provider} returned status {s}"))
        }
        s => LlmError::Rejected {
            provider: provider.to_owned(),
            status: s.as_u16(),
            message: body,
        },
    })
}
