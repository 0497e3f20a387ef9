//! Transport helpers shared by the HTTP adapters.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;

use crate::config::ProviderConfig;
use crate::error::{GatewayError, ProviderError};

/// Longest slice of an error body carried into a `ProviderError`.
const MAX_ERROR_BODY: usize = 200;

pub(crate) fn build_client(config: &ProviderConfig, timeout: Duration) -> Result<Client, GatewayError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| GatewayError::config("providers", config.id.clone(), e.to_string()))
}

/// Value of the provider's API-key environment variable, if set and non-empty.
pub(crate) fn api_key(config: &ProviderConfig) -> Option<String> {
    let var = config.api_key_env.as_deref()?;
    std::env::var(var).ok().filter(|key| !key.trim().is_empty())
}

/// Join `base` and `path` without doubling or dropping the slash.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Send `request` and decode a JSON body, mapping every failure to a [`ProviderError`].
pub(crate) async fn send_json(
    provider: &str,
    timeout: Duration,
    request: RequestBuilder,
) -> Result<Value, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|e| transport_error(provider, timeout, &e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(provider, timeout, status, &body));
    }

    response.json::<Value>().await.map_err(|e| {
        if e.is_timeout() {
            ProviderError::timeout(provider, timeout.as_millis() as u64)
        } else {
            ProviderError::invalid_response(provider, format!("response is not JSON: {}", e))
        }
    })
}

pub(crate) fn status_error(
    provider: &str,
    timeout: Duration,
    status: StatusCode,
    body: &str,
) -> ProviderError {
    let snippet: String = body.chars().take(MAX_ERROR_BODY).collect();
    let reason = format!("HTTP {}: {}", status.as_u16(), snippet.trim());
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            ProviderError::timeout(provider, timeout.as_millis() as u64)
        }
        StatusCode::TOO_MANY_REQUESTS | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderError::unavailable(provider, reason)
        }
        s if s.is_server_error() => ProviderError::unavailable(provider, reason),
        _ => ProviderError::invalid_response(provider, reason),
    }
}

fn transport_error(provider: &str, timeout: Duration, error: &reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::timeout(provider, timeout.as_millis() as u64)
    } else {
        ProviderError::unavailable(provider, error.to_string())
    }
}

/// Walk a JSON pointer down to a string, or fail with `InvalidResponse`.
pub(crate) fn text_at<'a>(provider: &str, body: &'a Value, pointer: &str) -> Result<&'a str, ProviderError> {
    body.pointer(pointer)
        .and_then(Value::as_str)
        .ok_or_else(|| {
            ProviderError::invalid_response(provider, format!("missing text at {}", pointer))
        })
}
