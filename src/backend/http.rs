//! Shared plumbing for the HTTP providers.

use crate::config::{Config, ProviderKind};
use crate::error::{Result, TalkbackError};

/// Read a provider's API key from the environment variable the config names.
pub fn api_key(config: &Config, provider: ProviderKind) -> Result<String> {
    let Some(var) = config.api_key_env(provider) else {
        return Ok(String::new());
    };
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
        _ => Err(TalkbackError::ConfigInvalidValue {
            key: format!("providers.{provider}.api_key_env"),
            message: format!("environment variable {var} is not set"),
        }),
    }
}

/// Turn a non-success response into [`TalkbackError::BackendStatus`].
pub async fn check_status(backend: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TalkbackError::BackendStatus {
        backend: backend.to_string(),
        status: status.as_u16(),
        message: truncate(&body, 200),
    })
}

/// Join a base URL and a path without doubling the slash.
pub fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
