//! Small reqwest helpers shared by the HTTP-backed engines.

use crate::error::{BackendError, ParseError};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Build a client with a per-request timeout.
pub fn client(timeout_secs: u64) -> Result<Client, ParseError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ParseError::InvalidConfig(format!("HTTP client: {e}")))
}

/// Join a base URL and a path without doubling or dropping the slash.
pub fn join(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Pass 2xx responses through; turn anything else into [`BackendError::Api`]
/// carrying the (truncated) response body.
pub async fn ensure_success(service: &'static str, resp: Response) -> Result<Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let mut message = resp.text().await.unwrap_or_default();
    if message.len() > 500 {
        let cut = (0..=500).rev().find(|i| message.is_char_boundary(*i)).unwrap_or(0);
        message.truncate(cut);
        message.push('…');
    }
    Err(BackendError::Api {
        service,
        status: status.as_u16(),
        message,
    })
}

/// Check the status, then decode a JSON body.
pub async fn json<T: DeserializeOwned>(service: &'static str, resp: Response) -> Result<T, BackendError> {
    let resp = ensure_success(service, resp).await?;
    resp.json::<T>()
        .await
        .map_err(|e| BackendError::Decode(format!("{service}: {e}")))
}

/// Map a send error.
pub fn send_error(service: &'static str) -> impl Fn(reqwest::Error) -> BackendError {
    move |e| BackendError::from_reqwest(service, e)
}
