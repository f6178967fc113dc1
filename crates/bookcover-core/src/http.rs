//! Outbound GET helper and HTTP failure classification shared by all providers.
//!
//! Every provider issues a single GET per attempt with a per-request timeout.
//! Non-success statuses and transport errors are folded into an
//! [`HttpFailure`] so that provider code only has to decide what to do with a
//! [`FailureKind`], never with raw `reqwest` errors.

use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;

use crate::FailureKind;

/// A failed outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpFailure {
    pub kind: FailureKind,
    pub status: Option<u16>,
    pub detail: String,
}

impl fmt::Display for HttpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(code) => write!(f, "HTTP {code}: {}", self.detail),
            None => write!(f, "{}", self.detail),
        }
    }
}

impl std::error::Error for HttpFailure {}

impl From<reqwest::Error> for HttpFailure {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            FailureKind::Timeout
        } else if let Some(status) = err.status() {
            classify_status(status)
        } else {
            FailureKind::Transport
        };
        HttpFailure {
            kind,
            status: err.status().map(|s| s.as_u16()),
            detail: err.to_string(),
        }
    }
}

/// Map a non-success status to a failure class.
pub fn classify_status(status: StatusCode) -> FailureKind {
    match status.as_u16() {
        429 => FailureKind::RateLimited,
        401 | 403 => FailureKind::Auth,
        500..=599 => FailureKind::ServerError,
        _ => FailureKind::Http,
    }
}

/// Return `Err` for any non-2xx response.
pub fn check_status(resp: &reqwest::Response) -> Result<(), HttpFailure> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    Err(HttpFailure {
        kind: classify_status(status),
        status: Some(status.as_u16()),
        detail: status
            .canonical_reason()
            .unwrap_or("unexpected status")
            .to_string(),
    })
}

/// GET `url` and return the body as text.
pub async fn get_text(
    client: &reqwest::Client,
    url: &str,
    headers: &[(&str, &str)],
    timeout: Duration,
) -> Result<String, HttpFailure> {
    let mut req = client.get(url).timeout(timeout);
    for (name, value) in headers {
        req = req.header(*name, *value);
    }

    let resp = req.send().await?;
    check_status(&resp)?;
    Ok(resp.text().await?)
}
