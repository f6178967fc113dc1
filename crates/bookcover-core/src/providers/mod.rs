//! Cover provider trait and implementations for querying third-party book sites.

pub mod dangdang;
pub mod douban;
pub mod jd;
pub mod mock;
pub mod openlibrary;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::extract::{ExtractError, extract_cover};
use crate::http::get_text;
use crate::{CoverResult, FailureKind, Miss, ProviderName};

/// A third-party source that can look up a cover image for a search string.
///
/// Implementations never fail past this boundary: transport and parse errors
/// come back as [`CoverResult::Failure`].
pub trait CoverProvider: Send + Sync {
    fn name(&self) -> ProviderName;

    /// Search for `query` and return the best cover URL.
    ///
    /// `credential` is an externally supplied API key; providers that have no
    /// use for one ignore it.
    fn fetch<'a>(
        &'a self,
        query: &'a str,
        credential: Option<&'a str>,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = CoverResult> + Send + 'a>>;
}

/// Turn an extraction outcome into a provider result.
pub(crate) fn from_extraction(
    provider: ProviderName,
    extracted: Result<String, ExtractError>,
) -> CoverResult {
    match extracted {
        Ok(url) => CoverResult::success(url),
        Err(ExtractError::Miss(miss)) => {
            let reason = match (provider, miss) {
                (ProviderName::Dangdang | ProviderName::Jd, _) => "no cover found",
                (_, miss) => miss.reason(),
            };
            CoverResult::failure(FailureKind::NotFound(miss), format!("{provider}: {reason}"))
        }
        Err(ExtractError::Malformed(detail)) => CoverResult::failure(
            FailureKind::InvalidResponse,
            format!("{provider} returned an invalid response: {detail}"),
        ),
    }
}

/// One GET, no retry, then extraction. Used by every provider except Douban.
pub(crate) async fn fetch_once(
    provider: ProviderName,
    url: &str,
    headers: &[(&str, &str)],
    client: &reqwest::Client,
    timeout: Duration,
) -> CoverResult {
    tracing::debug!(provider = %provider, url = %url, "sending search request");

    match get_text(client, url, headers, timeout).await {
        Ok(body) => {
            tracing::debug!(provider = %provider, bytes = body.len(), "received response");
            from_extraction(provider, extract_cover(provider, &body))
        }
        Err(e) => {
            tracing::warn!(provider = %provider, error = %e, "request failed");
            CoverResult::failure(e.kind, format!("{provider} request failed: {e}"))
        }
    }
}

/// `NotFound` result with the provider-prefixed default reason.
pub(crate) fn not_found(provider: ProviderName, miss: Miss) -> CoverResult {
    CoverResult::failure(
        FailureKind::NotFound(miss),
        format!("{provider}: {}", miss.reason()),
    )
}
