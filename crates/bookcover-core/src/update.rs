//! Resolve and persist the cover of a single book.

use serde::{Deserialize, Serialize};

use crate::orchestrator::{CoverResolver, CoverSource};
use crate::store::BookStore;
use crate::{BookQuery, CoreError, CoverResult, FailureKind};

/// Input of [`update_book_cover`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverRequest {
    pub book_id: String,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    /// Douban API key that replaces the configured pool for this call.
    #[serde(default, alias = "doubanApiKey")]
    pub credential: Option<String>,
}

/// Caller-facing outcome, always structured even when nothing was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    /// Provider name, or `cached-<provider>` for a cache hit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub message: String,
}

impl CoverResponse {
    fn found(cover_url: String, source: CoverSource) -> Self {
        let message = match source {
            CoverSource::Provider(p) => format!("cover fetched (source: {p})"),
            CoverSource::Cached(p) => {
                format!("cover fetched (source: cache, original source: {p})")
            }
        };
        Self {
            success: true,
            cover_url: Some(cover_url),
            source: Some(source.to_string()),
            error: None,
            message,
        }
    }

    fn failed(reason: &str) -> Self {
        Self {
            success: false,
            cover_url: None,
            source: None,
            error: Some(reason.to_string()),
            message: format!("failed to fetch cover: {reason}"),
        }
    }

    /// Payload for a request rejected before any lookup.
    pub fn from_error(err: &CoreError) -> Self {
        let reason = err.to_string();
        Self {
            success: false,
            cover_url: None,
            source: None,
            error: Some(reason.clone()),
            message: reason,
        }
    }
}

/// Resolve a cover for one book and write it to the store.
///
/// A blank `book_id` or `title` is rejected before any provider is tried.
/// A failed store write is logged and the resolved URL is still returned.
pub async fn update_book_cover(
    store: &dyn BookStore,
    resolver: &CoverResolver,
    request: &CoverRequest,
) -> Result<CoverResponse, CoreError> {
    if request.book_id.trim().is_empty() {
        return Err(CoreError::MissingBookId);
    }
    let query = BookQuery::new(request.title.as_str(), request.author.as_deref());
    query.validate()?;

    tracing::info!(book_id = %request.book_id, query = %query.normalized(), "fetching cover");

    let (response, _) = resolve_and_store(
        store,
        resolver,
        &request.book_id,
        &query,
        request.credential.as_deref(),
    )
    .await?;
    Ok(response)
}

/// Shared by the single-book update and the batch driver. Also returns the
/// failure class so callers can decide whether asking again makes sense.
pub(crate) async fn resolve_and_store(
    store: &dyn BookStore,
    resolver: &CoverResolver,
    book_id: &str,
    query: &BookQuery,
    credential: Option<&str>,
) -> Result<(CoverResponse, Option<FailureKind>), CoreError> {
    let resolution = resolver.resolve_cover(query, credential).await?;

    match (resolution.result, resolution.source) {
        (CoverResult::Success { cover_url }, Some(source)) => {
            if let Err(e) = store
                .update_cover(book_id, &cover_url, source.provider())
                .await
            {
                tracing::error!(book_id = %book_id, error = %e, "failed to save cover");
            }
            Ok((CoverResponse::found(cover_url, source), None))
        }
        (result, _) => Ok((
            CoverResponse::failed(result.reason().unwrap_or("no cover found")),
            result.failure_kind(),
        )),
    }
}
