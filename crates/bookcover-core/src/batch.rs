//! Paged batch runs over the books that still lack a cover.
//!
//! Books are handled one at a time. Each book gets its own outer retry loop
//! on top of the provider-level retries, and the driver pauses between books
//! to stay under third-party rate limits. A failing book never aborts the run.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::orchestrator::CoverResolver;
use crate::store::{Book, BookStore};
use crate::update::resolve_and_store;
use crate::{BookQuery, Config, CoreError};

/// One page of the "books missing a cover" listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCursor {
    pub skip: usize,
    pub limit: usize,
}

impl BatchCursor {
    pub fn new(skip: usize, limit: usize) -> Result<Self, CoreError> {
        if limit == 0 {
            return Err(CoreError::InvalidLimit);
        }
        Ok(Self { skip, limit })
    }
}

/// Retry and pacing knobs for [`run_batch`].
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Extra attempts per book after the first one.
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Pause between two consecutive books.
    pub request_delay: Duration,
    /// Douban API key used for every book of the run.
    pub credential: Option<String>,
}

impl BatchOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.batch_max_retries,
            retry_delay: Duration::from_millis(config.batch_retry_delay_ms),
            request_delay: Duration::from_millis(config.batch_request_delay_ms),
            credential: None,
        }
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Per-book record of a batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookOutcome {
    pub book_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<u64>,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Success message, or the failure reason.
    pub message: String,
    /// Outer retries spent on this book.
    pub retries: u32,
}

/// Aggregate result of one [`run_batch`] call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub processed: usize,
    pub updated: usize,
    pub failed: usize,
    /// Cursor for the next page, present only when `has_more`.
    pub next_cursor: Option<BatchCursor>,
    pub has_more: bool,
    pub results: Vec<BookOutcome>,
    /// Total wall time in seconds.
    pub elapsed: f64,
    pub success_rate: String,
    pub avg_seconds_per_book: f64,
    pub message: String,
    pub next_step: String,
}

impl BatchSummary {
    fn empty() -> Self {
        Self {
            processed: 0,
            updated: 0,
            failed: 0,
            next_cursor: None,
            has_more: false,
            results: Vec::new(),
            elapsed: 0.0,
            success_rate: "0%".to_string(),
            avg_seconds_per_book: 0.0,
            message: "all books already have covers".to_string(),
            next_step: "all books processed".to_string(),
        }
    }
}

/// Process one page of books without a cover.
///
/// Only a store read failure is an error; individual books that cannot be
/// resolved are counted in `failed` and the run carries on.
pub async fn run_batch(
    store: &dyn BookStore,
    resolver: &CoverResolver,
    cursor: BatchCursor,
    options: &BatchOptions,
) -> Result<BatchSummary, CoreError> {
    if cursor.limit == 0 {
        return Err(CoreError::InvalidLimit);
    }

    let books = store.books_missing_cover(cursor.skip, cursor.limit).await?;
    if books.is_empty() {
        tracing::info!(skip = cursor.skip, "no books without a cover");
        return Ok(BatchSummary::empty());
    }

    let total = books.len();
    tracing::info!(books = total, skip = cursor.skip, limit = cursor.limit, "batch started");

    let start = Instant::now();
    let mut results = Vec::with_capacity(total);

    for (i, book) in books.iter().enumerate() {
        tracing::info!(
            book = i + 1,
            of = total,
            id = %book.id,
            title = %book.title,
            "processing book"
        );

        let outcome = process_book(store, resolver, book, options).await;
        if outcome.success {
            tracing::info!(title = %book.title, message = %outcome.message, "cover updated");
        } else {
            tracing::warn!(title = %book.title, reason = %outcome.message, "no cover");
        }
        results.push(outcome);

        if i + 1 < total && !options.request_delay.is_zero() {
            tracing::debug!(delay_ms = options.request_delay.as_millis() as u64, "waiting before next book");
            tokio::time::sleep(options.request_delay).await;
        }
    }

    let elapsed = start.elapsed().as_secs_f64();
    let updated = results.iter().filter(|r| r.success).count();
    let failed = total - updated;
    let has_more = total == cursor.limit;
    let next_cursor = has_more.then(|| BatchCursor {
        skip: cursor.skip + total,
        limit: cursor.limit,
    });

    let summary = BatchSummary {
        processed: total,
        updated,
        failed,
        next_cursor,
        has_more,
        results,
        elapsed,
        success_rate: format!("{:.1}%", updated as f64 / total as f64 * 100.0),
        avg_seconds_per_book: elapsed / total as f64,
        message: format!(
            "batch finished: {updated} updated, {failed} failed in {elapsed:.1}s"
        ),
        next_step: match next_cursor {
            Some(next) => format!("run again with skip {} to process the next page", next.skip),
            None => "all books processed".to_string(),
        },
    };

    tracing::info!(
        processed = summary.processed,
        updated = summary.updated,
        failed = summary.failed,
        success_rate = %summary.success_rate,
        has_more = summary.has_more,
        "batch finished"
    );

    Ok(summary)
}

/// Strip the Chinese title brackets that some records carry.
pub fn clean_title(title: &str) -> String {
    title.replace(['《', '》'], "").trim().to_string()
}

async fn process_book(
    store: &dyn BookStore,
    resolver: &CoverResolver,
    book: &Book,
    options: &BatchOptions,
) -> BookOutcome {
    let query = BookQuery::new(clean_title(&book.title), book.author.clone());
    let mut outcome = BookOutcome {
        book_id: book.id.clone(),
        serial: book.serial,
        title: book.title.clone(),
        author: book.author.clone(),
        success: false,
        cover_url: None,
        source: None,
        message: "failed to fetch cover".to_string(),
        retries: 0,
    };

    for retry in 0..=options.max_retries {
        if retry > 0 {
            tracing::info!(retry, max = options.max_retries, title = %book.title, "retrying book");
            tokio::time::sleep(options.retry_delay).await;
        }
        outcome.retries = retry;

        match resolve_and_store(store, resolver, &book.id, &query, options.credential.as_deref())
            .await
        {
            Ok((response, None)) => {
                outcome.success = true;
                outcome.cover_url = response.cover_url;
                outcome.source = response.source;
                outcome.message = response.message;
                break;
            }
            Ok((response, failure)) => {
                outcome.message = response.error.unwrap_or(response.message);
                if failure.is_some_and(|kind| !kind.is_retryable()) {
                    tracing::debug!(title = %book.title, "nothing to find, not retrying");
                    break;
                }
            }
            Err(e) => {
                // Input errors will not go away on retry.
                outcome.message = e.to_string();
                break;
            }
        }
    }

    outcome
}
