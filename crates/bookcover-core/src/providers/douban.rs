//! Douban book search API client.
//!
//! Douban is the only provider with credentials and retries. Each resolution
//! walks the key pool from the rotation cursor; every key gets up to
//! `attempts_per_key` tries with a fixed delay in between. A 429 (or a 401/403
//! on a pool key) gives up on the current key at once and moves to the next.
//! A success moves the cursor past the key that worked.

use super::{CoverProvider, from_extraction};
use crate::extract::extract_cover;
use crate::http::{HttpFailure, get_text};
use crate::key_pool::ApiKeyPool;
use crate::{CoverResult, FailureKind, ProviderName, mask_key};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

pub const DOUBAN_BASE_URL: &str = "https://api.douban.com";

pub struct Douban {
    pub base_url: String,
    keys: ApiKeyPool,
    attempts_per_key: u32,
    retry_delay: Duration,
}

/// Where the keys for this resolution come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeySource {
    /// A single credential passed in by the caller.
    Supplied,
    Pool,
    /// No pool and no credential: one unauthenticated candidate.
    Keyless,
}

#[derive(Debug, Clone, Copy)]
struct Candidate<'a> {
    key: Option<&'a str>,
    /// Index into the pool, set only for pool keys.
    pool_index: Option<usize>,
}

/// Retry loop state. `candidate` indexes the candidate list, `attempt` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryState {
    Attempting { candidate: usize, attempt: u32 },
    RetryingSameKey { candidate: usize, attempt: u32 },
    AdvancingKey { candidate: usize },
    Exhausted,
}

impl Douban {
    pub fn new(keys: ApiKeyPool) -> Self {
        Self {
            base_url: DOUBAN_BASE_URL.to_string(),
            keys,
            attempts_per_key: 2,
            retry_delay: Duration::from_secs(1),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_retry_policy(mut self, attempts_per_key: u32, retry_delay: Duration) -> Self {
        self.attempts_per_key = attempts_per_key.max(1);
        self.retry_delay = retry_delay;
        self
    }

    pub fn key_pool(&self) -> &ApiKeyPool {
        &self.keys
    }

    pub fn search_url(&self, query: &str, key: Option<&str>) -> String {
        let mut url = format!(
            "{}/v2/book/search?q={}&count=5",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(query)
        );
        if let Some(key) = key {
            url.push_str(&format!("&apikey={}", urlencoding::encode(key)));
        }
        url
    }

    fn candidates<'a>(&'a self, credential: Option<&'a str>) -> (KeySource, Vec<Candidate<'a>>) {
        if let Some(key) = credential.map(str::trim).filter(|k| !k.is_empty()) {
            tracing::info!(key = %mask_key(key), "douban: using supplied API key");
            return (
                KeySource::Supplied,
                vec![Candidate {
                    key: Some(key),
                    pool_index: None,
                }],
            );
        }
        if self.keys.is_empty() {
            tracing::info!("douban: no API key available, using the public endpoint");
            return (
                KeySource::Keyless,
                vec![Candidate {
                    key: None,
                    pool_index: None,
                }],
            );
        }
        let rotation = self
            .keys
            .rotation()
            .into_iter()
            .map(|(idx, key)| Candidate {
                key: Some(key),
                pool_index: Some(idx),
            })
            .collect();
        (KeySource::Pool, rotation)
    }

    /// One request. `Ok` is terminal for Douban (a cover, or nothing to find);
    /// `Err` is eligible for retry or key rotation.
    async fn attempt(
        &self,
        query: &str,
        candidate: Candidate<'_>,
        client: &reqwest::Client,
        timeout: Duration,
    ) -> Result<CoverResult, HttpFailure> {
        let url = self.search_url(query, candidate.key);
        let body = get_text(client, &url, &[], timeout).await?;

        match from_extraction(ProviderName::Douban, extract_cover(ProviderName::Douban, &body)) {
            CoverResult::Failure {
                kind: FailureKind::InvalidResponse,
                reason,
            } => Err(HttpFailure {
                kind: FailureKind::InvalidResponse,
                status: None,
                detail: reason,
            }),
            result => Ok(result),
        }
    }

    async fn resolve(
        &self,
        query: &str,
        credential: Option<&str>,
        client: &reqwest::Client,
        timeout: Duration,
    ) -> CoverResult {
        let (source, candidates) = self.candidates(credential);
        let mut last_failure: Option<HttpFailure> = None;
        let mut state = RetryState::Attempting {
            candidate: 0,
            attempt: 1,
        };

        loop {
            state = match state {
                RetryState::Attempting { candidate, attempt } => {
                    let cand = candidates[candidate];
                    tracing::debug!(
                        key = %cand.key.map(mask_key).unwrap_or_else(|| "<none>".into()),
                        key_number = candidate + 1,
                        keys = candidates.len(),
                        attempt,
                        max_attempts = self.attempts_per_key,
                        "douban: sending search request"
                    );

                    match self.attempt(query, cand, client, timeout).await {
                        Ok(result) => {
                            if result.is_success()
                                && let Some(idx) = cand.pool_index
                            {
                                self.keys.mark_success(idx);
                            }
                            return result;
                        }
                        Err(failure) => {
                            tracing::warn!(attempt, error = %failure, "douban: request failed");
                            let rotate = failure.kind == FailureKind::RateLimited
                                || (failure.kind == FailureKind::Auth && cand.pool_index.is_some());
                            let is_last_key = candidate + 1 == candidates.len();
                            last_failure = Some(failure);

                            if rotate && !is_last_key {
                                RetryState::AdvancingKey { candidate }
                            } else if attempt < self.attempts_per_key {
                                RetryState::RetryingSameKey { candidate, attempt }
                            } else if !is_last_key {
                                RetryState::AdvancingKey { candidate }
                            } else {
                                RetryState::Exhausted
                            }
                        }
                    }
                }
                RetryState::RetryingSameKey { candidate, attempt } => {
                    tracing::debug!(delay_ms = self.retry_delay.as_millis() as u64, "douban: retrying");
                    tokio::time::sleep(self.retry_delay).await;
                    RetryState::Attempting {
                        candidate,
                        attempt: attempt + 1,
                    }
                }
                RetryState::AdvancingKey { candidate } => {
                    tracing::warn!(
                        key_number = candidate + 1,
                        "douban: giving up on this API key, trying the next one"
                    );
                    RetryState::Attempting {
                        candidate: candidate + 1,
                        attempt: 1,
                    }
                }
                RetryState::Exhausted => {
                    let failure = last_failure.unwrap_or_else(|| HttpFailure {
                        kind: FailureKind::Transport,
                        status: None,
                        detail: "no request was made".into(),
                    });
                    let reason = exhausted_reason(&failure, source, candidates.len());
                    return CoverResult::failure(failure.kind, reason);
                }
            };
        }
    }
}

/// Final message once every key and attempt has failed.
fn exhausted_reason(failure: &HttpFailure, source: KeySource, key_count: usize) -> String {
    match failure.kind {
        FailureKind::Auth => {
            let detail = match source {
                KeySource::Keyless => "no API key supplied",
                KeySource::Supplied => "the supplied API key may be invalid",
                KeySource::Pool if key_count == 1 => "the configured API key may be invalid",
                KeySource::Pool => "all API keys were rejected",
            };
            format!("douban rejected the request ({detail})")
        }
        FailureKind::RateLimited => {
            "douban rate limited the request on every API key, retry later".to_string()
        }
        FailureKind::ServerError => "douban server error, retry later".to_string(),
        FailureKind::Timeout => "douban request timed out, check the network".to_string(),
        _ => format!("douban request failed: {failure}"),
    }
}

impl CoverProvider for Douban {
    fn name(&self) -> ProviderName {
        ProviderName::Douban
    }

    fn fetch<'a>(
        &'a self,
        query: &'a str,
        credential: Option<&'a str>,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = CoverResult> + Send + 'a>> {
        Box::pin(self.resolve(query, credential, client, timeout))
    }
}
