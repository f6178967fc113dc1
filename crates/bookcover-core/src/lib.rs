use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod batch;
pub mod cache;
pub mod config_file;
pub mod extract;
pub mod http;
pub mod key_pool;
pub mod orchestrator;
pub mod providers;
pub mod store;
pub mod update;

// Re-export for convenience
pub use batch::{BatchCursor, BatchOptions, BatchSummary, BookOutcome, run_batch};
pub use cache::{CachedCover, CoverCache, DEFAULT_TTL};
pub use key_pool::ApiKeyPool;
pub use orchestrator::{CoverResolver, CoverSource, ProviderAttempt, Resolution};
pub use store::{Book, BookStore, JsonBookStore, MemoryBookStore, StoreError};
pub use update::{CoverRequest, CoverResponse, update_book_cover};

/// Browser-like User-Agent sent with every outbound request.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// A third-party source queried for cover images.
///
/// The declaration order is the fixed trial order used by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderName {
    Douban,
    Dangdang,
    Jd,
    OpenLibrary,
}

impl ProviderName {
    /// All providers in trial order.
    pub const ALL: [ProviderName; 4] = [
        ProviderName::Douban,
        ProviderName::Dangdang,
        ProviderName::Jd,
        ProviderName::OpenLibrary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::Douban => "douban",
            ProviderName::Dangdang => "dangdang",
            ProviderName::Jd => "jd",
            ProviderName::OpenLibrary => "openlibrary",
        }
    }
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        ProviderName::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoreError::Config(format!("unknown provider: {s}")))
    }
}

/// A book to resolve a cover for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookQuery {
    pub title: String,
    pub author: Option<String>,
}

impl BookQuery {
    pub fn new(title: impl Into<String>, author: Option<impl Into<String>>) -> Self {
        Self {
            title: title.into(),
            author: author.map(Into::into),
        }
    }

    /// Trimmed "title author" string. Used both as the cache key and as the
    /// literal search term sent to every provider.
    pub fn normalized(&self) -> String {
        format!("{} {}", self.title, self.author.as_deref().unwrap_or(""))
            .trim()
            .to_string()
    }

    /// Fails with [`CoreError::MissingTitle`] if the title is blank.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.title.trim().is_empty() {
            return Err(CoreError::MissingTitle);
        }
        Ok(())
    }
}

/// Why a provider answered but produced no usable image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Miss {
    /// The search returned no books at all.
    NoBook,
    /// A book (or page) came back, but without an image.
    NoCover,
}

impl Miss {
    pub fn reason(&self) -> &'static str {
        match self {
            Miss::NoBook => "no book found",
            Miss::NoCover => "book found but no cover",
        }
    }
}

/// Failure classes a provider can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Connection refused, DNS failure, body read error.
    Transport,
    /// The request exceeded its timeout.
    Timeout,
    /// HTTP 429.
    RateLimited,
    /// HTTP 401 or 403.
    Auth,
    /// HTTP 5xx.
    ServerError,
    /// Any other non-success HTTP status.
    Http,
    /// HTTP success but the body could not be parsed.
    InvalidResponse,
    /// The provider answered but has nothing for this query.
    NotFound(Miss),
}

impl FailureKind {
    /// `NotFound` is terminal: asking again will not make the book appear.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureKind::NotFound(_))
    }
}

/// Outcome of one cover lookup. A success always carries a URL with a scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoverResult {
    Success { cover_url: String },
    Failure { kind: FailureKind, reason: String },
}

impl CoverResult {
    /// Build a success, or a `NotFound(NoCover)` failure if `url` is not a
    /// usable absolute URL.
    pub fn success(url: impl Into<String>) -> Self {
        let cover_url = url.into();
        if extract::is_cover_url(&cover_url) {
            CoverResult::Success { cover_url }
        } else {
            CoverResult::not_found(Miss::NoCover)
        }
    }

    pub fn failure(kind: FailureKind, reason: impl Into<String>) -> Self {
        CoverResult::Failure {
            kind,
            reason: reason.into(),
        }
    }

    pub fn not_found(miss: Miss) -> Self {
        CoverResult::failure(FailureKind::NotFound(miss), miss.reason())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CoverResult::Success { .. })
    }

    pub fn cover_url(&self) -> Option<&str> {
        match self {
            CoverResult::Success { cover_url } => Some(cover_url),
            CoverResult::Failure { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            CoverResult::Success { .. } => None,
            CoverResult::Failure { reason, .. } => Some(reason),
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            CoverResult::Success { .. } => None,
            CoverResult::Failure { kind, .. } => Some(*kind),
        }
    }
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("missing required parameter: title")]
    MissingTitle,
    #[error("missing required parameter: bookId")]
    MissingBookId,
    #[error("batch limit must be greater than zero")]
    InvalidLimit,
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("book store error: {0}")]
    Store(#[from] StoreError),
    #[error("configuration error: {0}")]
    Config(String),
}

/// Runtime configuration for resolution and batch runs.
#[derive(Clone)]
pub struct Config {
    /// Douban credential pool, tried in rotation.
    pub douban_api_keys: Vec<String>,
    /// Starting position of the Douban rotation cursor.
    pub douban_key_cursor: usize,
    pub douban_attempts_per_key: u32,
    pub douban_retry_delay_ms: u64,
    pub timeout_secs: u64,
    pub user_agent: String,
    pub cache_ttl_secs: u64,
    /// Providers to skip, by name (case-insensitive).
    pub disabled_providers: Vec<String>,
    pub batch_limit: usize,
    /// Outer retries per book, on top of the provider-level retries.
    pub batch_max_retries: u32,
    pub batch_retry_delay_ms: u64,
    /// Pause between two books of a batch.
    pub batch_request_delay_ms: u64,
}

impl Config {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn is_enabled(&self, provider: ProviderName) -> bool {
        !self
            .disabled_providers
            .iter()
            .any(|d| d.trim().eq_ignore_ascii_case(provider.as_str()))
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field(
                "douban_api_keys",
                &self
                    .douban_api_keys
                    .iter()
                    .map(|k| mask_key(k))
                    .collect::<Vec<_>>(),
            )
            .field("douban_key_cursor", &self.douban_key_cursor)
            .field("douban_attempts_per_key", &self.douban_attempts_per_key)
            .field("douban_retry_delay_ms", &self.douban_retry_delay_ms)
            .field("timeout_secs", &self.timeout_secs)
            .field("user_agent", &self.user_agent)
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .field("disabled_providers", &self.disabled_providers)
            .field("batch_limit", &self.batch_limit)
            .field("batch_max_retries", &self.batch_max_retries)
            .field("batch_retry_delay_ms", &self.batch_retry_delay_ms)
            .field("batch_request_delay_ms", &self.batch_request_delay_ms)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            douban_api_keys: vec![],
            douban_key_cursor: 0,
            douban_attempts_per_key: 2,
            douban_retry_delay_ms: 1000,
            timeout_secs: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            cache_ttl_secs: DEFAULT_TTL.as_secs(),
            disabled_providers: vec![],
            batch_limit: 5,
            batch_max_retries: 2,
            batch_retry_delay_ms: 2000,
            batch_request_delay_ms: 1000,
        }
    }
}

/// Show only the first 8 characters of a credential.
pub fn mask_key(key: &str) -> String {
    let prefix: String = key.chars().take(8).collect();
    format!("{prefix}...")
}

/// Build the shared HTTP client: browser User-Agent, at most 5 redirects.
pub fn build_http_client(config: &Config) -> Result<reqwest::Client, CoreError> {
    let client = reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(config.timeout())
        .build()?;
    Ok(client)
}
