use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::CoverCache;
use crate::key_pool::ApiKeyPool;
use crate::providers::CoverProvider;
use crate::providers::dangdang::Dangdang;
use crate::providers::douban::Douban;
use crate::providers::jd::Jd;
use crate::providers::openlibrary::OpenLibrary;
use crate::{
    BookQuery, Config, CoreError, CoverResult, FailureKind, Miss, ProviderName,
    build_http_client,
};

/// Where a successful cover came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverSource {
    /// Fetched from this provider during the current call.
    Provider(ProviderName),
    /// Served from the cache; carries the provider that originally found it.
    Cached(ProviderName),
}

impl CoverSource {
    /// The provider that actually found the cover.
    pub fn provider(&self) -> ProviderName {
        match self {
            CoverSource::Provider(p) | CoverSource::Cached(p) => *p,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, CoverSource::Cached(_))
    }
}

impl fmt::Display for CoverSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoverSource::Provider(p) => write!(f, "{p}"),
            CoverSource::Cached(p) => write!(f, "cached-{p}"),
        }
    }
}

/// One provider call made while resolving a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderAttempt {
    pub provider: ProviderName,
    /// `None` on success.
    pub failure: Option<FailureKind>,
    pub elapsed: Duration,
}

/// Final outcome of [`CoverResolver::resolve_cover`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub result: CoverResult,
    /// Set only on success.
    pub source: Option<CoverSource>,
    /// Provider calls in the order they were made; empty on a cache hit.
    pub attempts: Vec<ProviderAttempt>,
}

impl Resolution {
    pub fn is_success(&self) -> bool {
        self.result.is_success()
    }
}

/// Tries cover providers in a fixed order, backed by a TTL cache.
pub struct CoverResolver {
    providers: Vec<Arc<dyn CoverProvider>>,
    cache: Arc<CoverCache>,
    client: reqwest::Client,
    timeout: Duration,
}

impl CoverResolver {
    /// Build the enabled providers, the shared HTTP client and a fresh cache.
    pub fn new(config: &Config) -> Result<Self, CoreError> {
        let client = build_http_client(config)?;
        let cache = Arc::new(CoverCache::new(Duration::from_secs(config.cache_ttl_secs)));
        Ok(Self {
            providers: build_provider_list(config),
            cache,
            client,
            timeout: config.timeout(),
        })
    }

    /// Resolver over an explicit provider list, in the given order.
    pub fn with_providers(providers: Vec<Arc<dyn CoverProvider>>, cache: Arc<CoverCache>) -> Self {
        Self {
            providers,
            cache,
            client: reqwest::Client::new(),
            timeout: Config::default().timeout(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client, timeout: Duration) -> Self {
        self.client = client;
        self.timeout = timeout;
        self
    }

    pub fn cache(&self) -> &Arc<CoverCache> {
        &self.cache
    }

    /// Names of the active providers in trial order.
    pub fn provider_names(&self) -> Vec<ProviderName> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Resolve a cover for `query`.
    ///
    /// Only a blank title is an error. A cached success is returned without
    /// any provider call; a cached failure is ignored. Otherwise providers are
    /// tried in order until one succeeds, and the final outcome is cached.
    pub async fn resolve_cover(
        &self,
        query: &BookQuery,
        credential: Option<&str>,
    ) -> Result<Resolution, CoreError> {
        query.validate()?;
        let normalized = query.normalized();

        if let Some(hit) = self.cache.get(&normalized) {
            match (&hit.result, hit.source) {
                (CoverResult::Success { cover_url }, Some(source)) => {
                    tracing::info!(
                        query = %normalized,
                        source = %source,
                        cover_url = %cover_url,
                        "cover served from cache"
                    );
                    return Ok(Resolution {
                        result: hit.result,
                        source: Some(CoverSource::Cached(source)),
                        attempts: Vec::new(),
                    });
                }
                _ => {
                    tracing::debug!(query = %normalized, "cached failure, querying providers again");
                }
            }
        }

        let mut attempts = Vec::with_capacity(self.providers.len());
        let mut outcome: Option<(CoverResult, ProviderName)> = None;

        for provider in &self.providers {
            let name = provider.name();
            let start = Instant::now();
            let result = provider
                .fetch(&normalized, credential, &self.client, self.timeout)
                .await;
            attempts.push(ProviderAttempt {
                provider: name,
                failure: result.failure_kind(),
                elapsed: start.elapsed(),
            });

            let done = result.is_success();
            if let Some(reason) = result.reason() {
                tracing::info!(provider = %name, query = %normalized, reason = %reason, "provider found no cover");
            }
            outcome = Some((result, name));
            if done {
                break;
            }
        }

        let (result, source) = match outcome {
            Some((result, name)) if result.is_success() => (result, Some(name)),
            Some((result, _)) => (result, None),
            None => (
                CoverResult::failure(
                    FailureKind::NotFound(Miss::NoCover),
                    "no cover providers enabled",
                ),
                None,
            ),
        };

        self.cache.put(&normalized, result.clone(), source);

        match (&result, source) {
            (CoverResult::Success { cover_url }, Some(name)) => {
                tracing::info!(query = %normalized, source = %name, cover_url = %cover_url, "cover resolved");
            }
            _ => {
                tracing::warn!(
                    query = %normalized,
                    reason = result.reason().unwrap_or_default(),
                    "all providers failed"
                );
            }
        }

        Ok(Resolution {
            result,
            source: source.map(CoverSource::Provider),
            attempts,
        })
    }
}

impl fmt::Debug for CoverResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoverResolver")
            .field("providers", &self.provider_names())
            .field("cache", &self.cache)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Enabled providers in the fixed trial order.
fn build_provider_list(config: &Config) -> Vec<Arc<dyn CoverProvider>> {
    let mut providers: Vec<Arc<dyn CoverProvider>> = Vec::new();

    for name in ProviderName::ALL {
        if !config.is_enabled(name) {
            tracing::debug!(provider = %name, "provider disabled");
            continue;
        }
        match name {
            ProviderName::Douban => {
                let pool = ApiKeyPool::with_cursor(
                    config.douban_api_keys.clone(),
                    config.douban_key_cursor,
                );
                providers.push(Arc::new(Douban::new(pool).with_retry_policy(
                    config.douban_attempts_per_key,
                    Duration::from_millis(config.douban_retry_delay_ms),
                )));
            }
            ProviderName::Dangdang => providers.push(Arc::new(Dangdang::default())),
            ProviderName::Jd => providers.push(Arc::new(Jd::default())),
            ProviderName::OpenLibrary => providers.push(Arc::new(OpenLibrary::default())),
        }
    }

    providers
}
