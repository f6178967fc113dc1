use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Config;

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub douban: Option<DoubanConfig>,
    pub http: Option<HttpConfig>,
    pub cache: Option<CacheConfig>,
    pub batch: Option<BatchConfig>,
    pub providers: Option<ProvidersConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DoubanConfig {
    pub api_keys: Option<Vec<String>>,
    pub attempts_per_key: Option<u32>,
    pub retry_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpConfig {
    pub timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchConfig {
    pub limit: Option<usize>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub request_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    pub disabled: Option<Vec<String>>,
}

/// Platform config directory path: `<config_dir>/bookcover/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("bookcover").join("config.toml"))
}

/// Load config by cascading CWD `.bookcover.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".bookcover.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => {
            tracing::debug!(path = %path.display(), "loaded config file");
            Some(config)
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unparsable config file");
            None
        }
    }
}

/// `overlay` wins field by field; a section missing from both stays `None`.
fn pick<S, T>(
    base: &Option<S>,
    overlay: &Option<S>,
    field: impl Fn(&S) -> Option<T>,
) -> Option<T> {
    overlay
        .as_ref()
        .and_then(&field)
        .or_else(|| base.as_ref().and_then(&field))
}

/// Merge two configs: `overlay` values take precedence over `base`.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    ConfigFile {
        douban: Some(DoubanConfig {
            api_keys: pick(&base.douban, &overlay.douban, |d| d.api_keys.clone()),
            attempts_per_key: pick(&base.douban, &overlay.douban, |d| d.attempts_per_key),
            retry_delay_ms: pick(&base.douban, &overlay.douban, |d| d.retry_delay_ms),
        }),
        http: Some(HttpConfig {
            timeout_secs: pick(&base.http, &overlay.http, |h| h.timeout_secs),
            user_agent: pick(&base.http, &overlay.http, |h| h.user_agent.clone()),
        }),
        cache: Some(CacheConfig {
            ttl_secs: pick(&base.cache, &overlay.cache, |c| c.ttl_secs),
        }),
        batch: Some(BatchConfig {
            limit: pick(&base.batch, &overlay.batch, |b| b.limit),
            max_retries: pick(&base.batch, &overlay.batch, |b| b.max_retries),
            retry_delay_ms: pick(&base.batch, &overlay.batch, |b| b.retry_delay_ms),
            request_delay_ms: pick(&base.batch, &overlay.batch, |b| b.request_delay_ms),
        }),
        providers: Some(ProvidersConfig {
            disabled: pick(&base.providers, &overlay.providers, |p| p.disabled.clone()),
        }),
    }
}

impl ConfigFile {
    /// Copy every value set in this file onto `config`.
    pub fn apply(&self, config: &mut Config) {
        if let Some(douban) = &self.douban {
            if let Some(keys) = &douban.api_keys {
                config.douban_api_keys = keys.clone();
            }
            if let Some(n) = douban.attempts_per_key {
                config.douban_attempts_per_key = n.max(1);
            }
            if let Some(ms) = douban.retry_delay_ms {
                config.douban_retry_delay_ms = ms;
            }
        }
        if let Some(http) = &self.http {
            if let Some(secs) = http.timeout_secs {
                config.timeout_secs = secs;
            }
            if let Some(ua) = &http.user_agent {
                config.user_agent = ua.clone();
            }
        }
        if let Some(ttl) = self.cache.as_ref().and_then(|c| c.ttl_secs) {
            config.cache_ttl_secs = ttl;
        }
        if let Some(batch) = &self.batch {
            if let Some(limit) = batch.limit.filter(|&l| l > 0) {
                config.batch_limit = limit;
            }
            if let Some(n) = batch.max_retries {
                config.batch_max_retries = n;
            }
            if let Some(ms) = batch.retry_delay_ms {
                config.batch_retry_delay_ms = ms;
            }
            if let Some(ms) = batch.request_delay_ms {
                config.batch_request_delay_ms = ms;
            }
        }
        if let Some(disabled) = self.providers.as_ref().and_then(|p| p.disabled.clone()) {
            config.disabled_providers = disabled;
        }
    }
}
