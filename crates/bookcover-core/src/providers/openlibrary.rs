use super::{CoverProvider, fetch_once};
use crate::{CoverResult, ProviderName};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

pub const OPENLIBRARY_BASE_URL: &str = "https://openlibrary.org";

/// Open Library search API. Covers are served from `covers.openlibrary.org`.
pub struct OpenLibrary {
    pub base_url: String,
}

impl Default for OpenLibrary {
    fn default() -> Self {
        Self {
            base_url: OPENLIBRARY_BASE_URL.to_string(),
        }
    }
}

impl OpenLibrary {
    pub fn search_url(&self, query: &str) -> String {
        format!(
            "{}/search.json?q={}&limit=5",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(query)
        )
    }
}

impl CoverProvider for OpenLibrary {
    fn name(&self) -> ProviderName {
        ProviderName::OpenLibrary
    }

    fn fetch<'a>(
        &'a self,
        query: &'a str,
        _credential: Option<&'a str>,
        client: &'a reqwest::Client,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = CoverResult> + Send + 'a>> {
        Box::pin(async move {
            let url = self.search_url(query);
            fetch_once(ProviderName::OpenLibrary, &url, &[], client, timeout).await
        })
    }
}
