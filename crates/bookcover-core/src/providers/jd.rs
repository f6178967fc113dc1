use super::{CoverProvider, fetch_once};
use crate::{CoverResult, ProviderName};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

pub const JD_BASE_URL: &str = "https://search.jd.com";

/// JD search page scraper.
pub struct Jd {
    pub base_url: String,
}

impl Default for Jd {
    fn default() -> Self {
        Self {
            base_url: JD_BASE_URL.to_string(),
        }
    }
}

impl Jd {
    pub fn search_url(&self, query: &str) -> String {
        format!(
            "{}/Search?keyword={}&enc=utf-8",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(query)
        )
    }
}

impl CoverProvider for Jd {
    fn name(&self) -> ProviderName {
        ProviderName::Jd
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
            fetch_once(
                ProviderName::Jd,
                &url,
                &[
                    (
                        "Accept",
                        "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
                    ),
                    ("Accept-Language", "zh-CN,zh;q=0.9,en;q=0.8"),
                    ("Referer", "https://www.jd.com/"),
                ],
                client,
                timeout,
            )
            .await
        })
    }
}
