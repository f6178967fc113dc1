use super::{CoverProvider, fetch_once};
use crate::{CoverResult, ProviderName};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

pub const DANGDANG_BASE_URL: &str = "http://search.dangdang.com";

/// Dangdang search page scraper.
pub struct Dangdang {
    pub base_url: String,
}

impl Default for Dangdang {
    fn default() -> Self {
        Self {
            base_url: DANGDANG_BASE_URL.to_string(),
        }
    }
}

impl Dangdang {
    pub fn search_url(&self, query: &str) -> String {
        format!(
            "{}/?key={}&act=input",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(query)
        )
    }
}

impl CoverProvider for Dangdang {
    fn name(&self) -> ProviderName {
        ProviderName::Dangdang
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
                ProviderName::Dangdang,
                &url,
                &[
                    (
                        "Accept",
                        "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
                    ),
                    ("Accept-Language", "zh-CN,zh;q=0.9,en;q=0.8"),
                ],
                client,
                timeout,
            )
            .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FailureKind, Miss};

    #[test]
    fn search_url_encodes_query() {
        let dd = Dangdang::default();
        assert_eq!(
            dd.search_url("夏洛的网 E.B.怀特"),
            "http://search.dangdang.com/?key=%E5%A4%8F%E6%B4%9B%E7%9A%84%E7%BD%91%20E.B.%E6%80%80%E7%89%B9&act=input"
        );
    }

    #[tokio::test]
    async fn scrapes_cover_from_search_page() {
        let mut server = mockito::Server::new_async().await;
        let page = server
            .mock("GET", "/")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("key".into(), "夏洛的网".into()),
                mockito::Matcher::UrlEncoded("act".into(), "input".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "text/html; charset=utf-8")
            .with_body(r#"<ul><li class="line1"><a><img data-original="//img3m1.ddimg.cn/1/2/25_b.jpg" alt="夏洛的网"></a></li></ul>"#)
            .expect(1)
            .create_async()
            .await;

        let dd = Dangdang {
            base_url: server.url(),
        };
        let client = reqwest::Client::new();
        let result = dd
            .fetch("夏洛的网", None, &client, Duration::from_secs(5))
            .await;

        assert_eq!(result.cover_url(), Some("http://img3m1.ddimg.cn/1/2/25.jpg"));
        page.assert_async().await;
    }

    #[tokio::test]
    async fn page_without_images_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body("<html><body>抱歉，没有找到</body></html>")
            .create_async()
            .await;

        let dd = Dangdang {
            base_url: server.url(),
        };
        let result = dd
            .fetch("不存在的书", None, &reqwest::Client::new(), Duration::from_secs(5))
            .await;

        assert_eq!(result.failure_kind(), Some(FailureKind::NotFound(Miss::NoCover)));
        assert_eq!(result.reason(), Some("dangdang: no cover found"));
    }

    #[tokio::test]
    async fn http_error_is_failure_with_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/")
            .match_query(mockito::Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let dd = Dangdang {
            base_url: server.url(),
        };
        let result = dd
            .fetch("夏洛的网", None, &reqwest::Client::new(), Duration::from_secs(5))
            .await;

        assert_eq!(result.failure_kind(), Some(FailureKind::ServerError));
        assert!(
            result
                .reason()
                .unwrap()
                .starts_with("dangdang request failed: HTTP 503")
        );
    }
}
