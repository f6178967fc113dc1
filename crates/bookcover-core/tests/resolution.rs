//! End-to-end tests through the public API.
//!
//! Every provider client points at one local mockito server, so the real
//! request building, status handling and extraction paths run without
//! touching the network.

use std::sync::Arc;
use std::time::Duration;

use bookcover_core::orchestrator::CoverSource;
use bookcover_core::providers::CoverProvider;
use bookcover_core::providers::dangdang::Dangdang;
use bookcover_core::providers::douban::Douban;
use bookcover_core::providers::jd::Jd;
use bookcover_core::providers::openlibrary::OpenLibrary;
use bookcover_core::{
    ApiKeyPool, BatchCursor, BatchOptions, Book, BookQuery, CoverCache, CoverRequest,
    CoverResolver, FailureKind, MemoryBookStore, ProviderName, run_batch, update_book_cover,
};
use mockito::{Matcher, Server, ServerGuard};

fn providers(server: &ServerGuard, keys: Vec<String>) -> Vec<Arc<dyn CoverProvider>> {
    vec![
        Arc::new(
            Douban::new(ApiKeyPool::new(keys))
                .with_base_url(server.url())
                .with_retry_policy(2, Duration::from_millis(5)),
        ),
        Arc::new(Dangdang {
            base_url: server.url(),
        }),
        Arc::new(Jd {
            base_url: server.url(),
        }),
        Arc::new(OpenLibrary {
            base_url: server.url(),
        }),
    ]
}

fn resolver(server: &ServerGuard, cache: Arc<CoverCache>) -> CoverResolver {
    CoverResolver::with_providers(providers(server, Vec::new()), cache)
        .with_client(reqwest::Client::new(), Duration::from_secs(5))
}

#[tokio::test]
async fn douban_hit_end_to_end() {
    let mut server = Server::new_async().await;
    let douban = server
        .mock("GET", "/v2/book/search")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("q".into(), "窗边的小豆豆 黑柳彻子".into()),
            Matcher::UrlEncoded("count".into(), "5".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"books":[{"images":{"large":"http://img3.douban.com/x.jpg"}}]}"#)
        .expect(1)
        .create_async()
        .await;
    let dangdang = server
        .mock("GET", "/")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let cache = Arc::new(CoverCache::default());
    let resolver = resolver(&server, cache.clone());
    let query = BookQuery::new("窗边的小豆豆", Some("黑柳彻子"));

    let res = resolver.resolve_cover(&query, None).await.unwrap();
    assert_eq!(res.result.cover_url(), Some("http://img3.douban.com/x.jpg"));
    assert_eq!(res.source, Some(CoverSource::Provider(ProviderName::Douban)));

    // second lookup is answered by the cache
    let again = resolver.resolve_cover(&query, None).await.unwrap();
    assert_eq!(again.source.map(|s| s.to_string()).as_deref(), Some("cached-douban"));
    assert_eq!(cache.hits(), 1);

    douban.assert_async().await;
    dangdang.assert_async().await;
}

#[tokio::test]
async fn falls_through_to_dangdang() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/v2/book/search")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"count":0,"books":[]}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/")
        .match_query(Matcher::UrlEncoded("act".into(), "input".into()))
        .with_status(200)
        .with_body(
            r#"<ul><li class="line1"><a><img data-original="//img3m7.ddimg.cn/12/5/23.jpg" alt="夏洛的网"></a></li></ul>"#,
        )
        .create_async()
        .await;

    let resolver = resolver(&server, Arc::default());
    let res = resolver
        .resolve_cover(&BookQuery::new("夏洛的网", None::<String>), None)
        .await
        .unwrap();

    assert_eq!(res.result.cover_url(), Some("http://img3m7.ddimg.cn/12/5/23.jpg"));
    assert_eq!(res.source, Some(CoverSource::Provider(ProviderName::Dangdang)));
    assert_eq!(
        res.attempts[0].failure,
        Some(FailureKind::NotFound(bookcover_core::Miss::NoBook))
    );
}

#[tokio::test]
async fn every_provider_failing() {
    let mut server = Server::new_async().await;
    let douban = server
        .mock("GET", "/v2/book/search")
        .match_query(Matcher::Any)
        .with_status(500)
        .expect(2)
        .create_async()
        .await;
    server
        .mock("GET", "/")
        .match_query(Matcher::Any)
        .with_status(503)
        .create_async()
        .await;
    server
        .mock("GET", "/Search")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("<html><body><p>no results</p></body></html>")
        .create_async()
        .await;
    server
        .mock("GET", "/search.json")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"numFound":0,"docs":[]}"#)
        .create_async()
        .await;

    let cache = Arc::new(CoverCache::default());
    let resolver = resolver(&server, cache.clone());

    let res = resolver
        .resolve_cover(&BookQuery::new("不存在的书", None::<String>), None)
        .await
        .unwrap();

    assert!(!res.is_success());
    assert_eq!(res.result.reason(), Some("openlibrary: no book found"));
    let kinds: Vec<_> = res.attempts.iter().map(|a| a.failure).collect();
    assert_eq!(
        kinds,
        vec![
            Some(FailureKind::ServerError),
            Some(FailureKind::ServerError),
            Some(FailureKind::NotFound(bookcover_core::Miss::NoCover)),
            Some(FailureKind::NotFound(bookcover_core::Miss::NoBook)),
        ]
    );

    let cached = cache.get("不存在的书").unwrap();
    assert_eq!(cached.result, res.result);
    douban.assert_async().await;
}

#[tokio::test]
async fn supplied_credential_reaches_douban() {
    let mut server = Server::new_async().await;
    let m = server
        .mock("GET", "/v2/book/search")
        .match_query(Matcher::UrlEncoded("apikey".into(), "my-own-key".into()))
        .with_status(200)
        .with_body(r#"{"books":[{"image":"https://img1.doubanio.com/s.jpg"}]}"#)
        .expect(1)
        .create_async()
        .await;

    let resolver = CoverResolver::with_providers(
        providers(&server, vec!["pool-key-1".into(), "pool-key-2".into()]),
        Arc::default(),
    );
    let store = MemoryBookStore::new(vec![Book::new("b1", "小王子")]);
    let request = CoverRequest {
        book_id: "b1".into(),
        title: "小王子".into(),
        author: None,
        credential: Some("my-own-key".into()),
    };

    let resp = update_book_cover(&store, &resolver, &request).await.unwrap();
    assert!(resp.success);
    assert_eq!(resp.cover_url.as_deref(), Some("https://img1.doubanio.com/s.jpg"));
    assert_eq!(store.books()[0].cover_source.as_deref(), Some("douban"));
    m.assert_async().await;
}

#[tokio::test]
async fn batch_over_store_follows_cursor() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/v2/book/search")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"{"books":[{"images":{"large":"http://img3.douban.com/any.jpg"}}]}"#)
        .create_async()
        .await;

    let store = MemoryBookStore::new(
        ["小王子", "夏洛的网", "《时代广场的蟋蟀》"]
            .iter()
            .enumerate()
            .map(|(i, t)| Book::new(format!("b{i}"), *t))
            .collect(),
    );
    let resolver = resolver(&server, Arc::default());
    let options = BatchOptions {
        retry_delay: Duration::ZERO,
        request_delay: Duration::ZERO,
        ..BatchOptions::default()
    };

    let first = run_batch(&store, &resolver, BatchCursor::new(0, 2).unwrap(), &options)
        .await
        .unwrap();
    assert_eq!(first.updated, 2);
    assert!(first.has_more);

    // updated books drop out of the listing, so skip 0 picks up the rest
    let second = run_batch(&store, &resolver, BatchCursor::new(0, 2).unwrap(), &options)
        .await
        .unwrap();
    assert_eq!(second.processed, 1);
    assert!(!second.has_more);

    assert!(store.books().iter().all(|b| b.has_cover()));
}
