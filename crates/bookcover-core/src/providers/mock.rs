//! Mock cover provider for testing.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::CoverProvider;
use crate::{CoverResult, FailureKind, Miss, ProviderName};

/// A configurable mock response for [`MockProvider`].
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Simulate a cover being found.
    Cover(String),
    /// Simulate "nothing for this query".
    NotFound(Miss),
    /// Simulate a retryable failure of the given class.
    Fail(FailureKind, String),
}

impl MockResponse {
    fn into_result(self, provider: ProviderName) -> CoverResult {
        match self {
            MockResponse::Cover(url) => CoverResult::success(url),
            MockResponse::NotFound(miss) => super::not_found(provider, miss),
            MockResponse::Fail(kind, reason) => CoverResult::failure(kind, reason),
        }
    }
}

/// A hand-rolled mock implementing [`CoverProvider`].
///
/// Responses are picked per call, first match wins:
/// - a response registered for the exact query with [`respond_to`](MockProvider::respond_to),
/// - the next entry of the sequence (see [`with_sequence`](MockProvider::with_sequence)),
/// - the fallback response.
pub struct MockProvider {
    name: ProviderName,
    by_query: HashMap<String, MockResponse>,
    /// Reversed so the next response is at the end.
    sequence: Mutex<Vec<MockResponse>>,
    fallback: MockResponse,
    delay: Option<Duration>,
    call_count: AtomicUsize,
    queries: Mutex<Vec<String>>,
    credentials: Mutex<Vec<Option<String>>>,
}

impl MockProvider {
    /// Create a mock that always returns `response`.
    pub fn new(name: ProviderName, response: MockResponse) -> Self {
        Self {
            name,
            by_query: HashMap::new(),
            sequence: Mutex::new(Vec::new()),
            fallback: response,
            delay: None,
            call_count: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
            credentials: Mutex::new(Vec::new()),
        }
    }

    /// Mock that always finds `url`.
    pub fn cover(name: ProviderName, url: impl Into<String>) -> Self {
        Self::new(name, MockResponse::Cover(url.into()))
    }

    /// Mock that never finds anything.
    pub fn missing(name: ProviderName) -> Self {
        Self::new(name, MockResponse::NotFound(Miss::NoCover))
    }

    /// Mock that fails every call with `kind`.
    pub fn failing(name: ProviderName, kind: FailureKind, reason: impl Into<String>) -> Self {
        Self::new(name, MockResponse::Fail(kind, reason.into()))
    }

    /// Return `responses` in order, then repeat the last one.
    pub fn with_sequence(name: ProviderName, mut responses: Vec<MockResponse>) -> Self {
        let fallback = responses
            .last()
            .cloned()
            .unwrap_or(MockResponse::NotFound(Miss::NoCover));
        responses.reverse();
        let mock = Self::new(name, fallback);
        *mock.sequence.lock().unwrap_or_else(|e| e.into_inner()) = responses;
        mock
    }

    /// Always answer `query` with `response`, regardless of the sequence.
    pub fn respond_to(mut self, query: impl Into<String>, response: MockResponse) -> Self {
        self.by_query.insert(query.into(), response);
        self
    }

    /// Set simulated network latency per call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// How many times `fetch()` has been called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Every query received, in call order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Every credential received, in call order.
    pub fn credentials(&self) -> Vec<Option<String>> {
        self.credentials
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn next_response(&self, query: &str) -> MockResponse {
        if let Some(resp) = self.by_query.get(query) {
            return resp.clone();
        }
        let mut seq = self.sequence.lock().unwrap_or_else(|e| e.into_inner());
        seq.pop().unwrap_or_else(|| self.fallback.clone())
    }
}

impl CoverProvider for MockProvider {
    fn name(&self) -> ProviderName {
        self.name
    }

    fn fetch<'a>(
        &'a self,
        query: &'a str,
        credential: Option<&'a str>,
        _client: &'a reqwest::Client,
        _timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = CoverResult> + Send + 'a>> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.queries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(query.to_string());
        self.credentials
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(credential.map(str::to_string));
        let response = self.next_response(query);
        let delay = self.delay;

        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            response.into_result(self.name)
        })
    }
}
