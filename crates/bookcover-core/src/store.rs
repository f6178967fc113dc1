//! Book documents and the store that holds them.
//!
//! The resolver never touches storage directly; the batch driver and the
//! single-book update read and write through [`BookStore`].

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ProviderName;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid book data: {0}")]
    Json(#[from] serde_json::Error),
    #[error("book not found: {0}")]
    NotFound(String),
}

/// One book document. Fields this crate does not know about are kept as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<u64>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_source: Option<String>,
    /// Seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purchased: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<bool>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Book {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            serial: None,
            title: title.into(),
            author: None,
            cover: None,
            cover_source: None,
            update_time: None,
            grade_level: None,
            purchased: None,
            read: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// True when the cover field is present and not blank.
    pub fn has_cover(&self) -> bool {
        self.cover.as_deref().is_some_and(|c| !c.trim().is_empty())
    }

    fn set_cover(&mut self, url: &str, source: ProviderName) {
        self.cover = Some(url.to_string());
        self.cover_source = Some(source.to_string());
        self.update_time = Some(now_epoch());
    }
}

fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Storage the cover pipeline reads books from and writes covers to.
pub trait BookStore: Send + Sync {
    /// Up to `limit` books without a cover, after skipping `skip` of them,
    /// in a stable order.
    fn books_missing_cover<'a>(
        &'a self,
        skip: usize,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Book>, StoreError>> + Send + 'a>>;

    /// Persist a resolved cover and its provenance on book `id`.
    fn update_cover<'a>(
        &'a self,
        id: &'a str,
        cover_url: &'a str,
        source: ProviderName,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>>;

    fn get<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Book>, StoreError>> + Send + 'a>>;
}

fn page_missing_cover(books: &[Book], skip: usize, limit: usize) -> Vec<Book> {
    books
        .iter()
        .filter(|b| !b.has_cover())
        .skip(skip)
        .take(limit)
        .cloned()
        .collect()
}

fn apply_cover(
    books: &mut [Book],
    id: &str,
    cover_url: &str,
    source: ProviderName,
) -> Result<(), StoreError> {
    let book = books
        .iter_mut()
        .find(|b| b.id == id)
        .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
    book.set_cover(cover_url, source);
    Ok(())
}

/// Store backed by a `Vec` in memory.
#[derive(Debug, Default)]
pub struct MemoryBookStore {
    books: Mutex<Vec<Book>>,
}

impl MemoryBookStore {
    pub fn new(books: Vec<Book>) -> Self {
        Self {
            books: Mutex::new(books),
        }
    }

    /// Snapshot of every book.
    pub fn books(&self) -> Vec<Book> {
        self.books.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl BookStore for MemoryBookStore {
    fn books_missing_cover<'a>(
        &'a self,
        skip: usize,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Book>, StoreError>> + Send + 'a>> {
        let page = page_missing_cover(
            &self.books.lock().unwrap_or_else(|e| e.into_inner()),
            skip,
            limit,
        );
        Box::pin(async move { Ok(page) })
    }

    fn update_cover<'a>(
        &'a self,
        id: &'a str,
        cover_url: &'a str,
        source: ProviderName,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        let result = apply_cover(
            &mut self.books.lock().unwrap_or_else(|e| e.into_inner()),
            id,
            cover_url,
            source,
        );
        Box::pin(async move { result })
    }

    fn get<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Book>, StoreError>> + Send + 'a>> {
        let book = self
            .books
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|b| b.id == id)
            .cloned();
        Box::pin(async move { Ok(book) })
    }
}

/// Store backed by a JSON array of books on disk.
///
/// The whole file is loaded on open and rewritten after every update, via a
/// temporary file renamed over the original.
#[derive(Debug)]
pub struct JsonBookStore {
    path: PathBuf,
    books: Mutex<Vec<Book>>,
    /// Serializes snapshot and rename of the file.
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonBookStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let data = std::fs::read_to_string(&path)?;
        let books: Vec<Book> = serde_json::from_str(&data)?;
        tracing::debug!(path = %path.display(), books = books.len(), "opened book store");
        Ok(Self {
            path,
            books: Mutex::new(books),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of every book.
    pub fn books(&self) -> Vec<Book> {
        self.books.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Write the current in-memory state. The snapshot is taken under the
    /// write lock, so the last rename always carries every applied update.
    async fn persist(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let json = serde_json::to_string_pretty(&self.books())?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

impl BookStore for JsonBookStore {
    fn books_missing_cover<'a>(
        &'a self,
        skip: usize,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Book>, StoreError>> + Send + 'a>> {
        let page = page_missing_cover(
            &self.books.lock().unwrap_or_else(|e| e.into_inner()),
            skip,
            limit,
        );
        Box::pin(async move { Ok(page) })
    }

    fn update_cover<'a>(
        &'a self,
        id: &'a str,
        cover_url: &'a str,
        source: ProviderName,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        let applied = apply_cover(
            &mut self.books.lock().unwrap_or_else(|e| e.into_inner()),
            id,
            cover_url,
            source,
        );
        Box::pin(async move {
            applied?;
            self.persist().await?;
            tracing::debug!(id = %id, path = %self.path.display(), "cover written to store");
            Ok(())
        })
    }

    fn get<'a>(
        &'a self,
        id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Book>, StoreError>> + Send + 'a>> {
        let book = self
            .books
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|b| b.id == id)
            .cloned();
        Box::pin(async move { Ok(book) })
    }
}
