//! JSON report files for a batch run.
//!
//! `--report <path>` writes every book outcome to `<path>`, and the failures
//! alone to `failed-covers.json` in the same directory.

use std::path::{Path, PathBuf};

use bookcover_core::BookOutcome;
use serde::Serialize;

pub const FAILED_FILE: &str = "failed-covers.json";

#[derive(Debug, Serialize)]
pub struct Report<'a> {
    pub timestamp: String,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub books: Vec<ReportBook<'a>>,
}

#[derive(Debug, Serialize)]
pub struct ReportBook<'a> {
    pub serial: Option<u64>,
    pub title: &'a str,
    pub author: &'a str,
    pub cover: &'a str,
    pub source: &'a str,
    pub success: bool,
    pub error: &'a str,
    pub message: &'a str,
}

#[derive(Debug, Serialize)]
pub struct FailedBook<'a> {
    pub serial: Option<u64>,
    pub title: &'a str,
    pub author: &'a str,
    pub error: &'a str,
}

pub fn build_report(books: &[BookOutcome]) -> Report<'_> {
    let successful = books.iter().filter(|b| b.success).count();
    Report {
        timestamp: chrono::Utc::now().to_rfc3339(),
        total: books.len(),
        successful,
        failed: books.len() - successful,
        books: books
            .iter()
            .map(|b| ReportBook {
                serial: b.serial,
                title: &b.title,
                author: b.author.as_deref().unwrap_or_default(),
                cover: b.cover_url.as_deref().unwrap_or_default(),
                source: b.source.as_deref().unwrap_or_default(),
                success: b.success,
                error: if b.success { "" } else { &b.message },
                message: &b.message,
            })
            .collect(),
    }
}

fn failed_books(books: &[BookOutcome]) -> Vec<FailedBook<'_>> {
    books
        .iter()
        .filter(|b| !b.success || b.cover_url.is_none())
        .map(|b| FailedBook {
            serial: b.serial,
            title: &b.title,
            author: b.author.as_deref().unwrap_or_default(),
            error: if b.message.is_empty() {
                "no cover found"
            } else {
                &b.message
            },
        })
        .collect()
}

/// Write the report, plus the failure list when there is any failure.
/// Returns the path of the failure list if one was written.
pub fn write_report(path: &Path, books: &[BookOutcome]) -> anyhow::Result<Option<PathBuf>> {
    let report = build_report(books);
    std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
    tracing::info!(path = %path.display(), books = books.len(), "report written");

    let failed = failed_books(books);
    if failed.is_empty() {
        return Ok(None);
    }
    let failed_path = path
        .parent()
        .map(|p| p.join(FAILED_FILE))
        .unwrap_or_else(|| PathBuf::from(FAILED_FILE));
    std::fs::write(&failed_path, serde_json::to_string_pretty(&failed)?)?;
    Ok(Some(failed_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn books() -> Vec<BookOutcome> {
        vec![
            BookOutcome {
                book_id: "b1".into(),
                serial: Some(1),
                title: "窗边的小豆豆".into(),
                author: Some("黑柳彻子".into()),
                success: true,
                cover_url: Some("http://img3.douban.com/x.jpg".into()),
                source: Some("douban".into()),
                message: "cover fetched (source: douban)".into(),
                retries: 0,
            },
            BookOutcome {
                book_id: "b2".into(),
                serial: Some(2),
                title: "不存在的书".into(),
                author: None,
                success: false,
                cover_url: None,
                source: None,
                message: "openlibrary: no book found".into(),
                retries: 0,
            },
        ]
    }

    #[test]
    fn writes_report_and_failures() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book-covers.json");

        let failed_path = write_report(&path, &books()).unwrap().unwrap();
        assert_eq!(failed_path, dir.path().join(FAILED_FILE));

        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(report["total"], 2);
        assert_eq!(report["successful"], 1);
        assert_eq!(report["failed"], 1);
        assert_eq!(report["books"][0]["cover"], "http://img3.douban.com/x.jpg");
        assert_eq!(report["books"][0]["error"], "");
        assert_eq!(report["books"][1]["author"], "");
        assert!(report["timestamp"].as_str().unwrap().contains('T'));

        let failed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&failed_path).unwrap()).unwrap();
        assert_eq!(failed.as_array().unwrap().len(), 1);
        assert_eq!(failed[0]["error"], "openlibrary: no book found");
    }

    #[test]
    fn no_failure_file_when_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let ok = &books()[..1];
        assert!(write_report(&path, ok).unwrap().is_none());
        assert!(!dir.path().join(FAILED_FILE).exists());
    }
}
