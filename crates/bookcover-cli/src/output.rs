use std::io::Write;

use bookcover_core::{BatchSummary, BookOutcome, BookQuery, Resolution};
use owo_colors::OwoColorize;

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

/// Print the outcome of a single `resolve`.
pub fn print_resolution(
    w: &mut dyn Write,
    query: &BookQuery,
    resolution: &Resolution,
    color: ColorMode,
) -> std::io::Result<()> {
    writeln!(w, "Query: {}", query.normalized())?;

    match (resolution.result.cover_url(), resolution.source) {
        (Some(url), Some(source)) => {
            if color.enabled() {
                writeln!(w, "{} {}", "Cover:".green().bold(), url)?;
                writeln!(w, "{} {}", "Source:".dimmed(), source)?;
            } else {
                writeln!(w, "Cover: {}", url)?;
                writeln!(w, "Source: {}", source)?;
            }
        }
        _ => {
            let reason = resolution.result.reason().unwrap_or("no cover found");
            if color.enabled() {
                writeln!(w, "{} {}", "No cover:".red().bold(), reason)?;
            } else {
                writeln!(w, "No cover: {}", reason)?;
            }
        }
    }

    for attempt in &resolution.attempts {
        let status = match attempt.failure {
            None => "ok".to_string(),
            Some(kind) => format!("{kind:?}"),
        };
        let line = format!(
            "  {:<12} {:<24} {:.2}s",
            attempt.provider.as_str(),
            status,
            attempt.elapsed.as_secs_f64()
        );
        if color.enabled() {
            writeln!(w, "{}", line.dimmed())?;
        } else {
            writeln!(w, "{}", line)?;
        }
    }
    Ok(())
}

fn print_book(
    w: &mut dyn Write,
    index: usize,
    book: &BookOutcome,
    color: ColorMode,
) -> std::io::Result<()> {
    let retries = if book.retries > 0 {
        format!(" (retries: {})", book.retries)
    } else {
        String::new()
    };

    if book.success {
        let url = book.cover_url.as_deref().unwrap_or_default();
        if color.enabled() {
            writeln!(
                w,
                "[{}] {} {} {}{}",
                index,
                "✓".green(),
                book.title.bold(),
                url.dimmed(),
                retries
            )?;
        } else {
            writeln!(w, "[{}] OK   {} {}{}", index, book.title, url, retries)?;
        }
    } else if color.enabled() {
        writeln!(
            w,
            "[{}] {} {} {}{}",
            index,
            "✗".red(),
            book.title.bold(),
            book.message.red(),
            retries
        )?;
    } else {
        writeln!(w, "[{}] FAIL {} {}{}", index, book.title, book.message, retries)?;
    }
    Ok(())
}

/// Print per-book lines and the totals for one page.
pub fn print_batch_summary(
    w: &mut dyn Write,
    summary: &BatchSummary,
    color: ColorMode,
) -> std::io::Result<()> {
    for (i, book) in summary.results.iter().enumerate() {
        print_book(w, i + 1, book, color)?;
    }

    writeln!(w)?;
    if color.enabled() {
        writeln!(w, "{}", summary.message.bold())?;
        writeln!(
            w,
            "  {} updated, {} failed, success rate {}",
            summary.updated.to_string().green(),
            summary.failed.to_string().red(),
            summary.success_rate
        )?;
    } else {
        writeln!(w, "{}", summary.message)?;
        writeln!(
            w,
            "  {} updated, {} failed, success rate {}",
            summary.updated, summary.failed, summary.success_rate
        )?;
    }
    if summary.processed > 0 {
        writeln!(w, "  {:.1}s per book", summary.avg_seconds_per_book)?;
    }
    if color.enabled() {
        writeln!(w, "{}", summary.next_step.dimmed())?;
    } else {
        writeln!(w, "{}", summary.next_step)?;
    }
    Ok(())
}

/// Totals across every page of a `--all` run.
pub fn print_run_totals(
    w: &mut dyn Write,
    pages: usize,
    books: &[BookOutcome],
    color: ColorMode,
) -> std::io::Result<()> {
    let ok = books.iter().filter(|b| b.success).count();
    let line = format!(
        "Done: {} pages, {} books, {} updated, {} failed",
        pages,
        books.len(),
        ok,
        books.len() - ok
    );
    writeln!(w)?;
    if color.enabled() {
        writeln!(w, "{}", line.bold())?;
    } else {
        writeln!(w, "{}", line)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(success: bool) -> BookOutcome {
        BookOutcome {
            book_id: "b1".into(),
            serial: Some(7),
            title: "夏洛的网".into(),
            author: None,
            success,
            cover_url: success.then(|| "http://img3.douban.com/x.jpg".to_string()),
            source: success.then(|| "douban".to_string()),
            message: if success {
                "cover fetched (source: douban)".into()
            } else {
                "douban: no book found".into()
            },
            retries: if success { 0 } else { 2 },
        }
    }

    #[test]
    fn plain_book_lines() {
        let mut buf = Vec::new();
        print_book(&mut buf, 1, &outcome(true), ColorMode(false)).unwrap();
        print_book(&mut buf, 2, &outcome(false), ColorMode(false)).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("[1] OK   夏洛的网 http://img3.douban.com/x.jpg\n"));
        assert!(text.contains("[2] FAIL 夏洛的网 douban: no book found (retries: 2)\n"));
    }

    #[test]
    fn totals_count_failures() {
        let mut buf = Vec::new();
        let books = [outcome(true), outcome(false), outcome(true)];
        print_run_totals(&mut buf, 2, &books, ColorMode(false)).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("Done: 2 pages, 3 books, 2 updated, 1 failed"));
    }
}
