use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use bookcover_core::{
    BatchCursor, BatchOptions, BookOutcome, BookQuery, BookStore, Config, CoverResolver,
    JsonBookStore, ProviderName, config_file, run_batch,
};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod output;
mod report;

use output::ColorMode;

/// Children's book cover finder - look up covers on Douban, Dangdang, JD and Open Library
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a cover for one book and print it
    Resolve {
        /// Book title
        title: String,

        /// Book author
        #[arg(short, long)]
        author: Option<String>,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Fill in missing covers in a JSON book store
    Batch {
        /// Path to the JSON array of books
        #[arg(long)]
        store: PathBuf,

        /// Number of cover-less books to skip
        #[arg(long, default_value_t = 0)]
        skip: usize,

        /// Books per page (default from config, else 5)
        #[arg(long)]
        limit: Option<usize>,

        /// Keep going page after page until no book is left
        #[arg(long)]
        all: bool,

        /// Write a JSON report here (failures also go to failed-covers.json next to it)
        #[arg(long)]
        report: Option<PathBuf>,

        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Douban API key, used instead of the configured key pool [env: DOUBAN_API_KEY]
    #[arg(long)]
    api_key: Option<String>,

    /// Comma-separated list of providers to skip (douban, dangdang, jd, openlibrary)
    #[arg(long, value_delimiter = ',')]
    disable: Vec<String>,

    /// Per-request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Resolve {
            title,
            author,
            common,
        } => {
            let found = resolve(title, author, common).await?;
            if !found {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Batch {
            store,
            skip,
            limit,
            all,
            report,
            common,
        } => batch(store, skip, limit, all, report, common).await,
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bookcover=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolve configuration: CLI flags > env vars > config file > defaults.
fn build_config(common: &CommonArgs) -> anyhow::Result<Config> {
    let mut config = Config::default();
    config_file::load_config().apply(&mut config);

    if let Ok(keys) = std::env::var("DOUBAN_API_KEYS") {
        config.douban_api_keys = split_keys(&keys);
    }
    if let Some(secs) = std::env::var("BOOKCOVER_TIMEOUT")
        .ok()
        .and_then(|v| v.parse().ok())
    {
        config.timeout_secs = secs;
    }

    if let Some(secs) = common.timeout {
        config.timeout_secs = secs;
    }
    if !common.disable.is_empty() {
        for name in &common.disable {
            name.parse::<ProviderName>()?;
        }
        config.disabled_providers = common.disable.clone();
    }

    tracing::debug!(?config, "configuration resolved");
    Ok(config)
}

/// Single Douban key supplied by the caller: `--api-key`, else `DOUBAN_API_KEY`.
/// It replaces the key pool for every request and never rotates.
fn supplied_credential(flag: Option<&str>, env: Option<String>) -> Option<String> {
    flag.map(str::to_string)
        .or(env)
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
}

fn split_keys(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

async fn resolve(title: String, author: Option<String>, common: CommonArgs) -> anyhow::Result<bool> {
    let config = build_config(&common)?;
    let color = ColorMode(!common.no_color);
    let resolver = CoverResolver::new(&config)?;

    let credential = supplied_credential(
        common.api_key.as_deref(),
        std::env::var("DOUBAN_API_KEY").ok(),
    );
    let query = BookQuery::new(title, author);
    let resolution = resolver.resolve_cover(&query, credential.as_deref()).await?;

    let mut out = std::io::stdout();
    output::print_resolution(&mut out, &query, &resolution, color)?;
    out.flush()?;
    Ok(resolution.is_success())
}

async fn batch(
    store_path: PathBuf,
    skip: usize,
    limit: Option<usize>,
    all: bool,
    report_path: Option<PathBuf>,
    common: CommonArgs,
) -> anyhow::Result<()> {
    let config = build_config(&common)?;
    let color = ColorMode(!common.no_color);

    let store = JsonBookStore::open(&store_path)
        .with_context(|| format!("failed to open book store {}", store_path.display()))?;
    let resolver = CoverResolver::new(&config)?;
    let options = BatchOptions {
        credential: supplied_credential(
            common.api_key.as_deref(),
            std::env::var("DOUBAN_API_KEY").ok(),
        ),
        ..BatchOptions::from_config(&config)
    };

    let cursor = BatchCursor::new(skip, limit.unwrap_or(config.batch_limit))?;
    let mut out = std::io::stdout();
    let (pages, outcomes) =
        run_pages(&store, &resolver, cursor, &options, all, &mut out, color).await?;

    if all {
        output::print_run_totals(&mut out, pages, &outcomes, color)?;
    }

    if let Some(path) = report_path {
        let failed = report::write_report(&path, &outcomes)?;
        writeln!(out, "Report written to {}", path.display())?;
        if let Some(failed) = failed {
            writeln!(out, "Failures written to {}", failed.display())?;
        }
    }

    out.flush()?;
    Ok(())
}

/// Run one page, or with `all` every page until the listing is exhausted.
/// Returns the number of pages and every book outcome.
async fn run_pages(
    store: &dyn BookStore,
    resolver: &CoverResolver,
    mut cursor: BatchCursor,
    options: &BatchOptions,
    all: bool,
    out: &mut dyn Write,
    color: ColorMode,
) -> anyhow::Result<(usize, Vec<BookOutcome>)> {
    let mut outcomes: Vec<BookOutcome> = Vec::new();
    let mut pages = 0;

    loop {
        if pages > 0 && !options.request_delay.is_zero() {
            tokio::time::sleep(options.request_delay).await;
        }
        pages += 1;
        writeln!(out, "Page {} (skip {}, limit {})", pages, cursor.skip, cursor.limit)?;
        let summary = run_batch(store, resolver, cursor, options).await?;
        output::print_batch_summary(out, &summary, color)?;

        let next = summary.next_cursor;
        let still_missing = count_still_missing(store, &summary.results).await?;
        outcomes.extend(summary.results);

        match next {
            Some(next) if all => {
                // Books that got a cover left the listing; only the rest shift the window.
                cursor = BatchCursor {
                    skip: cursor.skip + still_missing,
                    limit: next.limit,
                };
            }
            _ => break,
        }
    }

    Ok((pages, outcomes))
}

/// How many of the processed books are still without a cover in the store.
async fn count_still_missing(
    store: &dyn BookStore,
    results: &[BookOutcome],
) -> anyhow::Result<usize> {
    let mut missing = 0;
    for outcome in results {
        let covered = store
            .get(&outcome.book_id)
            .await?
            .is_some_and(|b| b.has_cover());
        if !covered {
            missing += 1;
        }
    }
    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_keys_trims_and_drops_blanks() {
        assert_eq!(
            split_keys(" 0ac44ae0, ,054022ea "),
            vec!["0ac44ae0".to_string(), "054022ea".to_string()]
        );
    }

    #[test]
    fn supplied_key_comes_from_flag_then_env() {
        assert_eq!(
            supplied_credential(Some("flag-key"), Some("env-key".into())).as_deref(),
            Some("flag-key")
        );
        assert_eq!(
            supplied_credential(None, Some(" env-key ".into())).as_deref(),
            Some("env-key")
        );
        assert_eq!(supplied_credential(None, Some("  ".into())), None);
        assert_eq!(supplied_credential(None, None), None);
    }

    #[test]
    fn cli_parses_batch_flags() {
        let cli = Cli::parse_from([
            "bookcover",
            "batch",
            "--store",
            "books.json",
            "--limit",
            "10",
            "--all",
            "--disable",
            "jd,dangdang",
        ]);
        match cli.command {
            Command::Batch {
                store,
                skip,
                limit,
                all,
                common,
                ..
            } => {
                assert_eq!(store, PathBuf::from("books.json"));
                assert_eq!(skip, 0);
                assert_eq!(limit, Some(10));
                assert!(all);
                assert_eq!(common.disable, vec!["jd", "dangdang"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let common = CommonArgs {
            api_key: None,
            disable: vec!["amazon".into()],
            timeout: None,
            no_color: true,
        };
        assert!(build_config(&common).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn all_pages_keep_the_book_delay_across_page_boundaries() {
        use bookcover_core::providers::CoverProvider;
        use bookcover_core::providers::mock::MockProvider;
        use std::sync::Arc;
        use std::time::Duration;

        let store = bookcover_core::MemoryBookStore::new(
            ["小王子", "夏洛的网", "时代广场的蟋蟀", "窗边的小豆豆"]
                .iter()
                .enumerate()
                .map(|(i, t)| bookcover_core::Book::new(format!("b{i}"), *t))
                .collect(),
        );
        let mock = Arc::new(MockProvider::cover(
            bookcover_core::ProviderName::Douban,
            "http://img3.douban.com/any.jpg",
        ));
        let resolver = CoverResolver::with_providers(
            vec![mock.clone() as Arc<dyn CoverProvider>],
            Arc::default(),
        );
        let options = BatchOptions {
            request_delay: Duration::from_secs(1),
            ..BatchOptions::default()
        };

        let start = tokio::time::Instant::now();
        let mut out = Vec::new();
        let (pages, outcomes) = run_pages(
            &store,
            &resolver,
            BatchCursor::new(0, 2).unwrap(),
            &options,
            true,
            &mut out,
            ColorMode(false),
        )
        .await
        .unwrap();
        let spent = start.elapsed();

        // pages of 2, 2, then an empty one; one pause between every two books
        // and one before each later page
        assert_eq!(pages, 3);
        assert_eq!(outcomes.len(), 4);
        assert_eq!(mock.call_count(), 4);
        let expected = Duration::from_secs(2 + 2);
        assert!(
            spent >= expected && spent < expected + Duration::from_millis(20),
            "spent {spent:?}"
        );
    }

    #[tokio::test]
    async fn still_missing_counts_uncovered_books() {
        let mut covered = bookcover_core::Book::new("b1", "小王子");
        covered.cover = Some("http://img3.douban.com/x.jpg".into());
        let store = bookcover_core::MemoryBookStore::new(vec![
            covered,
            bookcover_core::Book::new("b2", "夏洛的网"),
        ]);
        let outcome = |id: &str| BookOutcome {
            book_id: id.into(),
            serial: None,
            title: String::new(),
            author: None,
            success: false,
            cover_url: None,
            source: None,
            message: String::new(),
            retries: 0,
        };

        let n = count_still_missing(&store, &[outcome("b1"), outcome("b2"), outcome("gone")])
            .await
            .unwrap();
        assert_eq!(n, 2);
    }
}
