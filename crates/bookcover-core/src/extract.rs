//! Provider-specific cover extraction from raw response bodies.
//!
//! Pure functions: no I/O, identical input gives identical output. A body that
//! parses but carries no usable image is a [`Miss`], which is distinct from a
//! malformed body.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;

use crate::{Miss, ProviderName};

/// Why no URL could be extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    Miss(Miss),
    /// The body is not what the provider is supposed to return (e.g. bad JSON).
    Malformed(String),
}

/// Best-guess cover URL for `body`, or `None`.
pub fn extract(provider: ProviderName, body: &str) -> Option<String> {
    extract_cover(provider, body).ok()
}

/// Like [`extract`], but says why nothing was found.
pub fn extract_cover(provider: ProviderName, body: &str) -> Result<String, ExtractError> {
    match provider {
        ProviderName::Douban => extract_douban(body),
        ProviderName::Dangdang => extract_dangdang(body),
        ProviderName::Jd => extract_jd(body),
        ProviderName::OpenLibrary => extract_openlibrary(body),
    }
}

/// True for absolute `http://` / `https://` URLs with something after the scheme.
pub fn is_cover_url(url: &str) -> bool {
    ["http://", "https://"].iter().any(|scheme| {
        url.len() > scheme.len()
            && url
                .get(..scheme.len())
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
    })
}

fn parse_json(body: &str) -> Result<Value, ExtractError> {
    serde_json::from_str(body).map_err(|e| ExtractError::Malformed(format!("invalid JSON: {e}")))
}

fn first_result<'a>(data: &'a Value, field: &str) -> Result<&'a Value, ExtractError> {
    data[field]
        .as_array()
        .and_then(|items| items.first())
        .ok_or(ExtractError::Miss(Miss::NoBook))
}

fn non_empty_str(v: &Value) -> Option<&str> {
    v.as_str().map(str::trim).filter(|s| !s.is_empty())
}

// ── Douban ──────────────────────────────────────────────────────────────

fn extract_douban(body: &str) -> Result<String, ExtractError> {
    let data = parse_json(body)?;
    let book = first_result(&data, "books")?;

    non_empty_str(&book["images"]["large"])
        .or_else(|| non_empty_str(&book["image"]))
        .filter(|url| is_cover_url(url))
        .map(String::from)
        .ok_or(ExtractError::Miss(Miss::NoCover))
}

// ── Open Library ────────────────────────────────────────────────────────

fn extract_openlibrary(body: &str) -> Result<String, ExtractError> {
    let data = parse_json(body)?;
    let doc = first_result(&data, "docs")?;

    doc["cover_i"]
        .as_i64()
        .filter(|id| *id > 0)
        .map(|id| format!("https://covers.openlibrary.org/b/id/{id}-L.jpg"))
        .ok_or(ExtractError::Miss(Miss::NoCover))
}

// ── HTML helpers ────────────────────────────────────────────────────────

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap()
}

/// First non-empty `attr` among elements matching `sel`, in document order.
fn first_attr(document: &Html, sel: &Selector, attr: &str, scheme: &str) -> Option<String> {
    document
        .select(sel)
        .filter_map(|el| el.value().attr(attr))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| with_scheme(v, scheme))
        .find(|v| is_cover_url(v))
}

/// Prefix scheme-relative (or otherwise scheme-less) URLs with `scheme`.
fn with_scheme(url: &str, scheme: &str) -> String {
    if url.starts_with("http") {
        url.to_string()
    } else {
        format!("{scheme}{url}")
    }
}

/// Apply `(pattern, replacement)` rewrites in order.
fn strip_suffixes(url: String, rules: &[(Regex, &str)]) -> String {
    rules
        .iter()
        .fold(url, |acc, (re, rep)| re.replace(&acc, *rep).into_owned())
}

// ── Dangdang ────────────────────────────────────────────────────────────

static DD_LAZY: Lazy<Selector> = Lazy::new(|| selector("img[data-original][alt]"));
static DD_PIC_CLASS: Lazy<Selector> = Lazy::new(|| selector(r#"img[class^="pic"][src]"#));
static DD_PRODUCT_LIST: Lazy<Selector> = Lazy::new(|| selector(r#"li[class^="line"] img[src]"#));

static DD_SUFFIXES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (Regex::new(r"\.jpg_.*\.jpg$").unwrap(), ".jpg"),
        (Regex::new(r"\.jpg@.*$").unwrap(), ".jpg"),
        (Regex::new(r"_b\.jpg$").unwrap(), ".jpg"),
    ]
});

fn extract_dangdang(body: &str) -> Result<String, ExtractError> {
    let document = Html::parse_document(body);

    let found = first_attr(&document, &DD_LAZY, "data-original", "http:")
        .or_else(|| first_attr(&document, &DD_PIC_CLASS, "src", "http:"))
        .or_else(|| first_attr(&document, &DD_PRODUCT_LIST, "src", "http:"));

    match found {
        Some(url) => {
            tracing::debug!(url = %url, "dangdang: matched cover image");
            Ok(strip_suffixes(url, &DD_SUFFIXES))
        }
        None => Err(ExtractError::Miss(Miss::NoCover)),
    }
}

// ── JD ──────────────────────────────────────────────────────────────────

static JD_LAZY: Lazy<Selector> = Lazy::new(|| selector("img[data-lazy-img]"));
static JD_IMG_CLASS: Lazy<Selector> = Lazy::new(|| selector(r#"img[class*="p-img"][src]"#));
static JD_IMG_DIV: Lazy<Selector> = Lazy::new(|| selector(r#"div[class="p-img"] img[src]"#));
static ANY_IMG: Lazy<Selector> = Lazy::new(|| selector("img[src]"));

/// Images whose URL contains any of these are page chrome, not covers.
const JD_EXCLUDED: [&str; 4] = ["logo", "icon", "sprites", "loading"];
/// Paths served by JD's product image CDN.
const JD_CDN_TOKENS: [&str; 3] = ["n1", "n0", "360buyimg"];

static JD_SUFFIXES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (Regex::new(r"\.avif.*$").unwrap(), ".avif"),
        (Regex::new(r"\.jpg.*$").unwrap(), ".jpg"),
        (Regex::new(r"\.png.*$").unwrap(), ".png"),
        (Regex::new(r"/s\d+x\d+_").unwrap(), "/"),
    ]
});

fn is_jd_product_image(url: &str) -> bool {
    !JD_EXCLUDED.iter().any(|t| url.contains(t)) && JD_CDN_TOKENS.iter().any(|t| url.contains(t))
}

fn extract_jd(body: &str) -> Result<String, ExtractError> {
    let document = Html::parse_document(body);

    let found = first_attr(&document, &JD_LAZY, "data-lazy-img", "https:")
        .or_else(|| first_attr(&document, &JD_IMG_CLASS, "src", "https:"))
        .or_else(|| first_attr(&document, &JD_IMG_DIV, "src", "https:"))
        .or_else(|| {
            document
                .select(&ANY_IMG)
                .filter_map(|el| el.value().attr("src"))
                .map(str::trim)
                .filter(|src| !src.is_empty() && is_jd_product_image(src))
                .map(|src| with_scheme(src, "https:"))
                .find(|url| is_cover_url(url))
        });

    match found {
        Some(url) => {
            tracing::debug!(url = %url, "jd: matched cover image");
            Ok(strip_suffixes(url, &JD_SUFFIXES))
        }
        None => Err(ExtractError::Miss(Miss::NoCover)),
    }
}
