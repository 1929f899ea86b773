//! Result-link extraction from a search engine results page.
//!
//! A result is an anchor that contains an `h3` heading. Engine redirect
//! wrappers (`/url?q=…`, `/url?url=…`) are unwrapped to their target; other
//! relative links and links back into the engine's own search pages are
//! dropped. Only `http(s)` targets survive.

use crate::content::html;
use scraper::{Html, Selector};
use std::collections::HashSet;

/// A link taken from the results page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultLink {
    pub title: String,
    pub url: String,
}

/// Extract up to `max` result links, in page order, without duplicates.
pub fn extract_links(page_html: &str, max: usize) -> Vec<ResultLink> {
    let document = Html::parse_document(page_html);
    let (Ok(anchor_sel), Ok(heading_sel)) = (Selector::parse("a[href]"), Selector::parse("h3"))
    else {
        return Vec::new();
    };

    let mut links = Vec::new();
    let mut seen = HashSet::new();
    for anchor in document.select(&anchor_sel) {
        if links.len() >= max {
            break;
        }
        let Some(heading) = anchor.select(&heading_sel).next() else {
            continue;
        };
        let href = anchor.value().attr("href").unwrap_or_default();
        let Some(url) = resolve_href(href) else {
            continue;
        };
        if !seen.insert(url.clone()) {
            continue;
        }
        let title = html::element_text(heading);
        links.push(ResultLink { title, url });
    }
    links
}

/// Turn a raw `href` into an absolute result target, or `None` if it should
/// be ignored.
pub fn resolve_href(href: &str) -> Option<String> {
    let href = href.trim();
    let target = if href.starts_with("/url?") {
        unwrap_redirect(href)?
    } else if href.starts_with('/') || href.starts_with('#') {
        return None;
    } else {
        href.to_string()
    };

    let parsed = url::Url::parse(&target).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    if is_engine_search_page(&parsed) {
        return None;
    }
    Some(target)
}

fn unwrap_redirect(href: &str) -> Option<String> {
    let base = url::Url::parse("https://redirect.invalid/").ok()?;
    let wrapped = base.join(href).ok()?;
    wrapped
        .query_pairs()
        .find(|(k, _)| k == "q" || k == "url")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

fn is_engine_search_page(url: &url::Url) -> bool {
    let host = url.host_str().unwrap_or_default();
    let is_google = host == "google.com" || host.ends_with(".google.com");
    is_google && url.path().starts_with("/search")
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULTS: &str = r#"
<div id="search">
  <a href="/search?q=related"><h3>Related searches</h3></a>
  <a href="/url?q=https://tokio.rs/tokio/tutorial&amp;sa=U&amp;ved=abc"><h3>Tokio <b>Tutorial</b></h3></a>
  <a href="https://docs.rs/tokio"><div><h3 class="LC20lb">tokio - Rust</h3></div></a>
  <a href="https://example.com/no-heading">Just a link</a>
  <a href="https://www.google.com/search?q=more"><h3>More results</h3></a>
  <a href="/url?url=https%3A%2F%2Fblog.example.com%2Fpost"><h3>Blog post</h3></a>
  <a href="https://docs.rs/tokio"><h3>Duplicate</h3></a>
  <a href="ftp://files.example.com/x"><h3>FTP</h3></a>
  <a href="https://fourth.example.com/"><h3>Fourth</h3></a>
</div>"#;

    #[test]
    fn extracts_heading_anchors_in_order() {
        let links = extract_links(RESULTS, 10);
        let urls: Vec<_> = links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(
            urls,
            [
                "https://tokio.rs/tokio/tutorial",
                "https://docs.rs/tokio",
                "https://blog.example.com/post",
                "https://fourth.example.com/",
            ]
        );
        assert_eq!(links[0].title, "Tokio Tutorial");
        assert_eq!(links[1].title, "tokio - Rust");
    }

    #[test]
    fn respects_limit() {
        assert_eq!(extract_links(RESULTS, 2).len(), 2);
        assert!(extract_links(RESULTS, 0).is_empty());
    }

    #[test]
    fn resolve_rules() {
        assert_eq!(resolve_href("/preferences"), None);
        assert_eq!(resolve_href("#top"), None);
        assert_eq!(resolve_href("javascript:void(0)"), None);
        assert_eq!(resolve_href("https://google.com/search?q=x"), None);
        assert_eq!(
            resolve_href("https://maps.google.com/maps?q=x").as_deref(),
            Some("https://maps.google.com/maps?q=x")
        );
        assert_eq!(
            resolve_href("/url?q=http://a.com/&sa=U").as_deref(),
            Some("http://a.com/")
        );
        assert_eq!(resolve_href("/url?sa=U"), None);
    }

    #[test]
    fn unquoted_and_single_quoted_hrefs() {
        let page = "<a href=https://a.example/x><h3>A &amp; B</h3></a>\
                    <a href='https://b.example/?q=1&amp;r=2'><h3>B</h3></a>";
        let links = extract_links(page, 5);
        assert_eq!(links[0].url, "https://a.example/x");
        assert_eq!(links[0].title, "A & B");
        assert_eq!(links[1].url, "https://b.example/?q=1&r=2");
    }

    #[test]
    fn empty_page_yields_nothing() {
        assert!(extract_links("<html><body>No results</body></html>", 3).is_empty());
    }
}
