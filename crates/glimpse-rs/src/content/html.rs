//! HTML text extraction.
//!
//! Pages are parsed into a DOM with `scraper`. Visible text walks the body
//! and skips subtrees that never carry readable content; block-level
//! elements become word breaks. Entities are decoded by the parser.

use scraper::{ElementRef, Html, Selector};

/// Elements whose whole subtree is dropped from visible text.
const NON_CONTENT: &[&str] = &["script", "style", "noscript", "iframe", "svg", "template", "head"];

/// Elements that separate words when their tags are removed.
const BLOCK: &[&str] = &[
    "p", "div", "br", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6", "tr", "td", "th",
    "section", "article", "header", "footer", "nav", "main", "blockquote", "pre",
];

/// Visible text of an HTML document with whitespace collapsed to single
/// spaces.
pub fn visible_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let root = Selector::parse("body")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .unwrap_or_else(|| document.root_element());
    element_text(root)
}

/// Visible text of one element's subtree, collapsed.
pub fn element_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    push_text(element, &mut out);
    collapse_whitespace(&out)
}

fn push_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
        } else if let Some(child) = ElementRef::wrap(child) {
            let name = child.value().name();
            if NON_CONTENT.contains(&name) {
                continue;
            }
            let block = BLOCK.contains(&name);
            if block {
                out.push(' ');
            }
            push_text(child, out);
            if block {
                out.push(' ');
            }
        }
    }
}

/// The `<title>` of a document, collapsed.
pub fn title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let Ok(sel) = Selector::parse("title") else {
        return None;
    };
    document
        .select(&sel)
        .next()
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty())
}

/// The `description` (or `og:description`) meta content.
pub fn meta_description(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let Ok(sel) = Selector::parse("meta[content]") else {
        return None;
    };
    document.select(&sel).find_map(|meta| {
        let el = meta.value();
        let name = el.attr("name").or_else(|| el.attr("property"))?;
        if !matches!(
            name.to_ascii_lowercase().as_str(),
            "description" | "og:description"
        ) {
            return None;
        }
        let text = collapse_whitespace(el.attr("content")?);
        (!text.is_empty()).then_some(text)
    })
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to at most `max_bytes`, backing off to a char boundary.
pub fn truncate(text: &str, max_bytes: usize) -> &str {
    let end = text.floor_char_boundary(max_bytes);
    text.get(..end).unwrap_or(text)
}

/// Truncate to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text.get(..idx).unwrap_or(text),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!doctype html>
<html><head>
  <title>  Rust &amp; Tokio  </title>
  <meta name="description" content="Async runtime &quot;guide&quot;">
  <style>body { color: red }</style>
</head>
<body>
  <script>var x = "<p>not text</p>";</script>
  <h1>Getting started</h1>
  <p>Spawn   a task.<br>Then await it.</p>
  <!-- hidden -->
  <noscript>Enable JS</noscript>
  <svg><text>chart</text></svg>
</body></html>"#;

    #[test]
    fn visible_text_drops_non_content() {
        let text = visible_text(PAGE);
        assert_eq!(text, "Getting started Spawn a task. Then await it.");
    }

    #[test]
    fn bare_angle_brackets_are_text() {
        assert_eq!(
            visible_text("<body><p>if x < 3 and y > 5 then stop</p></body>"),
            "if x < 3 and y > 5 then stop"
        );
        assert_eq!(visible_text("<p>a &lt;b&gt; &#65;&#x42;</p>"), "a <b> AB");
    }

    #[test]
    fn inline_elements_do_not_split_words() {
        assert_eq!(visible_text("<p>un<b>break</b>able</p>"), "unbreakable");
    }

    #[test]
    fn title_and_description() {
        assert_eq!(title(PAGE).as_deref(), Some("Rust & Tokio"));
        assert_eq!(
            meta_description(PAGE).as_deref(),
            Some("Async runtime \"guide\"")
        );
    }

    #[test]
    fn og_description_with_reordered_attributes() {
        let html = r#"<meta content='From OG' property="og:description">"#;
        assert_eq!(meta_description(html).as_deref(), Some("From OG"));
        assert_eq!(meta_description(r#"<meta name="keywords" content="x">"#), None);
    }

    #[test]
    fn missing_title_is_none() {
        assert_eq!(title("<p>x</p>"), None);
        assert_eq!(title("<title> </title>"), None);
    }

    #[test]
    fn truncate_respects_char_boundary() {
        let text = "aé"; // 'é' is two bytes
        assert_eq!(truncate(text, 2), "a");
        assert_eq!(truncate(text, 3), "aé");
        assert_eq!(truncate("short", 100), "short");
        assert_eq!(truncate("日本", 1), "");
    }

    #[test]
    fn truncate_chars_counts_characters() {
        assert_eq!(truncate_chars("日本語テキスト", 3), "日本語");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn fragment_without_body() {
        assert_eq!(visible_text("<div>one</div><div>two</div>"), "one two");
    }
}
