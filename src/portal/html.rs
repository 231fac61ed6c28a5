//! HTML helpers shared by the detector, the listing extractor and the
//! attachment discoverer.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Selector};
use url::Url;

/// Compiles a CSS selector at static init; panics on invalid pattern.
pub fn compile_static_selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid static selector '{css}': {e}"))
}

/// Compiles a regex at static init; panics on invalid pattern.
pub fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

pub static ANCHOR: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("a"));
pub static TABLE: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("table"));
pub static ROW: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("tr"));
pub static CELL: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("td, th"));

/// URL literal inside an `onclick` handler such as `window.open('/doc.php?id=1')`.
static ONCLICK_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"['"]((?:https?://|/|\.\./|[\w\-]+\.php)[^'"]*)['"]"#)
});

/// Collapses runs of whitespace (including non-breaking spaces) into one space.
#[must_use]
pub fn normalize_whitespace(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whitespace-normalized text content of an element.
#[must_use]
pub fn element_text(element: ElementRef<'_>) -> String {
    normalize_whitespace(&element.text().collect::<String>())
}

/// Lower-cases and strips Spanish diacritics for keyword matching.
#[must_use]
pub fn fold_text(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' => 'a',
            'é' | 'è' | 'ë' => 'e',
            'í' | 'ì' | 'ï' => 'i',
            'ó' | 'ò' | 'ö' => 'o',
            'ú' | 'ù' | 'ü' => 'u',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}

/// Direct child cells (`td`/`th`) of a row, skipping cells of nested tables.
#[must_use]
pub fn direct_cells(row: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|child| matches!(child.value().name(), "td" | "th"))
        .collect()
}

/// Rows that belong to `table` itself (directly or through thead/tbody/tfoot),
/// excluding rows of nested tables.
#[must_use]
pub fn own_rows(table: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    let mut rows = Vec::new();
    for child in table.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "tr" => rows.push(child),
            "thead" | "tbody" | "tfoot" => rows.extend(
                child
                    .children()
                    .filter_map(ElementRef::wrap)
                    .filter(|el| el.value().name() == "tr"),
            ),
            _ => {}
        }
    }
    rows
}

/// Link target of an anchor: `href`, or a URL literal in `onclick` when the
/// href is empty or a `javascript:` stub.
#[must_use]
pub fn anchor_target(anchor: ElementRef<'_>) -> Option<String> {
    let href = anchor.value().attr("href").map(str::trim).unwrap_or_default();
    let is_stub =
        href.is_empty() || href == "#" || href.to_ascii_lowercase().starts_with("javascript:");
    if !is_stub {
        return Some(href.to_string());
    }
    anchor
        .value()
        .attr("onclick")
        .and_then(|onclick| ONCLICK_URL_RE.captures(onclick))
        .and_then(|caps| caps.get(1).map(|m| m.as_str().to_string()))
}

/// First anchor below `element` that carries a usable target.
#[must_use]
pub fn first_link(element: ElementRef<'_>) -> Option<(String, String)> {
    element
        .select(&ANCHOR)
        .find_map(|a| anchor_target(a).map(|target| (target, element_text(a))))
}

/// Resolves a possibly relative link against a base URL.
///
/// Returns the value as-is if it already starts with `http://` or `https://`;
/// normalizes `//...` to `https:...`; otherwise joins with `base_url`.
#[must_use]
pub fn absolutize_url(value: &str, base_url: &Url) -> Option<String> {
    let value = value.trim();
    if value.starts_with("http://") || value.starts_with("https://") {
        return Some(value.to_string());
    }
    if value.starts_with("//") {
        return Some(format!("https:{value}"));
    }
    base_url.join(value).ok().map(|url| url.to_string())
}
