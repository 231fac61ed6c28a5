//! Attachment discovery: follows each document's attachments link and records
//! the attachments and cross-referenced documents it lists.
//!
//! A listing page may hold two tables. One whose header or preceding heading
//! mentions linked documents ("vinculados") feeds `vinculados_detectados`;
//! every other table feeds `anexos_detectados`. Pages without tables fall back
//! to `ul > li` links.

use std::collections::HashSet;
use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::format;
use crate::model::{Documento, LinkItem, SectionDocument};
use crate::portal::PortalClient;
use crate::portal::html::{
    TABLE, absolutize_url, compile_static_selector, direct_cells, element_text, first_link,
    fold_text, own_rows,
};

static LIST_ITEM: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("ul > li"));
static CAPTION: LazyLock<Selector> = LazyLock::new(|| compile_static_selector("caption"));

/// Keyword (accent-folded) marking a linked-documents table.
const VINCULADOS_KEYWORD: &str = "vinculad";

/// Heading-like elements inspected before a table.
const HEADING_TAGS: &[&str] = &[
    "h1", "h2", "h3", "h4", "h5", "h6", "p", "strong", "b", "div", "span",
];

/// Links parsed from one attachments page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttachmentLists {
    pub anexos: Vec<LinkItem>,
    pub vinculados: Vec<LinkItem>,
}

/// Totals of one discovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryStats {
    /// Documents whose attachments page was read.
    pub reviewed: usize,
    /// Documents whose attachments page could not be fetched.
    pub failed: usize,
    /// New attachment entries recorded.
    pub anexos: usize,
    /// New linked-document entries recorded.
    pub vinculados: usize,
}

/// Whether a document still needs its attachments page read.
#[must_use]
pub fn needs_review(documento: &Documento) -> bool {
    !documento.anexos_revisados
        && documento
            .link_anexos
            .as_deref()
            .is_some_and(|link| !link.trim().is_empty())
}

/// Reads the attachments page of every document that needs it.
///
/// A fetch failure leaves `anexos_revisados` false so the next pass retries
/// that document; nothing here aborts the section.
#[instrument(skip_all, fields(documents = section.documentos.len()))]
pub async fn discover_attachments(
    portal: &PortalClient,
    section: &mut SectionDocument,
) -> DiscoveryStats {
    let mut stats = DiscoveryStats::default();
    for documento in section.documentos.iter_mut().filter(|d| needs_review(d)) {
        let Some(link) = documento.link_anexos.clone() else {
            continue;
        };
        let html = match portal.fetch_page(&link).await {
            Ok(html) => html,
            Err(error) => {
                warn!(n = %documento.n, url = %link, error = %error, "attachments page failed");
                stats.failed += 1;
                continue;
            }
        };
        let Ok(page_url) = Url::parse(&link) else {
            stats.failed += 1;
            continue;
        };
        let lists = parse_attachment_page(&html, &page_url);
        stats.anexos += merge_links(&mut documento.anexos_detectados, lists.anexos);
        stats.vinculados += merge_links(&mut documento.vinculados_detectados, lists.vinculados);
        documento.anexos_revisados = true;
        stats.reviewed += 1;
        debug!(
            n = %documento.n,
            anexos = documento.anexos_detectados.len(),
            vinculados = documento.vinculados_detectados.len(),
            "attachments page read"
        );
    }
    info!(
        reviewed = stats.reviewed,
        failed = stats.failed,
        anexos = stats.anexos,
        vinculados = stats.vinculados,
        "attachment discovery finished"
    );
    stats
}

/// Parses an attachments page. Unrecognized pages give empty lists.
#[must_use]
pub fn parse_attachment_page(html: &str, page_url: &Url) -> AttachmentLists {
    let document = Html::parse_document(html);
    let mut lists = AttachmentLists::default();
    for table in document.select(&TABLE).filter(|table| !has_nested_table(*table)) {
        let links = table_links(table, page_url);
        if links.is_empty() {
            continue;
        }
        if is_vinculados_table(table) {
            lists.vinculados.extend(links);
        } else {
            lists.anexos.extend(links);
        }
    }
    if lists.anexos.is_empty() && lists.vinculados.is_empty() {
        lists.anexos = document
            .select(&LIST_ITEM)
            .filter_map(|li| link_item(li, &[], page_url))
            .collect();
    }
    dedup_by_url(&mut lists.anexos);
    dedup_by_url(&mut lists.vinculados);
    lists
}

/// Appends fresh links whose URL is not stored yet; stored entries keep their
/// download and conversion state. Returns how many entries were added.
pub fn merge_links(existing: &mut Vec<LinkItem>, fresh: Vec<LinkItem>) -> usize {
    let mut added = 0;
    for link in fresh {
        match existing.iter_mut().find(|old| old.url == link.url) {
            Some(old) => {
                if old.titulo.is_empty() {
                    old.titulo = link.titulo;
                }
                if old.origen.is_none() {
                    old.origen = link.origen;
                }
            }
            None => {
                existing.push(link);
                added += 1;
            }
        }
    }
    added
}

fn table_links(table: ElementRef<'_>, page_url: &Url) -> Vec<LinkItem> {
    own_rows(table)
        .into_iter()
        .filter_map(|row| {
            let cells = direct_cells(row);
            if cells.iter().all(|cell| cell.value().name() == "th") {
                return None;
            }
            link_item(row, &cells, page_url)
        })
        .collect()
}

/// Builds a link item from a row (or list item) holding an anchor.
///
/// The title is the anchor text, else the longest cell text. `origen` is the
/// last cell when it is neither the link cell nor a bare number.
fn link_item(
    container: ElementRef<'_>,
    cells: &[ElementRef<'_>],
    page_url: &Url,
) -> Option<LinkItem> {
    let (target, anchor_text) = first_link(container)?;
    let url = absolutize_url(&target, page_url)?;
    let cell_texts: Vec<String> = cells.iter().map(|cell| element_text(*cell)).collect();
    let titulo = if anchor_text.is_empty() {
        cell_texts
            .iter()
            .max_by_key(|text| text.chars().count())
            .cloned()
            .unwrap_or_default()
    } else {
        anchor_text
    };
    let origen = cells.last().zip(cell_texts.last()).and_then(|(cell, text)| {
        let is_link_cell = first_link(*cell).is_some();
        let is_number = text.chars().all(|c| c.is_ascii_digit());
        (cells.len() > 1 && !is_link_cell && !is_number && *text != titulo).then(|| text.clone())
    });
    Some(LinkItem {
        tipo: format::label_from_markers(&url, &container.html()),
        url,
        titulo,
        origen,
        ..LinkItem::default()
    })
}

fn is_vinculados_table(table: ElementRef<'_>) -> bool {
    let header: String = own_rows(table)
        .into_iter()
        .filter(|row| direct_cells(*row).iter().any(|cell| cell.value().name() == "th"))
        .map(element_text)
        .chain(table.select(&CAPTION).map(element_text))
        .collect::<Vec<_>>()
        .join(" ");
    if fold_text(&header).contains(VINCULADOS_KEYWORD) {
        return true;
    }
    table
        .prev_siblings()
        .filter_map(ElementRef::wrap)
        .next()
        .filter(|sibling| HEADING_TAGS.contains(&sibling.value().name()))
        .is_some_and(|heading| fold_text(&element_text(heading)).contains(VINCULADOS_KEYWORD))
}

/// Layout tables wrapping the real listings are ignored.
fn has_nested_table(table: ElementRef<'_>) -> bool {
    table
        .descendants()
        .skip(1)
        .filter_map(ElementRef::wrap)
        .any(|el| el.value().name() == "table")
}

fn dedup_by_url(links: &mut Vec<LinkItem>) {
    let mut seen = HashSet::new();
    links.retain(|link| seen.insert(link.url.clone()));
}
