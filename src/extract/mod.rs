//! Document list extraction for one section.
//!
//! The section's listing endpoints are tried in order; the first one that
//! answers 200 with at least one parseable row wins and later endpoints are
//! not consulted.

pub mod sections;
pub mod table;

use std::collections::BTreeSet;

use tracing::{debug, info, instrument, warn};
use url::Url;

pub use sections::{Markup, PROFILES, SectionProfile, profile};

use crate::model::Documento;
use crate::portal::PortalClient;

/// Rows extracted from a listing endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Listing {
    pub documentos: Vec<Documento>,
    /// Endpoint that produced the rows, if any did.
    pub source_url: Option<String>,
    /// Whether at least one endpoint answered at all.
    pub reachable: bool,
}

/// Fetches and parses the listing of a section.
///
/// Never fails: network errors move on to the next template and an
/// unrecognized page counts as zero rows.
#[instrument(skip(portal, profile), fields(section = profile.code))]
pub async fn extract_listing(
    portal: &PortalClient,
    profile: &SectionProfile,
    target_id: &str,
) -> Listing {
    let mut listing = Listing::default();
    for template in profile.list_templates {
        let url = portal.render(template, target_id);
        let html = match portal.fetch_page(&url).await {
            Ok(html) => html,
            Err(error) => {
                warn!(url = %url, error = %error, "listing endpoint failed, trying next");
                continue;
            }
        };
        listing.reachable = true;
        let Ok(page_url) = Url::parse(&url) else {
            continue;
        };
        let documentos = table::parse_listing(&html, profile.markup, &page_url);
        if documentos.is_empty() {
            debug!(url = %url, "no rows recognized");
            continue;
        }
        info!(url = %url, rows = documentos.len(), "listing extracted");
        listing.documentos = documentos;
        listing.source_url = Some(url);
        return listing;
    }
    listing
}

/// Merges a fresh listing into previously persisted documents.
///
/// A fresh row matching a stored one (same document URL, or same ordinal when
/// neither has a URL) keeps the stored record so download, attachment and
/// conversion state survive a re-listing. Stored rows missing from the fresh
/// listing are kept; nothing is deleted.
#[must_use]
pub fn merge_listing(existing: Vec<Documento>, fresh: Vec<Documento>) -> Vec<Documento> {
    if fresh.is_empty() {
        return existing;
    }
    let mut remaining = existing;
    let mut merged = Vec::with_capacity(fresh.len().max(remaining.len()));
    for row in fresh {
        let found = remaining.iter().position(|old| {
            if old.url_documento.is_empty() && row.url_documento.is_empty() {
                old.n == row.n && old.titulo == row.titulo
            } else {
                old.url_documento == row.url_documento
            }
        });
        match found {
            Some(index) => merged.push((remaining.remove(index), false)),
            None => merged.push((row, true)),
        }
    }
    merged.extend(remaining.into_iter().map(|old| (old, false)));
    renumber_new_rows(&mut merged);
    merged.into_iter().map(|(documento, _)| documento).collect()
}

/// Keeps stored ordinals and moves colliding fresh rows past the highest one,
/// so `n` stays unique and stable across reruns.
fn renumber_new_rows(rows: &mut [(Documento, bool)]) {
    let mut taken: BTreeSet<String> = rows
        .iter()
        .filter(|(_, is_new)| !is_new)
        .map(|(documento, _)| documento.n.clone())
        .collect();
    let mut next = rows
        .iter()
        .filter_map(|(documento, _)| documento.ordinal())
        .max()
        .unwrap_or(0);
    for (documento, _) in rows.iter_mut().filter(|(_, is_new)| *is_new) {
        if documento.ordinal().is_none() || !taken.insert(documento.n.clone()) {
            next += 1;
            documento.n = format!("{next:04}");
            taken.insert(documento.n.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(n: &str, url: &str) -> Documento {
        Documento {
            n: n.to_string(),
            titulo: format!("doc {n}"),
            url_documento: url.to_string(),
            formato: "PDF".to_string(),
            ..Documento::default()
        }
    }

    #[test]
    fn test_merge_keeps_stored_state() {
        let mut stored = row("0001", "https://h/a.pdf");
        stored.ruta = Some("EXEVA/files/00/0001_a.pdf".to_string());
        let merged = merge_listing(vec![stored.clone()], vec![row("0001", "https://h/a.pdf")]);
        assert_eq!(merged, vec![stored]);
    }

    #[test]
    fn test_merge_appends_new_rows_with_fresh_ordinals() {
        let stored = vec![row("0001", "https://h/a.pdf"), row("0002", "https://h/b.pdf")];
        let fresh = vec![
            row("0001", "https://h/new.pdf"),
            row("0002", "https://h/a.pdf"),
            row("0003", "https://h/b.pdf"),
        ];
        let merged = merge_listing(stored, fresh);
        let pairs: Vec<(&str, &str)> = merged
            .iter()
            .map(|d| (d.n.as_str(), d.url_documento.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("0003", "https://h/new.pdf"),
                ("0001", "https://h/a.pdf"),
                ("0002", "https://h/b.pdf"),
            ]
        );
    }

    #[test]
    fn test_failed_listing_keeps_existing() {
        let stored = vec![row("0001", "https://h/a.pdf")];
        assert_eq!(merge_listing(stored.clone(), Vec::new()), stored);
    }
}
