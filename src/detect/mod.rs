//! Section detection for a project.
//!
//! The ficha page reveals which base sections exist through URL fragments in
//! its markup; recourse sections come from a separate listing page. The
//! resulting registry is written once.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{info, instrument, warn};

use crate::extract::sections::{PROFILES, SectionProfile};
use crate::model::{Expediente, Registry};
use crate::portal::PortalClient;
use crate::portal::html::{
    ANCHOR, anchor_target, compile_static_regex, compile_static_selector, element_text, fold_text,
    own_rows,
};
use crate::store::{ProjectRepository, StoreError};

/// Ficha page endpoints; the first 200 wins.
pub const FICHA_TEMPLATES: &[&str] = &[
    "{base}/expediente/ficha/fichaPrincipal.php?modo=ficha&id_expediente={id}",
    "{base}/expediente/fichaPrincipal.php?modo=ficha&id_expediente={id}",
];

/// Recourse listing endpoints, in order.
pub const RECURSO_TEMPLATES: &[&str] = &[
    "{base}/recursos/xhr_recursos.php?id_expediente={id}",
    "{base}/recursos/listadoRecursos.php?id_expediente={id}",
    "{base}/expediente/ficha/fichaRecursos.php?modo=ficha&id_expediente={id}",
];

static RECURSO_TABLE_SELECTORS: LazyLock<[Selector; 3]> = LazyLock::new(|| {
    [
        compile_static_selector("table#tbl_recursos"),
        compile_static_selector("table.tabla_datos"),
        compile_static_selector("table"),
    ]
});

static RECURSO_IDR_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?i)id_recurso=(\d+)"));

/// Result of a detection pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionOutcome {
    /// At least one section was registered.
    Found { sections: usize },
    /// Pages answered but no section matched.
    NoneFound,
    /// Every endpoint failed.
    Unreachable,
}

/// One recourse row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecursoRow {
    pub idr: String,
    pub titulo: String,
}

/// Detects the sections of `project_id` and writes the registry.
///
/// Sections already present in a stored registry keep their status and step
/// fields, and stored sections that are no longer detected are kept. When
/// nothing is reachable and nothing was stored, an empty registry is written.
///
/// # Errors
///
/// Only persistence failures are returned; portal failures are logged.
#[instrument(skip(portal, repository))]
pub async fn detect_sections(
    portal: &PortalClient,
    repository: &dyn ProjectRepository,
    project_id: &str,
) -> Result<DetectionOutcome, StoreError> {
    let mut reachable = false;
    let mut detected = Vec::new();

    for template in FICHA_TEMPLATES {
        let url = portal.render(template, project_id);
        match portal.fetch_page(&url).await {
            Ok(html) => {
                reachable = true;
                detected.extend(sections_in_ficha(&html, project_id));
                break;
            }
            Err(error) => warn!(url = %url, error = %error, "ficha endpoint failed"),
        }
    }

    for template in RECURSO_TEMPLATES {
        let url = portal.render(template, project_id);
        let html = match portal.fetch_page(&url).await {
            Ok(html) => html,
            Err(error) => {
                warn!(url = %url, error = %error, "recourse endpoint failed");
                continue;
            }
        };
        reachable = true;
        if let Some(rows) = parse_recursos(&html) {
            info!(url = %url, recursos = rows.len(), "recourse listing recognized");
            detected.extend(rows.iter().map(|row| Expediente::recurso(&row.idr, &row.titulo)));
            break;
        }
    }

    let found = detected.len();
    let previous = repository.load_registry(project_id)?.unwrap_or_default();
    let registry = merge_registry(previous, detected);
    repository.save_registry(project_id, &registry)?;

    let outcome = if found > 0 {
        DetectionOutcome::Found { sections: found }
    } else if reachable {
        DetectionOutcome::NoneFound
    } else {
        DetectionOutcome::Unreachable
    };
    info!(?outcome, registry = registry.len(), "detection finished");
    Ok(outcome)
}

/// Base sections whose fragments occur in the ficha page.
///
/// Sub-case sections switch to the id found in the page's anchors.
#[must_use]
pub fn sections_in_ficha(html: &str, project_id: &str) -> Vec<Expediente> {
    let sub_case_sources = anchor_sources(html);
    PROFILES
        .iter()
        .filter(|profile| profile.matches(html))
        .map(|profile| {
            let mut expediente = Expediente::base(profile.code, profile.titulo, project_id);
            if let Some(idr) = find_idr(profile, &sub_case_sources) {
                expediente.use_idr(&idr);
            }
            expediente
        })
        .collect()
}

/// `href` and `onclick` values of every anchor, in document order.
fn anchor_sources(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    document
        .select(&ANCHOR)
        .flat_map(|anchor| {
            let value = anchor.value();
            [value.attr("href"), value.attr("onclick")]
                .into_iter()
                .flatten()
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

fn find_idr(profile: &SectionProfile, sources: &[String]) -> Option<String> {
    profile.idr_pattern?;
    sources.iter().find_map(|source| profile.capture_idr(source))
}

/// Parses a recourse listing.
///
/// Returns `None` when the page holds neither a recognizable table nor a
/// summary mentioning recourses, so the caller tries the next endpoint.
#[must_use]
pub fn parse_recursos(html: &str) -> Option<Vec<RecursoRow>> {
    let document = Html::parse_document(html);
    for selector in RECURSO_TABLE_SELECTORS.iter() {
        for table in document.select(selector) {
            let rows: Vec<RecursoRow> =
                own_rows(table).into_iter().filter_map(recurso_row).collect();
            if !rows.is_empty() {
                return Some(dedup_rows(rows));
            }
        }
    }
    let summary = fold_text(&element_text(document.root_element()));
    summary.contains("recurso").then(Vec::new)
}

fn recurso_row(row: ElementRef<'_>) -> Option<RecursoRow> {
    let idr = row
        .select(&ANCHOR)
        .filter_map(anchor_target)
        .chain(row.value().attr("onclick").map(str::to_string))
        .find_map(|target| {
            RECURSO_IDR_RE
                .captures(&target)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
        })?;
    let titulo = row
        .select(&ANCHOR)
        .map(element_text)
        .find(|text| !text.is_empty())
        .unwrap_or_else(|| element_text(row));
    Some(RecursoRow { idr, titulo })
}

fn dedup_rows(rows: Vec<RecursoRow>) -> Vec<RecursoRow> {
    let mut seen = HashSet::new();
    rows.into_iter().filter(|row| seen.insert(row.idr.clone())).collect()
}

/// Combines a stored registry with freshly detected sections.
///
/// Detection refreshes identity fields; operator-facing status and step
/// progress of known sections are preserved.
#[must_use]
pub fn merge_registry(mut previous: Registry, detected: Vec<Expediente>) -> Registry {
    for mut fresh in detected {
        if let Some(known) = previous.get(&fresh.code) {
            fresh.status = known.status;
            fresh.step_index = known.step_index;
            fresh.step_status = known.step_status;
        }
        previous.insert(fresh.code.clone(), fresh);
    }
    previous
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{ExpedienteStatus, IdMode, StepStatus};

    #[test]
    fn test_sections_in_ficha_matches_fragments() {
        let html = r#"
            <a href="/expediente/xhr_expediente.php?id_expediente=12345678">Evaluación</a>
            <a href="javascript:void(0)" onclick="abrir('/expediente/xhr_pci.php?id_pci=991')">Consulta</a>"#;
        let sections = sections_in_ficha(html, "12345678");
        let codes: Vec<&str> = sections.iter().map(|e| e.code.as_str()).collect();
        assert_eq!(codes, vec!["EXEVA", "EXPCI"]);
        assert_eq!(sections[0].id_mode, IdMode::Idp);
        assert_eq!(sections[0].target_id, "12345678");
        assert_eq!(sections[1].id_mode, IdMode::Idr);
        assert_eq!(sections[1].target_id, "991");
    }

    #[test]
    fn test_parse_recursos_table_rows() {
        let html = r#"
            <table id="tbl_recursos">
              <tr><th>Recurso</th><th>Estado</th></tr>
              <tr><td><a href="/recursos/ficha.php?id_recurso=501">Recurso de reclamación</a></td><td>En trámite</td></tr>
              <tr><td><a href="/recursos/ficha.php?id_recurso=502">Invalidación</a></td><td>Cerrado</td></tr>
            </table>"#;
        let rows = parse_recursos(html).unwrap();
        assert_eq!(
            rows,
            vec![
                RecursoRow {
                    idr: "501".to_string(),
                    titulo: "Recurso de reclamación".to_string(),
                },
                RecursoRow {
                    idr: "502".to_string(),
                    titulo: "Invalidación".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_parse_recursos_summary_without_table() {
        assert_eq!(parse_recursos("<p>No existen recursos asociados</p>"), Some(Vec::new()));
        assert_eq!(parse_recursos("<p>Página no encontrada</p>"), None);
    }

    #[test]
    fn test_merge_registry_preserves_operator_status() {
        let mut previous = Registry::new();
        let mut known = Expediente::base("EXEVA", "Evaluación", "1");
        known.status = ExpedienteStatus::Verificado;
        known.record_step(6, StepStatus::Completado);
        previous.insert("EXEVA".to_string(), known);
        previous.insert("EXPAC".to_string(), Expediente::base("EXPAC", "PAC", "1"));

        let merged = merge_registry(previous, vec![Expediente::base("EXEVA", "Evaluación", "1")]);
        assert_eq!(merged["EXEVA"].status, ExpedienteStatus::Verificado);
        assert_eq!(merged["EXEVA"].step_index, 6);
        assert!(merged.contains_key("EXPAC"));
    }
}
