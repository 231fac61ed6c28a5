//! Per-section extraction profiles.
//!
//! Every section shares one parser; what differs is the set of URL fragments
//! that reveal the section on the ficha page, the listing endpoints, the table
//! markup the portal favors there and, for sub-case sections, the pattern that
//! carries the sub-case id.

use std::sync::LazyLock;

use regex::Regex;

use crate::model::RECURSO_FETCH_CODE;
use crate::portal::html::compile_static_regex;

/// Physical table layout a listing endpoint returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Markup {
    /// One `td` per column, in fixed order.
    Flat,
    /// Each row wraps a label/value table.
    Nested,
}

/// Static configuration for one section code.
#[derive(Debug)]
pub struct SectionProfile {
    pub code: &'static str,
    pub titulo: &'static str,
    /// Ficha-page fragments; the section is present if any occurs.
    pub fragments: &'static [&'static str],
    /// Pattern capturing a sub-case id from anchors, when the section lives
    /// under its own id.
    pub idr_pattern: Option<&'static LazyLock<Regex>>,
    /// Listing endpoints, tried in order.
    pub list_templates: &'static [&'static str],
    pub markup: Markup,
}

static PCI_IDR_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?i)id_(?:pci|consulta)=(\d+)"));
static A86_IDR_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?i)id_(?:reunion|art86)=(\d+)"));

/// Known sections, in registry order.
pub static PROFILES: &[SectionProfile] = &[
    SectionProfile {
        code: "EXEVA",
        titulo: "Expediente de evaluación",
        fragments: &["xhr_expediente.php", "expedientesEvaluacion.php"],
        idr_pattern: None,
        list_templates: &[
            "{base}/expediente/xhr_expediente.php?id_expediente={id}",
            "{base}/expediente/expedientesEvaluacion.php?modo=ficha&id_expediente={id}",
        ],
        markup: Markup::Flat,
    },
    SectionProfile {
        code: "EXPAC",
        titulo: "Participación ciudadana",
        fragments: &["xhr_pac.php", "expedientesPac.php", "participacionCiudadana"],
        idr_pattern: None,
        list_templates: &[
            "{base}/expediente/xhr_pac.php?id_expediente={id}",
            "{base}/expediente/expedientesPac.php?modo=ficha&id_expediente={id}",
        ],
        markup: Markup::Nested,
    },
    SectionProfile {
        code: "EXPCI",
        titulo: "Consulta indígena",
        fragments: &["xhr_pci.php", "consultaIndigena"],
        idr_pattern: Some(&PCI_IDR_RE),
        list_templates: &[
            "{base}/expediente/xhr_pci.php?id_pci={id}",
            "{base}/expediente/consultaIndigena.php?modo=ficha&id_pci={id}",
        ],
        markup: Markup::Nested,
    },
    SectionProfile {
        code: "EXA86",
        titulo: "Reuniones artículo 86",
        fragments: &["xhr_art86.php", "reunionesArt86"],
        idr_pattern: Some(&A86_IDR_RE),
        list_templates: &[
            "{base}/expediente/xhr_art86.php?id_reunion={id}",
            "{base}/expediente/reunionesArt86.php?modo=ficha&id_reunion={id}",
        ],
        markup: Markup::Flat,
    },
    SectionProfile {
        code: "EXRCA",
        titulo: "Revisión de la calificación",
        fragments: &["xhr_revision_rca.php", "revisionRca"],
        idr_pattern: None,
        list_templates: &[
            "{base}/expediente/xhr_revision_rca.php?id_expediente={id}",
            "{base}/expediente/revisionRca.php?modo=ficha&id_expediente={id}",
        ],
        markup: Markup::Flat,
    },
    SectionProfile {
        code: RECURSO_FETCH_CODE,
        titulo: "Recurso",
        fragments: &[],
        idr_pattern: None,
        list_templates: &[
            "{base}/recursos/xhr_documentos_recurso.php?id_recurso={id}",
            "{base}/recursos/documentosRecurso.php?modo=ficha&id_recurso={id}",
        ],
        markup: Markup::Nested,
    },
];

/// Profile for a fetch code.
#[must_use]
pub fn profile(fetch_code: &str) -> Option<&'static SectionProfile> {
    PROFILES.iter().find(|p| p.code == fetch_code)
}

impl SectionProfile {
    /// Whether any signature fragment occurs in `html`.
    #[must_use]
    pub fn matches(&self, html: &str) -> bool {
        self.fragments.iter().any(|fragment| html.contains(fragment))
    }

    /// First sub-case id captured by this profile's pattern in `text`.
    #[must_use]
    pub fn capture_idr(&self, text: &str) -> Option<String> {
        let pattern = self.idr_pattern?;
        pattern
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }
}
