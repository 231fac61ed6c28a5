//! Persisted data model: the expediente registry, per-section document lists,
//! attachment items and decompressed archive trees.
//!
//! Field names follow the on-disk JSON contract shared with the GUI and the
//! report compiler, so several fields are renamed for serialization.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Registry of every section detected for a project, keyed by section code.
pub type Registry = BTreeMap<String, Expediente>;

/// Whether a section belongs to the base case or is a dynamically discovered recourse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpedienteTipo {
    Base,
    Recurso,
}

/// Operator-facing lifecycle of a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpedienteStatus {
    Detectado,
    Edicion,
    Verificado,
    Error,
}

/// Which identifier the extractor must query with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdMode {
    /// Primary case id.
    Idp,
    /// Sub-case id discovered inside the case page.
    Idr,
}

/// Status of the most recent pipeline step for a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum StepStatus {
    #[default]
    #[serde(rename = "pendiente")]
    Pendiente,
    #[serde(rename = "en curso")]
    EnCurso,
    #[serde(rename = "completado")]
    Completado,
    #[serde(rename = "error")]
    Error,
}

/// Conversion state of a leaf item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EstadoFormato {
    #[default]
    #[serde(rename = "pendiente")]
    Pendiente,
    #[serde(rename = "convertido")]
    Convertido,
    #[serde(rename = "no convertible")]
    NoConvertible,
    #[serde(rename = "error")]
    Error,
}

/// A named sub-case of the project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expediente {
    pub code: String,
    pub titulo: String,
    pub tipo: ExpedienteTipo,
    pub status: ExpedienteStatus,
    #[serde(default)]
    pub step_index: u8,
    #[serde(default)]
    pub step_status: StepStatus,
    pub target_id: String,
    pub id_mode: IdMode,
    /// Extraction profile used by the scraper (`EXREC` for recourse sections).
    pub fetch_code: String,
}

impl Expediente {
    /// Creates a base section queried by the primary case id.
    #[must_use]
    pub fn base(code: &str, titulo: &str, project_id: &str) -> Self {
        Self {
            code: code.to_string(),
            titulo: titulo.to_string(),
            tipo: ExpedienteTipo::Base,
            status: ExpedienteStatus::Detectado,
            step_index: 0,
            step_status: StepStatus::Pendiente,
            target_id: project_id.to_string(),
            id_mode: IdMode::Idp,
            fetch_code: code.to_string(),
        }
    }

    /// Creates a recourse section keyed by its synthesized code.
    #[must_use]
    pub fn recurso(idr: &str, titulo: &str) -> Self {
        Self {
            code: format!("{RECURSO_PREFIX}{idr}"),
            titulo: titulo.to_string(),
            tipo: ExpedienteTipo::Recurso,
            status: ExpedienteStatus::Detectado,
            step_index: 0,
            step_status: StepStatus::Pendiente,
            target_id: idr.to_string(),
            id_mode: IdMode::Idr,
            fetch_code: RECURSO_FETCH_CODE.to_string(),
        }
    }

    /// Switches the section to query by a discovered sub-case id.
    pub fn use_idr(&mut self, idr: &str) {
        self.target_id = idr.to_string();
        self.id_mode = IdMode::Idr;
    }

    /// Records progress of a pipeline step.
    pub fn record_step(&mut self, step_index: u8, step_status: StepStatus) {
        self.step_index = step_index;
        self.step_status = step_status;
    }

    /// Moves `status` forward; never moves it backwards.
    pub fn advance_status(&mut self, next: ExpedienteStatus) {
        if self.status == ExpedienteStatus::Error || next > self.status {
            self.status = next;
        }
    }

    /// Operator-triggered restart of a failed section.
    pub fn reset_error(&mut self) {
        if self.status == ExpedienteStatus::Error {
            self.status = ExpedienteStatus::Detectado;
            self.step_status = StepStatus::Pendiente;
        }
    }
}

/// Key prefix for recourse sections in the registry.
pub const RECURSO_PREFIX: &str = "REC_";

/// Extraction profile shared by every recourse section.
pub const RECURSO_FETCH_CODE: &str = "EXREC";

/// A downloadable attachment or linked document nested under a [`Documento`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    pub url: String,
    pub titulo: String,
    /// Inferred format label.
    #[serde(default)]
    pub tipo: String,
    /// Free-text origin/info column from the listing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origen: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ruta: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conv: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
    #[serde(default)]
    pub estado_formato: EstadoFormato,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descomprimidos: Option<DecompressedNode>,
}

/// A node of an expanded archive tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecompressedNode {
    pub nombre: String,
    pub formato: String,
    pub ruta: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conv: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contenido: Option<Vec<DecompressedNode>>,
}

impl DecompressedNode {
    /// Returns true for directory nodes.
    #[must_use]
    pub fn is_folder(&self) -> bool {
        self.formato == crate::format::CARPETA
    }

    /// Visits every leaf file of the tree, depth first.
    pub fn for_each_leaf_mut(&mut self, visit: &mut dyn FnMut(&mut DecompressedNode)) {
        if self.contenido.is_none() {
            if !self.is_folder() {
                visit(self);
            }
            return;
        }
        for child in self.contenido.iter_mut().flatten() {
            child.for_each_leaf_mut(visit);
        }
    }

    /// Counts `(leaves, pdf_leaves)` below this node.
    #[must_use]
    pub fn count_leaves(&self) -> (usize, usize) {
        match &self.contenido {
            Some(children) => children.iter().fold((0, 0), |(total, pdf), child| {
                let (t, p) = child.count_leaves();
                (total + t, pdf + p)
            }),
            None if self.is_folder() => (0, 0),
            None => (1, usize::from(self.conv.is_some() || is_pdf_label(&self.formato))),
        }
    }
}

/// A primary document listed in a section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Documento {
    pub n: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numero: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folio: Option<String>,
    pub titulo: String,
    #[serde(default)]
    pub remitido_por: String,
    #[serde(default)]
    pub destinado_a: String,
    #[serde(default)]
    pub fecha: String,
    #[serde(default)]
    pub hora: String,
    #[serde(rename = "URL_documento", default)]
    pub url_documento: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_anexos: Option<String>,
    pub formato: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ruta: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conv: Option<String>,
    #[serde(default)]
    pub anexos_revisados: bool,
    #[serde(default)]
    pub anexos_detectados: Vec<LinkItem>,
    #[serde(default)]
    pub vinculados_detectados: Vec<LinkItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descomprimidos: Option<DecompressedNode>,
    #[serde(default)]
    pub archivos_totales: usize,
    #[serde(default)]
    pub archivos_pdf: usize,
    #[serde(default)]
    pub estado_formato: EstadoFormato,
}

impl Documento {
    /// Numeric value of the ordinal, if well formed.
    #[must_use]
    pub fn ordinal(&self) -> Option<usize> {
        self.n.parse().ok()
    }
}

/// Common view over records that own a downloadable file.
pub trait FileItem {
    fn url(&self) -> &str;
    fn titulo(&self) -> &str;
    fn formato(&self) -> &str;
    fn ruta(&self) -> Option<&str>;
    fn has_error(&self) -> bool;
    fn conv(&self) -> Option<&str>;
    fn estado_formato(&self) -> EstadoFormato;
    fn descomprimidos_mut(&mut self) -> &mut Option<DecompressedNode>;

    /// Records a successful download and clears any previous failure.
    fn mark_downloaded(&mut self, ruta: String);
    /// Records a failed download, leaving the rest of the record unchanged.
    fn mark_download_failed(&mut self);
    /// Records a conversion result.
    fn set_conversion(&mut self, conv: Option<String>, estado: EstadoFormato);
}

macro_rules! impl_file_item {
    ($ty:ty, $url:ident, $formato:ident) => {
        impl FileItem for $ty {
            fn url(&self) -> &str {
                &self.$url
            }
            fn titulo(&self) -> &str {
                &self.titulo
            }
            fn formato(&self) -> &str {
                &self.$formato
            }
            fn ruta(&self) -> Option<&str> {
                self.ruta.as_deref()
            }
            fn has_error(&self) -> bool {
                self.error
            }
            fn conv(&self) -> Option<&str> {
                self.conv.as_deref()
            }
            fn estado_formato(&self) -> EstadoFormato {
                self.estado_formato
            }
            fn descomprimidos_mut(&mut self) -> &mut Option<DecompressedNode> {
                &mut self.descomprimidos
            }
            fn mark_downloaded(&mut self, ruta: String) {
                self.ruta = Some(ruta);
                self.error = false;
            }
            fn mark_download_failed(&mut self) {
                self.error = true;
            }
            fn set_conversion(&mut self, conv: Option<String>, estado: EstadoFormato) {
                self.conv = conv;
                self.estado_formato = estado;
            }
        }
    };
}

impl_file_item!(Documento, url_documento, formato);
impl_file_item!(LinkItem, url, tipo);

/// One archive member or archive that could not be expanded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FalloDescompresion {
    pub archivo: String,
    pub ruta: String,
    pub error: String,
}

/// Total count and format histogram of a section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resumen {
    pub total: usize,
    pub formatos: BTreeMap<String, usize>,
}

/// Contents of `{SECTION}/{project}_{SECTION}.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SectionDocument {
    #[serde(default)]
    pub documentos: Vec<Documento>,
    #[serde(default)]
    pub resumen: Resumen,
    #[serde(default)]
    pub fallos_descompresion: Vec<FalloDescompresion>,
}

impl SectionDocument {
    /// Builds a section document from freshly extracted rows.
    #[must_use]
    pub fn from_documents(documentos: Vec<Documento>) -> Self {
        let mut doc = Self {
            documentos,
            ..Self::default()
        };
        doc.refresh_summary();
        doc
    }

    /// Recomputes `resumen` from the current documents.
    pub fn refresh_summary(&mut self) {
        let mut formatos = BTreeMap::new();
        for documento in &self.documentos {
            *formatos.entry(documento.formato.clone()).or_insert(0) += 1;
        }
        self.resumen = Resumen {
            total: self.documentos.len(),
            formatos,
        };
    }

    /// Resolves an operator address such as `0003`, `0003/anexos/002` or
    /// `0003/vinculados/001`.
    #[must_use]
    pub fn resolve_address(&self, address: &str) -> Option<ItemAddress> {
        let mut parts = address.trim().trim_matches('/').split('/');
        let doc_n = parts.next()?;
        let doc = self.documentos.iter().position(|d| d.n == doc_n)?;
        let Some(kind) = parts.next() else {
            return Some(ItemAddress::Documento { doc });
        };
        let item_n = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        let list = match kind {
            "anexos" => &self.documentos[doc].anexos_detectados,
            "vinculados" => &self.documentos[doc].vinculados_detectados,
            _ => return None,
        };
        let item = list
            .iter()
            .position(|link| link.n.as_deref() == Some(item_n))?;
        Some(if kind == "anexos" {
            ItemAddress::Anexo { doc, item }
        } else {
            ItemAddress::Vinculado { doc, item }
        })
    }

    /// Borrows the record an address points at.
    pub fn item_mut(&mut self, address: ItemAddress) -> Option<&mut dyn FileItem> {
        match address {
            ItemAddress::Documento { doc } => self
                .documentos
                .get_mut(doc)
                .map(|d| d as &mut dyn FileItem),
            ItemAddress::Anexo { doc, item } => self
                .documentos
                .get_mut(doc)?
                .anexos_detectados
                .get_mut(item)
                .map(|l| l as &mut dyn FileItem),
            ItemAddress::Vinculado { doc, item } => self
                .documentos
                .get_mut(doc)?
                .vinculados_detectados
                .get_mut(item)
                .map(|l| l as &mut dyn FileItem),
        }
    }

    /// Borrows the record an address points at, immutably.
    #[must_use]
    pub fn item(&self, address: ItemAddress) -> Option<&dyn FileItem> {
        match address {
            ItemAddress::Documento { doc } => self.documentos.get(doc).map(|d| d as &dyn FileItem),
            ItemAddress::Anexo { doc, item } => self
                .documentos
                .get(doc)?
                .anexos_detectados
                .get(item)
                .map(|l| l as &dyn FileItem),
            ItemAddress::Vinculado { doc, item } => self
                .documentos
                .get(doc)?
                .vinculados_detectados
                .get(item)
                .map(|l| l as &dyn FileItem),
        }
    }

    /// Every primary document address, in listing order.
    #[must_use]
    pub fn document_addresses(&self) -> Vec<ItemAddress> {
        (0..self.documentos.len())
            .map(|doc| ItemAddress::Documento { doc })
            .collect()
    }

    /// Every attachment and linked-document address, in listing order.
    #[must_use]
    pub fn link_addresses(&self) -> Vec<ItemAddress> {
        let mut out = Vec::new();
        for (doc, documento) in self.documentos.iter().enumerate() {
            out.extend(
                (0..documento.anexos_detectados.len())
                    .map(|item| ItemAddress::Anexo { doc, item }),
            );
            out.extend(
                (0..documento.vinculados_detectados.len())
                    .map(|item| ItemAddress::Vinculado { doc, item }),
            );
        }
        out
    }
}

/// Position of a downloadable record inside a [`SectionDocument`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemAddress {
    Documento { doc: usize },
    Anexo { doc: usize, item: usize },
    Vinculado { doc: usize, item: usize },
}

impl ItemAddress {
    /// Index of the owning document.
    #[must_use]
    pub fn doc(self) -> usize {
        match self {
            Self::Documento { doc } | Self::Anexo { doc, .. } | Self::Vinculado { doc, .. } => doc,
        }
    }
}

impl fmt::Display for ItemAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Documento { doc } => write!(f, "doc[{doc}]"),
            Self::Anexo { doc, item } => write!(f, "doc[{doc}]/anexos[{item}]"),
            Self::Vinculado { doc, item } => write!(f, "doc[{doc}]/vinculados[{item}]"),
        }
    }
}

fn is_pdf_label(label: &str) -> bool {
    let lower = label.to_ascii_lowercase();
    lower == "pdf" || lower == crate::format::PDF_FIRMADO || lower == crate::format::DOC_DIGITAL
}

/// Converts an absolute path under `root` to the forward-slash relative form stored in `ruta`.
///
/// Returns `None` when `path` is not below `root`.
#[must_use]
pub fn relative_ruta(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}
