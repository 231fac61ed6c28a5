//! Hierarchical ordinals and per-document counters.
//!
//! Attachments, linked documents and every level of an expanded archive get
//! three-digit ordinals (`001`, `002`, ...) in list order. Running the indexer
//! twice gives the same result.

use tracing::debug;

use crate::model::{DecompressedNode, Documento, LinkItem, SectionDocument};

/// Ordinal given to a lone archive root.
pub const ROOT_ORDINAL: &str = "001";

/// Hard stop for malformed, cyclic-looking trees.
const MAX_TREE_DEPTH: usize = 64;

/// Three-digit ordinal for a zero-based position.
#[must_use]
pub fn ordinal(index: usize) -> String {
    format!("{:03}", index + 1)
}

/// Indexes every document of a section and refreshes its summary.
pub fn index_section(section: &mut SectionDocument) {
    for documento in &mut section.documentos {
        index_documento(documento);
    }
    section.refresh_summary();
    debug!(documents = section.documentos.len(), "section indexed");
}

/// Numbers the attachment lists only. Used before attachment downloads so
/// their file names carry the ordinal.
pub fn index_links(section: &mut SectionDocument) {
    for documento in &mut section.documentos {
        number_links(&mut documento.anexos_detectados);
        number_links(&mut documento.vinculados_detectados);
    }
}

/// Indexes one document and recomputes its file counters.
pub fn index_documento(documento: &mut Documento) {
    number_links(&mut documento.anexos_detectados);
    number_links(&mut documento.vinculados_detectados);
    if let Some(root) = documento.descomprimidos.as_mut() {
        index_root(root);
    }
    for link in documento
        .anexos_detectados
        .iter_mut()
        .chain(documento.vinculados_detectados.iter_mut())
    {
        if let Some(root) = link.descomprimidos.as_mut() {
            index_root(root);
        }
    }

    let (total, pdf) = count_files(documento);
    documento.archivos_totales = total;
    documento.archivos_pdf = pdf;
}

fn number_links(links: &mut [LinkItem]) {
    for (index, link) in links.iter_mut().enumerate() {
        link.n = Some(ordinal(index));
    }
}

fn index_root(root: &mut DecompressedNode) {
    if root.n.is_none() {
        root.n = Some(ROOT_ORDINAL.to_string());
    }
    index_children(root, 0);
}

fn index_children(node: &mut DecompressedNode, depth: usize) {
    if depth >= MAX_TREE_DEPTH {
        return;
    }
    let Some(children) = node.contenido.as_mut() else {
        return;
    };
    for (index, child) in children.iter_mut().enumerate() {
        child.n = Some(ordinal(index));
        index_children(child, depth + 1);
    }
}

/// `(files, pdf files)` a document stands for: its own file, or the leaves of
/// its expanded archive, plus the same for each attachment.
fn count_files(documento: &Documento) -> (usize, usize) {
    let own = record_count(
        documento.ruta.is_some(),
        documento.conv.is_some() || is_pdf(&documento.formato),
        documento.descomprimidos.as_ref(),
    );
    documento
        .anexos_detectados
        .iter()
        .chain(&documento.vinculados_detectados)
        .map(|link| {
            record_count(
                link.ruta.is_some(),
                link.conv.is_some() || is_pdf(&link.tipo),
                link.descomprimidos.as_ref(),
            )
        })
        .fold(own, |(total, pdf), (t, p)| (total + t, pdf + p))
}

fn record_count(downloaded: bool, pdf: bool, tree: Option<&DecompressedNode>) -> (usize, usize) {
    match tree {
        Some(root) => root.count_leaves(),
        None if downloaded => (1, usize::from(pdf)),
        None => (0, 0),
    }
}

fn is_pdf(label: &str) -> bool {
    crate::format::category(label) == crate::format::FormatCategory::Pdf
}
