//! Conversion of downloaded files to legal-size PDFs.
//!
//! Converted files go to `{SECTION}/conv/`. A record's `estado_formato` moves
//! from `pendiente` to `convertido`, `no convertible` or `error`; archive
//! records stay `no convertible` themselves while the leaves of their
//! expanded tree are converted one by one.
//!
//! Everything here is blocking and runs on the coordinator's blocking thread.

mod error;
pub mod image;
pub mod office;
pub mod pdf;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

pub use error::ConvertError;

use crate::download::SectionLayout;
use crate::download::filename::resolve_unique_path;
use crate::format::{self, FormatCategory};
use crate::model::{DecompressedNode, EstadoFormato, FileItem, SectionDocument, relative_ruta};
use crate::render::OfficeRenderer;

/// Totals of one section pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConvertStats {
    pub converted: usize,
    pub not_convertible: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Dispatches files to the PDF, image or office path by format.
pub struct Converter {
    office: Arc<dyn OfficeRenderer>,
}

impl std::fmt::Debug for Converter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Converter").finish_non_exhaustive()
    }
}

/// Label used for conversion. `doc digital` records keep their label and
/// stay unconverted whatever file the browser produced; otherwise the file
/// name wins unless it is a portal script.
#[must_use]
pub fn effective_label(listed: &str, file_name: &str) -> String {
    if format::category(listed) == FormatCategory::DocDigital {
        return listed.to_string();
    }
    match format::label_from_file_name(file_name) {
        Some(label) if format::category(label) != FormatCategory::DocDigital => label.to_string(),
        _ => listed.to_string(),
    }
}

impl Converter {
    #[must_use]
    pub fn new(office: Arc<dyn OfficeRenderer>) -> Self {
        Self { office }
    }

    /// Converts one file. Partial output is removed on failure.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::NotConvertible`] for labels outside the
    /// convertible set, or the underlying conversion error.
    pub fn convert_file(
        &self,
        input: &Path,
        label: &str,
        output: &Path,
    ) -> Result<(), ConvertError> {
        let result = match format::category(label) {
            FormatCategory::Pdf => pdf::normalize_pdf(input, output),
            FormatCategory::Image => image::image_to_pdf(input, output),
            FormatCategory::Office | FormatCategory::Presentation => {
                office::office_to_pdf(self.office.as_ref(), input, output)
            }
            _ => Err(ConvertError::NotConvertible {
                label: label.to_string(),
            }),
        };
        if result.is_err() && output.exists() {
            let _ = std::fs::remove_file(output);
        }
        result
    }

    /// Converts every downloaded record and archive leaf of a section that
    /// still needs it. Failures are recorded on the record and never stop
    /// the section.
    #[instrument(skip_all, fields(section = %layout.section))]
    pub fn convert_section(
        &self,
        section: &mut SectionDocument,
        layout: &SectionLayout,
    ) -> ConvertStats {
        let mut stats = ConvertStats::default();
        let conv_dir = layout.conv_dir();
        if let Err(e) = std::fs::create_dir_all(&conv_dir) {
            warn!(dir = %conv_dir.display(), error = %e, "cannot create conversion directory");
            return stats;
        }
        for documento in &mut section.documentos {
            let n = documento.n.clone();
            self.convert_item(documento, &n, layout, &mut stats);
            for link in documento
                .anexos_detectados
                .iter_mut()
                .chain(documento.vinculados_detectados.iter_mut())
            {
                self.convert_item(link, &n, layout, &mut stats);
            }
        }
        info!(
            converted = stats.converted,
            not_convertible = stats.not_convertible,
            failed = stats.failed,
            skipped = stats.skipped,
            "conversion finished"
        );
        stats
    }

    fn convert_item(
        &self,
        item: &mut dyn FileItem,
        doc_n: &str,
        layout: &SectionLayout,
        stats: &mut ConvertStats,
    ) {
        let Some(ruta) = item.ruta().map(str::to_string) else {
            return;
        };
        let root = &layout.project_root;

        if let Some(tree) = item.descomprimidos_mut().as_mut() {
            self.convert_tree(tree, doc_n, layout, stats);
            if item.estado_formato() == EstadoFormato::Pendiente {
                item.set_conversion(None, EstadoFormato::NoConvertible);
            }
            return;
        }

        if !needs_conversion(item, root) {
            stats.skipped += 1;
            return;
        }
        let input = root.join(&ruta);
        let file_name = file_name_of(&input);
        let label = effective_label(item.formato(), &file_name);
        if !format::is_convertible(&label) {
            item.set_conversion(None, EstadoFormato::NoConvertible);
            stats.not_convertible += 1;
            return;
        }
        let stem = file_stem_of(&input);
        let stem = if stem.starts_with(doc_n) {
            stem
        } else {
            format!("{doc_n}_{stem}")
        };
        match self.convert_into(&input, &label, &stem, layout) {
            Ok(conv) => {
                item.set_conversion(Some(conv), EstadoFormato::Convertido);
                stats.converted += 1;
            }
            Err(error) => {
                warn!(ruta = %ruta, label = %label, error = %error, "conversion failed");
                item.set_conversion(None, EstadoFormato::Error);
                stats.failed += 1;
            }
        }
    }

    fn convert_tree(
        &self,
        tree: &mut DecompressedNode,
        doc_n: &str,
        layout: &SectionLayout,
        stats: &mut ConvertStats,
    ) {
        let root = &layout.project_root;
        tree.for_each_leaf_mut(&mut |leaf| {
            let already_done = leaf
                .conv
                .as_ref()
                .is_some_and(|conv| root.join(conv).is_file());
            if already_done || leaf.error {
                stats.skipped += 1;
                return;
            }
            let label = effective_label(&leaf.formato, &leaf.nombre);
            if !format::is_convertible(&label) {
                stats.not_convertible += 1;
                return;
            }
            let input = root.join(&leaf.ruta);
            let stem = format!("{doc_n}_{}", file_stem_of(&input));
            match self.convert_into(&input, &label, &stem, layout) {
                Ok(conv) => {
                    leaf.conv = Some(conv);
                    stats.converted += 1;
                }
                Err(error) => {
                    warn!(ruta = %leaf.ruta, error = %error, "archive member conversion failed");
                    leaf.conv = None;
                    leaf.error = true;
                    stats.failed += 1;
                }
            }
        });
    }

    /// Converts into a fresh `conv/{stem}.pdf` and returns its `ruta`.
    fn convert_into(
        &self,
        input: &Path,
        label: &str,
        stem: &str,
        layout: &SectionLayout,
    ) -> Result<String, ConvertError> {
        let output = resolve_unique_path(&layout.conv_dir(), &format!("{stem}.pdf"));
        self.convert_file(input, label, &output)?;
        debug!(input = %input.display(), output = %output.display(), "converted");
        relative_ruta(&layout.project_root, &output).ok_or_else(|| {
            let _ = std::fs::remove_file(&output);
            let reason = std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "output outside project root",
            );
            ConvertError::io(output.clone(), reason)
        })
    }
}

/// Pending records, and converted records whose output went missing.
fn needs_conversion(item: &dyn FileItem, project_root: &Path) -> bool {
    match item.estado_formato() {
        EstadoFormato::Pendiente => true,
        EstadoFormato::Convertido => !item
            .conv()
            .is_some_and(|conv| project_root.join(conv).is_file()),
        EstadoFormato::NoConvertible | EstadoFormato::Error => false,
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn file_stem_of(path: &Path) -> String {
    path.file_stem()
        .map_or_else(|| PathBuf::from("documento"), PathBuf::from)
        .to_string_lossy()
        .into_owned()
}
