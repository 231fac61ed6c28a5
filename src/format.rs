//! Format classification for documents, attachments and archive members.
//!
//! Labels are either upper-case extensions from a curated table (`PDF`,
//! `DOCX`, `TAR.GZ`, ...) or one of the portal sentinels below. Comparisons are
//! case-insensitive throughout.

use url::Url;

/// Document rendered by the portal on request; captured through browser print.
pub const DOC_DIGITAL: &str = "doc digital";
/// Static PDF served by the electronic-signature service.
pub const PDF_FIRMADO: &str = "pdf firmado";
/// Listing row without a document link.
pub const SIN_ENLACE: &str = "sin enlace";
/// Directory node of an expanded archive.
pub const CARPETA: &str = "carpeta";
/// Row the portal flags as inactive.
pub const DOCUMENTO_INACTIVO: &str = "documento inactivo";
/// Nothing in the URL or title identifies the format.
pub const DESCONOCIDO: &str = "desconocido";

/// Hosts of the electronic-signature service.
pub const SIGNATURE_DOMAINS: &[&str] = &["firma.sea.gob.cl", "firmadigital.sea.gob.cl"];

/// Markup fragments identifying the "signed document" icon.
pub const SIGNED_ICON_MARKERS: &[&str] =
    &["icono_firma", "ico_firma", "firma_electronica", "firmado.png"];

/// Markup fragments identifying the "inactive document" icon.
pub const INACTIVE_ICON_MARKERS: &[&str] = &["doc_inactivo", "icono_inactivo", "inactivo.png"];

/// Broad family a label belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatCategory {
    Pdf,
    Image,
    Office,
    Presentation,
    Archive,
    DocDigital,
    Folder,
    Other,
}

/// Curated extension table. Multi-part extensions come first so they win over
/// their last component.
const EXTENSIONS: &[(&str, &str, FormatCategory)] = &[
    ("tar.gz", "TAR.GZ", FormatCategory::Archive),
    ("tar.bz2", "TAR.BZ2", FormatCategory::Archive),
    ("tgz", "TGZ", FormatCategory::Archive),
    ("zip", "ZIP", FormatCategory::Archive),
    ("rar", "RAR", FormatCategory::Archive),
    ("7z", "7Z", FormatCategory::Archive),
    ("pdf", "PDF", FormatCategory::Pdf),
    ("docx", "DOCX", FormatCategory::Office),
    ("doc", "DOC", FormatCategory::Office),
    ("rtf", "RTF", FormatCategory::Office),
    ("odt", "ODT", FormatCategory::Office),
    ("xlsx", "XLSX", FormatCategory::Office),
    ("xls", "XLS", FormatCategory::Office),
    ("ods", "ODS", FormatCategory::Office),
    ("pptx", "PPTX", FormatCategory::Presentation),
    ("ppsx", "PPSX", FormatCategory::Presentation),
    ("ppt", "PPT", FormatCategory::Presentation),
    ("pps", "PPS", FormatCategory::Presentation),
    ("odp", "ODP", FormatCategory::Presentation),
    ("jpeg", "JPEG", FormatCategory::Image),
    ("jpg", "JPG", FormatCategory::Image),
    ("png", "PNG", FormatCategory::Image),
    ("gif", "GIF", FormatCategory::Image),
    ("bmp", "BMP", FormatCategory::Image),
    ("tiff", "TIFF", FormatCategory::Image),
    ("tif", "TIF", FormatCategory::Image),
    ("webp", "WEBP", FormatCategory::Image),
    ("php", DOC_DIGITAL, FormatCategory::DocDigital),
    ("html", "HTML", FormatCategory::Other),
    ("htm", "HTM", FormatCategory::Other),
    ("txt", "TXT", FormatCategory::Other),
    ("csv", "CSV", FormatCategory::Other),
    ("xml", "XML", FormatCategory::Other),
    ("kmz", "KMZ", FormatCategory::Other),
    ("kml", "KML", FormatCategory::Other),
    ("shp", "SHP", FormatCategory::Other),
    ("dwg", "DWG", FormatCategory::Other),
    ("mp4", "MP4", FormatCategory::Other),
];

/// Infers a label: stored value, else URL path extension, else a substring
/// match against the title and the URL.
#[must_use]
pub fn infer_format(stored: Option<&str>, url: &str, titulo: &str) -> Option<String> {
    if let Some(stored) = stored.map(str::trim).filter(|s| !s.is_empty()) {
        return Some(stored.to_string());
    }
    label_from_url_path(url)
        .or_else(|| label_from_substring(titulo))
        .or_else(|| label_from_substring(url))
        .map(str::to_string)
}

/// Matches the URL path (query and fragment stripped) against the extension table.
#[must_use]
pub fn label_from_url_path(url: &str) -> Option<&'static str> {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_ascii_lowercase(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase(),
    };
    let last = path.rsplit('/').next().unwrap_or_default();
    label_from_file_name(last)
}

/// Matches a bare file name against the extension table.
#[must_use]
pub fn label_from_file_name(name: &str) -> Option<&'static str> {
    let lower = name.to_ascii_lowercase();
    EXTENSIONS.iter().find_map(|(ext, label, _)| {
        let stem_len = lower.len().checked_sub(ext.len() + 1)?;
        (stem_len > 0 && lower.ends_with(&format!(".{ext}"))).then_some(*label)
    })
}

fn label_from_substring(text: &str) -> Option<&'static str> {
    let lower = text.to_ascii_lowercase();
    EXTENSIONS
        .iter()
        .find(|(ext, _, _)| lower.contains(&format!(".{ext}")))
        .map(|(_, label, _)| *label)
}

/// Label for a listing row, from its link and signing markers.
///
/// Signature-service host wins; a signed icon without that host means the
/// document is rendered by the portal; an inactive icon yields the inactive
/// sentinel; otherwise the URL extension decides.
#[must_use]
pub fn label_from_markers(url: &str, row_markup: &str) -> String {
    let markup = row_markup.to_ascii_lowercase();
    if !url.is_empty() && is_signature_url(url) {
        return PDF_FIRMADO.to_string();
    }
    if SIGNED_ICON_MARKERS.iter().any(|m| markup.contains(m)) {
        return DOC_DIGITAL.to_string();
    }
    if INACTIVE_ICON_MARKERS.iter().any(|m| markup.contains(m)) {
        return DOCUMENTO_INACTIVO.to_string();
    }
    if url.trim().is_empty() {
        return SIN_ENLACE.to_string();
    }
    label_from_url_path(url).unwrap_or(DESCONOCIDO).to_string()
}

/// Returns true when `url` is served by the electronic-signature service.
#[must_use]
pub fn is_signature_url(url: &str) -> bool {
    match Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_ascii_lowercase)) {
        Some(host) => SIGNATURE_DOMAINS
            .iter()
            .any(|domain| host == *domain || host.ends_with(&format!(".{domain}"))),
        None => {
            let lower = url.to_ascii_lowercase();
            SIGNATURE_DOMAINS.iter().any(|domain| lower.contains(domain))
        }
    }
}

/// Category of a label.
#[must_use]
pub fn category(label: &str) -> FormatCategory {
    let lower = label.trim().to_ascii_lowercase();
    match lower.as_str() {
        PDF_FIRMADO => return FormatCategory::Pdf,
        DOC_DIGITAL => return FormatCategory::DocDigital,
        CARPETA => return FormatCategory::Folder,
        _ => {}
    }
    EXTENSIONS
        .iter()
        .find(|(ext, table_label, _)| lower == *ext || lower == table_label.to_ascii_lowercase())
        .map_or(FormatCategory::Other, |(_, _, category)| *category)
}

/// Whether items with this label are converted to the standard PDF.
#[must_use]
pub fn is_convertible(label: &str) -> bool {
    matches!(
        category(label),
        FormatCategory::Pdf
            | FormatCategory::Image
            | FormatCategory::Office
            | FormatCategory::Presentation
    )
}

/// File extension (with dot) a download with this label should carry.
#[must_use]
pub fn extension_for_label(label: &str) -> Option<String> {
    let lower = label.trim().to_ascii_lowercase();
    if lower == PDF_FIRMADO || lower == DOC_DIGITAL {
        return Some(".pdf".to_string());
    }
    EXTENSIONS
        .iter()
        .find(|(ext, table_label, _)| lower == *ext || lower == table_label.to_ascii_lowercase())
        .map(|(ext, _, _)| format!(".{ext}"))
}

/// Labels that never have a file to fetch.
#[must_use]
pub fn is_unfetchable(label: &str) -> bool {
    let lower = label.trim().to_ascii_lowercase();
    lower == SIN_ENLACE || lower == DOCUMENTO_INACTIVO
}
