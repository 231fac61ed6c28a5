//! Filename derivation, sanitization, and path resolution for downloads.
//!
//! A download is stored as `{n}_{title}{ext}` inside its bucket directory.
//! The extension comes from the first source that yields one:
//! Content-Disposition, URL path, format label, Content-Type.

use std::path::{Component, Path, PathBuf};

use url::Url;

use crate::format;

/// Longest title fragment kept in a file stem, in characters.
pub const MAX_TITLE_CHARS: usize = 80;

/// Items per `files/{NN}` bucket.
pub const BUCKET_SIZE: usize = 100;

/// Two-digit bucket directory for a document ordinal.
#[must_use]
pub fn bucket_dir(ordinal: usize) -> String {
    format!("{:02}", ordinal / BUCKET_SIZE)
}

/// File stem `{n}_{title}` with the title sanitized and truncated.
#[must_use]
pub fn item_stem(n: &str, titulo: &str) -> String {
    let title: String = sanitize_filename_component(titulo)
        .chars()
        .take(MAX_TITLE_CHARS)
        .collect();
    let title = title.trim_end_matches(['_', '.']);
    let n = sanitize_filename_component(n);
    match (n.is_empty(), title.is_empty()) {
        (true, true) => "documento".to_string(),
        (true, false) => title.to_string(),
        (false, true) => n,
        (false, false) => format!("{n}_{title}"),
    }
}

/// Picks the extension (with dot, lower-case) for a response.
#[must_use]
pub fn choose_extension(
    content_disposition: Option<&str>,
    url: &str,
    label: &str,
    content_type: Option<&str>,
) -> String {
    if let Some(ext) = content_disposition
        .and_then(parse_content_disposition)
        .and_then(|name| extension_from_name(&name))
    {
        return ext;
    }
    if let Some(ext) = extension_from_url(url) {
        return ext;
    }
    if let Some(ext) = format::extension_for_label(label) {
        return ext;
    }
    content_type.map_or_else(
        || ".bin".to_string(),
        |ct| extension_from_content_type(ct).to_string(),
    )
}

/// Extension of a bare file name; portal script names yield none.
fn extension_from_name(name: &str) -> Option<String> {
    match format::label_from_file_name(name) {
        Some(format::DOC_DIGITAL) => None,
        Some(label) => Some(format!(".{}", label.to_ascii_lowercase())),
        None => {
            let dot = name.rfind('.')?;
            let ext = &name[dot..];
            (ext.len() > 1 && ext.len() <= 12).then(|| ext.to_lowercase())
        }
    }
}

/// Extension of the last URL path segment, including multi-part ones.
pub(crate) fn extension_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last_segment = parsed.path_segments()?.next_back()?;
    extension_from_name(last_segment)
}

pub(crate) fn sanitize_filename_component(value: &str) -> String {
    let mut out = String::new();
    let mut prev_sep = false;
    for ch in value.chars() {
        let mapped = match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\'' => '_',
            c if c.is_whitespace() || c.is_control() => '_',
            c if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') => c,
            _ => '_',
        };
        if mapped == '_' {
            if !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else {
            out.push(mapped);
            prev_sep = false;
        }
    }
    out.trim_matches('_').to_string()
}

/// Guess file extension from Content-Type header.
pub(crate) fn extension_from_content_type(content_type: &str) -> &'static str {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();

    match mime.as_str() {
        "application/pdf" => ".pdf",
        "text/html" => ".html",
        "text/plain" => ".txt",
        "application/xml" | "text/xml" => ".xml",
        "image/jpeg" => ".jpg",
        "image/png" => ".png",
        "image/gif" => ".gif",
        "image/tiff" => ".tif",
        "image/bmp" => ".bmp",
        "application/zip" | "application/x-zip-compressed" => ".zip",
        "application/x-rar-compressed" | "application/vnd.rar" => ".rar",
        "application/x-7z-compressed" => ".7z",
        "application/msword" => ".doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => ".docx",
        "application/vnd.ms-excel" => ".xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => ".xlsx",
        "application/vnd.ms-powerpoint" => ".ppt",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation" => ".pptx",
        "video/mp4" => ".mp4",
        _ => ".bin",
    }
}

/// Parses Content-Disposition header to extract filename.
///
/// Handles both:
/// - `attachment; filename="example.pdf"`
/// - `attachment; filename=example.pdf`
/// - `attachment; filename*=UTF-8''example.pdf` (RFC 5987)
pub(crate) fn parse_content_disposition(header: &str) -> Option<String> {
    if let Some(pos) = header.find("filename*=") {
        let start = pos + 10;
        let value = header[start..].trim();
        // charset'language'encoded_value
        if let Some(quote_pos) = value.find("''") {
            let encoded = &value[quote_pos + 2..];
            let end = encoded.find(';').unwrap_or(encoded.len());
            let encoded_name = &encoded[..end].trim();
            if let Ok(decoded) = urlencoding::decode(encoded_name) {
                return Some(decoded.into_owned());
            }
        }
    }

    if let Some(pos) = header.find("filename=") {
        let start = pos + 9;
        let value = header[start..].trim();

        if let Some(stripped) = value.strip_prefix('"') {
            if let Some(end) = stripped.find('"') {
                return Some(stripped[..end].to_string());
            }
        } else {
            let end = value.find(';').unwrap_or(value.len());
            let filename = value[..end].trim();
            if !filename.is_empty() {
                return Some(filename.to_string());
            }
        }
    }

    None
}

/// Sanitizes filename for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems:
/// / \ : * ? " < > |
pub(crate) fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

/// Resolves a unique file path, adding numeric suffix if file exists.
pub(crate) fn resolve_unique_path(dir: &Path, filename: &str) -> PathBuf {
    resolve_unique_path_with_suffix_start(dir, filename, 1)
}

/// Resolves a unique file path with configurable duplicate suffix start.
///
/// Example with `suffix_start = 2`: `file.pdf`, then `file_2.pdf`, `file_3.pdf`, ...
pub(crate) fn resolve_unique_path_with_suffix_start(
    dir: &Path,
    filename: &str,
    suffix_start: usize,
) -> PathBuf {
    let filename = {
        let sanitized = sanitize_filename(filename);
        if sanitized.contains('/')
            || sanitized.contains('\\')
            || sanitized.trim_matches('_').is_empty()
        {
            "documento.bin".to_string()
        } else {
            sanitized
        }
    };
    let base_path = dir.join(&filename);

    if !base_path.exists() {
        return base_path;
    }

    let (stem, ext) = match filename.rfind('.') {
        Some(pos) if pos > 0 => (&filename[..pos], &filename[pos..]),
        _ => (filename.as_str(), ""),
    };

    for i in suffix_start..1000 {
        let new_path = dir.join(format!("{stem}_{i}{ext}"));
        if !new_path.exists() {
            return new_path;
        }
    }

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    dir.join(format!("{stem}_{timestamp}{ext}"))
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::Component;

    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_filename_removes_invalid_chars() {
        assert_eq!(sanitize_filename("file/name.pdf"), "file_name.pdf");
        assert_eq!(sanitize_filename("file\\name.pdf"), "file_name.pdf");
        assert_eq!(sanitize_filename("file:name.pdf"), "file_name.pdf");
        assert_eq!(sanitize_filename("file<name>.pdf"), "file_name_.pdf");
        assert_eq!(sanitize_filename("file|name.pdf"), "file_name.pdf");
    }

    #[test]
    fn test_sanitize_filename_rewrites_dot_segments() {
        assert_eq!(sanitize_filename("."), "_");
        assert_eq!(sanitize_filename(".."), "__");
    }

    #[test]
    fn test_bucket_dir_groups_by_hundreds() {
        assert_eq!(bucket_dir(1), "00");
        assert_eq!(bucket_dir(99), "00");
        assert_eq!(bucket_dir(100), "01");
        assert_eq!(bucket_dir(1234), "12");
    }

    #[test]
    fn test_item_stem_sanitizes_and_truncates() {
        assert_eq!(
            item_stem("0003", "Informe: Línea de base / Anexo 2"),
            "0003_Informe_Línea_de_base_Anexo_2"
        );
        let long = "x".repeat(200);
        assert_eq!(item_stem("0001", &long).chars().count(), 5 + MAX_TITLE_CHARS);
        assert_eq!(item_stem("", ""), "documento");
    }

    #[test]
    fn test_choose_extension_precedence() {
        assert_eq!(
            choose_extension(
                Some(r#"attachment; filename="Planos.ZIP""#),
                "https://h/descargar.php?id=1",
                "desconocido",
                Some("application/octet-stream"),
            ),
            ".zip"
        );
        assert_eq!(
            choose_extension(None, "https://h/archivos/capas.tar.gz?x=1", "", None),
            ".tar.gz"
        );
        assert_eq!(
            choose_extension(None, "https://h/descargar.php?id=1", "DOCX", None),
            ".docx"
        );
        assert_eq!(
            choose_extension(
                None,
                "https://h/descargar.php?id=1",
                "desconocido",
                Some("application/pdf")
            ),
            ".pdf"
        );
        assert_eq!(
            choose_extension(None, "https://h/descargar.php?id=1", "desconocido", None),
            ".bin"
        );
    }

    #[test]
    fn test_parse_content_disposition_variants() {
        assert_eq!(
            parse_content_disposition(r#"attachment; filename="example.pdf""#),
            Some("example.pdf".to_string())
        );
        assert_eq!(
            parse_content_disposition("attachment; filename=example.pdf; size=10"),
            Some("example.pdf".to_string())
        );
        assert_eq!(
            parse_content_disposition("attachment; filename*=UTF-8''resoluci%C3%B3n.pdf"),
            Some("resolución.pdf".to_string())
        );
        assert_eq!(parse_content_disposition("inline"), None);
    }

    #[test]
    fn test_extension_from_content_type_strips_parameters() {
        assert_eq!(extension_from_content_type("application/pdf; charset=binary"), ".pdf");
        assert_eq!(extension_from_content_type("APPLICATION/ZIP"), ".zip");
        assert_eq!(extension_from_content_type("application/x-unknown"), ".bin");
    }

    #[test]
    fn test_resolve_unique_path_with_conflict() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("test.pdf"), b"existing").unwrap();
        let path = resolve_unique_path(temp_dir.path(), "test.pdf");
        assert_eq!(path, temp_dir.path().join("test_1.pdf"));

        std::fs::write(&path, b"existing").unwrap();
        let path = resolve_unique_path_with_suffix_start(temp_dir.path(), "test.pdf", 2);
        assert_eq!(path, temp_dir.path().join("test_2.pdf"));
    }

    #[test]
    fn test_resolve_unique_path_protects_against_traversal() {
        let temp_dir = TempDir::new().unwrap();
        let path = resolve_unique_path(temp_dir.path(), "../../etc/passwd");
        assert!(path.starts_with(temp_dir.path()));
        assert!(
            path.strip_prefix(temp_dir.path())
                .unwrap()
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        );
    }
}
