//! Archive expansion and PDF conversion on real files.

use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use expediente_core::convert::Converter;
use expediente_core::convert::pdf::{is_legal_size, page_sizes};
use expediente_core::download::SectionLayout;
use expediente_core::index::index_section;
use expediente_core::model::{Documento, EstadoFormato, SectionDocument};
use expediente_core::unpack::ArchiveExpander;
use tempfile::TempDir;

mod support;
use support::fixtures::{StubOffice, letter_pdf, pdf_bytes};

fn zip_bytes(members: &[(&str, &[u8])]) -> Vec<u8> {
    zip_bytes_with(members, zip::CompressionMethod::Deflated)
}

fn zip_bytes_with(members: &[(&str, &[u8])], method: zip::CompressionMethod) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = zip::write::SimpleFileOptions::default().compression_method(method);
        for (name, content) in members {
            writer.start_file(*name, options).expect("start zip member");
            writer.write_all(content).expect("write zip member");
        }
        writer.finish().expect("finish zip");
    }
    cursor.into_inner()
}

/// Zip nested `levels` deep with a PDF at the bottom.
fn nested_zip(levels: usize) -> Vec<u8> {
    let mut bytes = zip_bytes(&[("fondo.pdf", letter_pdf().as_slice())]);
    for level in 1..levels {
        let name = format!("nivel{level}.zip");
        bytes = zip_bytes(&[(name.as_str(), bytes.as_slice())]);
    }
    bytes
}

/// Places `bytes` as the downloaded file of document `0001` and returns its section.
fn section_with_file(root: &Path, file_name: &str, formato: &str, bytes: &[u8]) -> SectionDocument {
    let layout = SectionLayout::new(root, "EXEVA");
    let bucket = layout.bucket(1);
    std::fs::create_dir_all(&bucket).expect("bucket");
    std::fs::write(bucket.join(file_name), bytes).expect("file");
    SectionDocument::from_documents(vec![Documento {
        n: "0001".to_string(),
        titulo: "Adjunto".to_string(),
        url_documento: "https://seia.sea.gob.cl/archivos/adjunto".to_string(),
        formato: formato.to_string(),
        ruta: Some(format!("EXEVA/files/00/{file_name}")),
        ..Documento::default()
    }])
}

fn converter() -> (Converter, Arc<StubOffice>) {
    let office = Arc::new(StubOffice::default());
    (Converter::new(office.clone()), office)
}

#[test]
fn test_nesting_beyond_limit_stops_with_recursion_failure() {
    let root = TempDir::new().expect("temp dir");
    let mut section = section_with_file(root.path(), "0001_Adjunto.zip", "ZIP", &nested_zip(4));

    let stats = ArchiveExpander::new(2, "unrar", "7z").expand_section(&mut section, root.path());

    assert_eq!(stats.archives, 1);
    assert_eq!(section.fallos_descompresion.len(), 1);
    let fallo = &section.fallos_descompresion[0];
    assert_eq!(fallo.archivo, "nivel2.zip");
    assert!(fallo.error.contains("deeper than 2"), "{}", fallo.error);

    let tree = section.documentos[0].descomprimidos.as_ref().expect("tree");
    let level3 = &tree.contenido.as_ref().expect("children")[0];
    assert_eq!(level3.nombre, "nivel3.zip");
    let level2 = &level3.contenido.as_ref().expect("nested children")[0];
    assert!(level2.error);
    assert!(level2.contenido.is_none());
}

#[test]
fn test_nesting_within_limit_reaches_the_bottom() {
    let root = TempDir::new().expect("temp dir");
    let mut section = section_with_file(root.path(), "0001_Adjunto.zip", "ZIP", &nested_zip(3));

    ArchiveExpander::new(20, "unrar", "7z").expand_section(&mut section, root.path());
    index_section(&mut section);

    assert!(section.fallos_descompresion.is_empty());
    let documento = &section.documentos[0];
    assert_eq!(documento.archivos_totales, 1);
    let (leaves, _) = documento.descomprimidos.as_ref().expect("tree").count_leaves();
    assert_eq!(leaves, 1);
}

#[test]
fn test_corrupt_archive_is_reported_and_section_continues() {
    let root = TempDir::new().expect("temp dir");
    let mut section =
        section_with_file(root.path(), "0001_Adjunto.zip", "ZIP", b"not a zip at all");

    let stats = ArchiveExpander::new(20, "unrar", "7z").expand_section(&mut section, root.path());

    assert_eq!(stats.failures, 1);
    assert!(section.documentos[0].descomprimidos.is_none());
    assert_eq!(section.fallos_descompresion[0].archivo, "0001_Adjunto.zip");
    assert!(!root.path().join("EXEVA/files/00/0001_Adjunto").exists());
}

#[test]
fn test_corrupt_member_is_reported_and_healthy_members_are_kept() {
    let root = TempDir::new().expect("temp dir");
    let damaged = b"contenido-del-miembro-danado";
    let mut archive = zip_bytes_with(
        &[("bueno.txt", b"todo bien"), ("malo.txt", damaged)],
        zip::CompressionMethod::Stored,
    );
    let offset = archive
        .windows(damaged.len())
        .position(|window| window == damaged)
        .expect("stored member data");
    archive[offset] ^= 0xFF;
    let mut section = section_with_file(root.path(), "0001_Adjunto.zip", "ZIP", &archive);
    let expander = ArchiveExpander::new(20, "unrar", "7z");

    let stats = expander.expand_section(&mut section, root.path());

    assert_eq!(stats.failures, 1);
    let fallo = &section.fallos_descompresion[0];
    assert_eq!(fallo.archivo, "malo.txt");
    assert_eq!(fallo.ruta, "EXEVA/files/00/0001_Adjunto/malo.txt");
    let expanded = root.path().join("EXEVA/files/00/0001_Adjunto");
    assert_eq!(std::fs::read(expanded.join("bueno.txt")).expect("kept"), b"todo bien");
    assert!(!expanded.join("malo.txt").exists());
    let tree = section.documentos[0].descomprimidos.as_ref().expect("tree");
    let names: Vec<&str> = tree
        .contenido
        .as_ref()
        .expect("children")
        .iter()
        .map(|node| node.nombre.as_str())
        .collect();
    assert_eq!(names, vec!["bueno.txt"]);

    // The archive is not extracted again, and the failure stays on record.
    expander.expand_section(&mut section, root.path());
    assert_eq!(section.fallos_descompresion.len(), 1);
    assert_eq!(section.fallos_descompresion[0].archivo, "malo.txt");
}

#[cfg(unix)]
fn write_script(dir: &Path, name: &str, body: &str) -> String {
    use std::os::unix::fs::PermissionsExt as _;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    path.display().to_string()
}

#[cfg(unix)]
fn member_names(section: &SectionDocument) -> Vec<String> {
    section.documentos[0]
        .descomprimidos
        .as_ref()
        .and_then(|tree| tree.contenido.as_ref())
        .map(|children| children.iter().map(|node| node.nombre.clone()).collect())
        .unwrap_or_default()
}

// One test drives every external extractor so no other test forks while a
// script is being written.
#[cfg(unix)]
#[test]
fn test_rar_falls_back_to_external_extractors() {
    let tools = TempDir::new().expect("tools dir");
    let unrar = write_script(
        tools.path(),
        "unrar-stub",
        r#"for last; do :; done
printf 'unrar' > "${last}desde_unrar.txt""#,
    );
    let sevenzip = write_script(
        tools.path(),
        "7z-stub",
        r#"for arg; do case "$arg" in -o*) dest="${arg#-o}" ;; esac; done
printf '7z' > "$dest/desde_7z.txt""#,
    );
    let missing = tools.path().join("no-existe").display().to_string();

    // The library cannot read the file, so the external unrar runs.
    let root = TempDir::new().expect("temp dir");
    let mut section = section_with_file(root.path(), "0001_Adjunto.rar", "RAR", b"Rar! basura");
    let stats = ArchiveExpander::new(20, unrar.as_str(), sevenzip.as_str())
        .expand_section(&mut section, root.path());
    assert_eq!(stats.failures, 0, "{:?}", section.fallos_descompresion);
    assert_eq!(member_names(&section), vec!["desde_unrar.txt"]);

    // Without unrar, 7z is next.
    let root = TempDir::new().expect("temp dir");
    let mut section = section_with_file(root.path(), "0001_Adjunto.rar", "RAR", b"Rar! basura");
    ArchiveExpander::new(20, missing.as_str(), sevenzip.as_str())
        .expand_section(&mut section, root.path());
    assert!(section.fallos_descompresion.is_empty());
    assert_eq!(member_names(&section), vec!["desde_7z.txt"]);

    // With neither tool the archive is reported and nothing is left behind.
    let root = TempDir::new().expect("temp dir");
    let mut section = section_with_file(root.path(), "0001_Adjunto.rar", "RAR", b"Rar! basura");
    let stats = ArchiveExpander::new(20, missing.as_str(), missing.as_str())
        .expand_section(&mut section, root.path());
    assert_eq!(stats.failures, 1);
    let fallo = &section.fallos_descompresion[0];
    assert_eq!(fallo.archivo, "0001_Adjunto.rar");
    assert!(fallo.error.contains("cannot extract rar archive"), "{}", fallo.error);
    assert!(fallo.error.contains("no-existe"), "{}", fallo.error);
    assert!(section.documentos[0].descomprimidos.is_none());
    assert!(!root.path().join("EXEVA/files/00/0001_Adjunto").exists());
}

#[test]
fn test_docx_conversion_yields_only_legal_pages() {
    let root = TempDir::new().expect("temp dir");
    let mut section = section_with_file(root.path(), "0001_Informe.docx", "DOCX", b"PK fake docx");
    let layout = SectionLayout::new(root.path(), "EXEVA");
    let (converter, office) = converter();

    let stats = converter.convert_section(&mut section, &layout);

    assert_eq!(stats.converted, 1);
    assert_eq!(office.calls.load(Ordering::SeqCst), 1);
    let documento = &section.documentos[0];
    assert_eq!(documento.estado_formato, EstadoFormato::Convertido);
    let conv = root.path().join(documento.conv.as_ref().expect("conv"));
    let sizes = page_sizes(&conv).expect("readable output");
    assert_eq!(sizes.len(), 2);
    assert!(sizes.iter().all(|(w, h)| is_legal_size(*w, *h)), "{sizes:?}");
}

#[test]
fn test_legal_pdf_is_copied_byte_for_byte() {
    let root = TempDir::new().expect("temp dir");
    let legal = pdf_bytes(&[(612.0, 936.0), (611.0, 934.5)]);
    let mut section = section_with_file(root.path(), "0001_Acta.pdf", "PDF", &legal);
    let layout = SectionLayout::new(root.path(), "EXEVA");
    let (converter, _) = converter();

    converter.convert_section(&mut section, &layout);

    let conv = root
        .path()
        .join(section.documentos[0].conv.as_ref().expect("conv"));
    assert_eq!(std::fs::read(conv).expect("conv file"), legal);
}

#[test]
fn test_archive_leaves_are_converted_and_kept_across_reexpansion() {
    let root = TempDir::new().expect("temp dir");
    let archive = zip_bytes(&[("anexo.pdf", letter_pdf().as_slice()), ("datos.csv", b"a,b")]);
    let mut section = section_with_file(root.path(), "0001_Adjunto.zip", "ZIP", &archive);
    let layout = SectionLayout::new(root.path(), "EXEVA");
    let expander = ArchiveExpander::new(20, "unrar", "7z");
    let (converter, _) = converter();

    expander.expand_section(&mut section, root.path());
    converter.convert_section(&mut section, &layout);
    let first_conv = leaf_conv(&section, "anexo.pdf").expect("leaf converted");
    assert!(first_conv.starts_with("EXEVA/conv/0001_"), "{first_conv}");
    assert_eq!(section.documentos[0].estado_formato, EstadoFormato::NoConvertible);

    // A second pass reuses the extracted tree and keeps the recorded output.
    expander.expand_section(&mut section, root.path());
    let stats = converter.convert_section(&mut section, &layout);
    assert_eq!(leaf_conv(&section, "anexo.pdf"), Some(first_conv));
    assert_eq!(stats.converted, 0);
}

fn leaf_conv(section: &SectionDocument, nombre: &str) -> Option<String> {
    section.documentos[0]
        .descomprimidos
        .as_ref()?
        .contenido
        .as_ref()?
        .iter()
        .find(|node| node.nombre == nombre)
        .and_then(|node| node.conv.clone())
}
