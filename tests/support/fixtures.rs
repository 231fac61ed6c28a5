//! Portal pages, PDFs and renderer stubs shared by the integration tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use expediente_core::{BrowserRenderer, OfficeRenderer, RenderError, Settings};
use lopdf::{Dictionary, Document, Object, Stream, dictionary};

pub const PROJECT_ID: &str = "12345678";

/// Serialized PDF with one page per `(width, height)` entry.
pub fn pdf_bytes(sizes: &[(f32, f32)]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::new();
    for (w, h) in sizes {
        let content_id = doc.add_object(Stream::new(
            Dictionary::new(),
            b"0 0 m 100 100 l S".to_vec(),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(*w),
                Object::Real(*h),
            ],
        });
        kids.push(Object::Reference(page_id));
    }
    let count = i64::try_from(kids.len()).expect("page count fits i64");
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    let mut out = Vec::new();
    doc.save_to(&mut out).expect("serialize pdf");
    out
}

/// Letter-size single page, the usual office export.
pub fn letter_pdf() -> Vec<u8> {
    pdf_bytes(&[(612.0, 792.0)])
}

/// Ficha page revealing the evaluation section.
pub fn ficha_html() -> String {
    r#"<html><body>
<div id="menu">
  <a href="/expediente/xhr_expediente.php?id_expediente=12345678">Expediente de evaluación</a>
</div>
</body></html>"#
        .to_string()
}

/// One flat listing row.
pub struct Row<'a> {
    pub numero: &'a str,
    pub titulo: &'a str,
    pub href: &'a str,
    pub anexos: Option<&'a str>,
    /// Extra markup inside the document cell, e.g. a signature icon.
    pub icon: &'a str,
}

impl<'a> Row<'a> {
    pub fn new(numero: &'a str, titulo: &'a str, href: &'a str) -> Self {
        Self {
            numero,
            titulo,
            href,
            anexos: None,
            icon: "",
        }
    }
}

/// Flat listing table with a header row.
pub fn listing_html(rows: &[Row<'_>]) -> String {
    let mut body = String::from(
        "<html><body><table><tr><th>#</th><th>Número</th><th>Documento</th><th>Remitido por</th>\
         <th>Destinado a</th><th>Fecha</th><th>Anexos</th></tr>",
    );
    for (index, row) in rows.iter().enumerate() {
        let anexos = row
            .anexos
            .map(|href| format!(r#"<a href="{href}">Ver anexos</a>"#))
            .unwrap_or_default();
        body.push_str(&format!(
            r#"<tr><td>{}</td><td>{}</td><td><a href="{}">{}</a>{}</td><td>SEA</td><td>Titular</td><td>01/02/2024 10:15</td><td>{anexos}</td></tr>"#,
            index + 1,
            row.numero,
            row.href,
            row.titulo,
            row.icon,
        ));
    }
    body.push_str("</table></body></html>");
    body
}

/// Settings pointing at a mock portal with a temporary base dir.
pub fn settings(portal_url: &str, base_dir: &Path) -> Settings {
    Settings {
        base_dir: base_dir.to_path_buf(),
        portal_url: portal_url.to_string(),
        page_timeout_secs: 5,
        download_timeout_secs: 5,
        ..Settings::default()
    }
}

/// Browser stub writing a fixed PDF and counting calls.
#[derive(Debug, Default)]
pub struct StubPrinter {
    pub calls: AtomicUsize,
}

#[async_trait]
impl BrowserRenderer for StubPrinter {
    async fn print_to_pdf(&self, _url: &str, output: &Path) -> Result<(), RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::fs::write(output, letter_pdf()).map_err(|e| RenderError::io(output, e))
    }
}

/// Office stub producing a letter-size PDF next to the requested directory.
#[derive(Debug, Default)]
pub struct StubOffice {
    pub calls: AtomicUsize,
}

impl OfficeRenderer for StubOffice {
    fn convert_to_pdf(&self, input: &Path, out_dir: &Path) -> Result<PathBuf, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let stem = input
            .file_stem()
            .map_or_else(|| "out".to_string(), |s| s.to_string_lossy().into_owned());
        let output = out_dir.join(format!("{stem}.pdf"));
        std::fs::write(&output, pdf_bytes(&[(612.0, 792.0), (792.0, 612.0)]))
            .map_err(|e| RenderError::io(&output, e))?;
        Ok(output)
    }
}

pub fn renderers() -> (Arc<StubPrinter>, Arc<StubOffice>) {
    (Arc::new(StubPrinter::default()), Arc::new(StubOffice::default()))
}
