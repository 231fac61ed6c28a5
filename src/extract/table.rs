//! Listing table parsers.
//!
//! Three strategies, tried in order starting with the section's preferred
//! markup: flat rows of direct cells, rows wrapping a label/value table, and a
//! header-keyword scan over every table on the page.

use scraper::{ElementRef, Html};
use url::Url;

use super::sections::Markup;
use crate::format;
use crate::model::Documento;
use crate::portal::html::{
    TABLE, absolutize_url, direct_cells, element_text, first_link, fold_text, own_rows,
};

/// Fixed column order of the flat markup.
const FLAT_NUMERO: usize = 1;
const FLAT_DOCUMENTO: usize = 2;
const FLAT_REMITIDO: usize = 3;
const FLAT_DESTINADO: usize = 4;
const FLAT_FECHA: usize = 5;
const FLAT_ANEXOS: usize = 6;
const FLAT_MIN_CELLS: usize = 6;

/// Header keywords a table must contain for the heuristic fallback.
const HEURISTIC_KEYWORDS: &[&str] = &["documento", "fecha"];

/// Parses a listing page into documents numbered `0001`, `0002`, ...
///
/// Returns an empty list when no strategy recognizes a table.
#[must_use]
pub fn parse_listing(html: &str, preferred: Markup, page_url: &Url) -> Vec<Documento> {
    let document = Html::parse_document(html);
    let order = match preferred {
        Markup::Flat => [Markup::Flat, Markup::Nested],
        Markup::Nested => [Markup::Nested, Markup::Flat],
    };
    let mut rows = Vec::new();
    for markup in order {
        rows = match markup {
            Markup::Flat => parse_flat(&document, page_url),
            Markup::Nested => parse_nested(&document, page_url),
        };
        if !rows.is_empty() {
            break;
        }
    }
    if rows.is_empty() {
        rows = parse_heuristic(&document, page_url);
    }
    for (index, documento) in rows.iter_mut().enumerate() {
        documento.n = format!("{:04}", index + 1);
    }
    rows
}

/// Fields collected from one row before they become a [`Documento`].
#[derive(Debug, Default)]
struct RowFields {
    numero: Option<String>,
    folio: Option<String>,
    titulo: String,
    url: String,
    remitido_por: String,
    destinado_a: String,
    fecha_hora: String,
    link_anexos: Option<String>,
}

impl RowFields {
    fn into_documento(self, row_markup: &str) -> Documento {
        let (fecha, hora) = split_fecha_hora(&self.fecha_hora);
        let formato = format::label_from_markers(&self.url, row_markup);
        Documento {
            numero: self.numero.filter(|s| !s.is_empty()),
            folio: self.folio.filter(|s| !s.is_empty()),
            titulo: self.titulo,
            remitido_por: self.remitido_por,
            destinado_a: self.destinado_a,
            fecha,
            hora,
            url_documento: self.url,
            link_anexos: self.link_anexos,
            formato,
            ..Documento::default()
        }
    }

    fn set_document_cell(&mut self, cell: ElementRef<'_>, page_url: &Url) {
        match first_link(cell) {
            Some((href, text)) => {
                self.url = absolutize_url(&href, page_url).unwrap_or(href);
                self.titulo = if text.is_empty() { element_text(cell) } else { text };
            }
            None => self.titulo = element_text(cell),
        }
    }

    fn set_numero_cell(&mut self, text: &str) {
        match text.split_once('/') {
            Some((numero, folio)) => {
                self.numero = Some(numero.trim().to_string());
                self.folio = Some(folio.trim().to_string());
            }
            None => self.numero = Some(text.trim().to_string()),
        }
    }
}

fn anexos_link(cell: ElementRef<'_>, page_url: &Url) -> Option<String> {
    first_link(cell).and_then(|(href, _)| absolutize_url(&href, page_url))
}

/// Splits `dd/mm/yyyy hh:mm` into date and time.
fn split_fecha_hora(text: &str) -> (String, String) {
    let mut parts = text.split_whitespace();
    let fecha = parts.next().unwrap_or_default().to_string();
    let hora = parts.collect::<Vec<_>>().join(" ");
    (fecha, hora)
}

fn has_nested_table(row: ElementRef<'_>) -> bool {
    row.select(&TABLE).next().is_some()
}

fn is_header_row(row: ElementRef<'_>) -> bool {
    direct_cells(row).iter().any(|c| c.value().name() == "th")
}

fn parse_flat(document: &Html, page_url: &Url) -> Vec<Documento> {
    for table in document.select(&TABLE) {
        let mut out = Vec::new();
        for row in own_rows(table) {
            if is_header_row(row) || has_nested_table(row) {
                continue;
            }
            let cells = direct_cells(row);
            if cells.len() < FLAT_MIN_CELLS {
                continue;
            }
            let mut fields = RowFields::default();
            fields.set_numero_cell(&element_text(cells[FLAT_NUMERO]));
            fields.set_document_cell(cells[FLAT_DOCUMENTO], page_url);
            fields.remitido_por = element_text(cells[FLAT_REMITIDO]);
            fields.destinado_a = element_text(cells[FLAT_DESTINADO]);
            fields.fecha_hora = element_text(cells[FLAT_FECHA]);
            fields.link_anexos = cells
                .get(FLAT_ANEXOS)
                .and_then(|cell| anexos_link(*cell, page_url));
            out.push(fields.into_documento(&row.html()));
        }
        if !out.is_empty() {
            return out;
        }
    }
    Vec::new()
}

fn parse_nested(document: &Html, page_url: &Url) -> Vec<Documento> {
    for table in document.select(&TABLE) {
        let mut out = Vec::new();
        for row in own_rows(table) {
            let Some(inner) = direct_cells(row).into_iter().find_map(|cell| {
                cell.children()
                    .filter_map(ElementRef::wrap)
                    .find(|c| c.value().name() == "table")
            }) else {
                continue;
            };
            let mut fields = RowFields::default();
            let mut seen_label = false;
            for pair in own_rows(inner) {
                let cells = direct_cells(pair);
                let [label, value, ..] = cells.as_slice() else {
                    continue;
                };
                let label = fold_text(&element_text(*label));
                seen_label = true;
                if label.contains("numero") {
                    fields.numero = Some(element_text(*value));
                } else if label.contains("folio") {
                    fields.folio = Some(element_text(*value));
                } else if label.contains("documento") || label.contains("titulo") {
                    fields.set_document_cell(*value, page_url);
                } else if label.contains("remitido") || label.contains("remitente") {
                    fields.remitido_por = element_text(*value);
                } else if label.contains("destinado") || label.contains("destinatario") {
                    fields.destinado_a = element_text(*value);
                } else if label.contains("fecha") {
                    fields.fecha_hora = element_text(*value);
                } else if label.contains("anexo") {
                    fields.link_anexos = anexos_link(*value, page_url);
                }
            }
            if seen_label && !(fields.titulo.is_empty() && fields.url.is_empty()) {
                out.push(fields.into_documento(&row.html()));
            }
        }
        if !out.is_empty() {
            return out;
        }
    }
    Vec::new()
}

/// Column positions discovered from a header row.
#[derive(Debug, Default)]
struct HeaderColumns {
    numero: Option<usize>,
    folio: Option<usize>,
    documento: Option<usize>,
    remitido: Option<usize>,
    destinado: Option<usize>,
    fecha: Option<usize>,
    anexos: Option<usize>,
}

impl HeaderColumns {
    fn from_header(cells: &[ElementRef<'_>]) -> Self {
        let mut columns = Self::default();
        for (index, cell) in cells.iter().enumerate() {
            let text = fold_text(&element_text(*cell));
            let slot = if text.contains("folio") {
                &mut columns.folio
            } else if text.contains("numero") {
                &mut columns.numero
            } else if text.contains("documento") || text.contains("titulo") {
                &mut columns.documento
            } else if text.contains("remit") {
                &mut columns.remitido
            } else if text.contains("destin") {
                &mut columns.destinado
            } else if text.contains("fecha") {
                &mut columns.fecha
            } else if text.contains("anexo") {
                &mut columns.anexos
            } else {
                continue;
            };
            slot.get_or_insert(index);
        }
        columns
    }
}

fn text_at(cells: &[ElementRef<'_>], col: Option<usize>) -> Option<String> {
    col.and_then(|i| cells.get(i)).map(|c| element_text(*c))
}

fn parse_heuristic(document: &Html, page_url: &Url) -> Vec<Documento> {
    for table in document.select(&TABLE) {
        let rows = own_rows(table);
        let Some(header_at) = rows.iter().position(|row| {
            let text = fold_text(&element_text(*row));
            HEURISTIC_KEYWORDS.iter().all(|k| text.contains(k))
        }) else {
            continue;
        };
        let columns = HeaderColumns::from_header(&direct_cells(rows[header_at]));
        let Some(documento_col) = columns.documento else {
            continue;
        };
        let mut out = Vec::new();
        for row in &rows[header_at + 1..] {
            let cells = direct_cells(*row);
            let Some(doc_cell) = cells.get(documento_col) else {
                continue;
            };
            let mut fields = RowFields::default();
            fields.set_document_cell(*doc_cell, page_url);
            if fields.titulo.is_empty() && fields.url.is_empty() {
                continue;
            }
            fields.numero = text_at(&cells, columns.numero);
            fields.folio = text_at(&cells, columns.folio);
            fields.remitido_por = text_at(&cells, columns.remitido).unwrap_or_default();
            fields.destinado_a = text_at(&cells, columns.destinado).unwrap_or_default();
            fields.fecha_hora = text_at(&cells, columns.fecha).unwrap_or_default();
            fields.link_anexos = columns
                .anexos
                .and_then(|i| cells.get(i))
                .and_then(|cell| anexos_link(*cell, page_url));
            out.push(fields.into_documento(&row.html()));
        }
        if !out.is_empty() {
            return out;
        }
    }
    Vec::new()
}
