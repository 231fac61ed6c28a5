//! Re-pagination of PDFs onto legal pages.
//!
//! Each page's content becomes a form XObject drawn, scaled and centered, on
//! a fresh 612x936 pt page. Landscape pages are turned a quarter clockwise
//! first, and any `/Rotate` on the source page is baked into the drawing.

use std::path::Path;

use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};
use tracing::debug;

use super::ConvertError;

/// Legal page width in points.
pub const LEGAL_WIDTH: f32 = 612.0;
/// Legal page height in points.
pub const LEGAL_HEIGHT: f32 = 936.0;
/// Allowed deviation from the legal box, in points.
pub const TOLERANCE: f32 = 3.0;

/// Parent links followed when resolving inherited page attributes.
const MAX_INHERITANCE: usize = 32;

/// Geometry of one source page.
#[derive(Debug, Clone, Copy, PartialEq)]
struct PageGeometry {
    x0: f32,
    y0: f32,
    width: f32,
    height: f32,
    rotate: i64,
}

impl PageGeometry {
    /// Size as a viewer shows it, with `/Rotate` applied.
    fn displayed(self) -> (f32, f32) {
        if self.rotate % 180 == 0 {
            (self.width, self.height)
        } else {
            (self.height, self.width)
        }
    }
}

/// Returns true when `(width, height)` matches the legal box within tolerance.
#[must_use]
pub fn is_legal_size(width: f32, height: f32) -> bool {
    (width - LEGAL_WIDTH).abs() <= TOLERANCE && (height - LEGAL_HEIGHT).abs() <= TOLERANCE
}

/// Displayed size of every page, in page order.
///
/// # Errors
///
/// Returns [`ConvertError`] when the file cannot be parsed or a page lacks a
/// media box.
pub fn page_sizes(path: &Path) -> Result<Vec<(f32, f32)>, ConvertError> {
    let doc = Document::load(path).map_err(|e| ConvertError::pdf(path, e))?;
    doc.get_pages()
        .into_iter()
        .map(|(number, id)| {
            geometry(&doc, id)
                .map(PageGeometry::displayed)
                .ok_or_else(|| ConvertError::MediaBox {
                    path: path.to_path_buf(),
                    page: number,
                })
        })
        .collect()
}

/// Writes `input` re-paginated onto legal pages at `output`.
///
/// A file whose pages are all legal already is copied byte for byte.
///
/// # Errors
///
/// Returns [`ConvertError`] on parse, geometry or write failures.
pub fn normalize_pdf(input: &Path, output: &Path) -> Result<(), ConvertError> {
    let mut doc = Document::load(input).map_err(|e| ConvertError::pdf(input, e))?;
    let pages: Vec<(u32, ObjectId)> = doc.get_pages().into_iter().collect();
    let mut plans = Vec::with_capacity(pages.len());
    for (number, id) in &pages {
        let page = geometry(&doc, *id).ok_or_else(|| ConvertError::MediaBox {
            path: input.to_path_buf(),
            page: *number,
        })?;
        plans.push((*id, page));
    }

    if !plans.is_empty()
        && plans.iter().all(|(_, page)| {
            let (w, h) = page.displayed();
            is_legal_size(w, h)
        })
    {
        debug!(input = %input.display(), "already legal, copying");
        std::fs::copy(input, output).map_err(|e| ConvertError::io(output, e))?;
        return Ok(());
    }

    for (id, page) in plans {
        wrap_page(&mut doc, id, page).map_err(|e| ConvertError::pdf(input, e))?;
    }
    doc.prune_objects();
    doc.save(output).map_err(|e| ConvertError::save(output, e.to_string()))?;
    Ok(())
}

/// Replaces a page's content with its old content as a form XObject placed
/// on a legal page.
fn wrap_page(
    doc: &mut Document,
    page_id: ObjectId,
    page: PageGeometry,
) -> Result<(), lopdf::Error> {
    let content = doc.get_page_content(page_id)?;
    let resources = inherited(doc, page_id, b"Resources")
        .unwrap_or_else(|| Object::Dictionary(Dictionary::new()));
    let form = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "BBox" => vec![
                Object::Real(page.x0),
                Object::Real(page.y0),
                Object::Real(page.x0 + page.width),
                Object::Real(page.y0 + page.height),
            ],
            "Resources" => resources,
        },
        content,
    );
    let form_id = doc.add_object(form);

    let matrix = placement(page);
    let ops = format!(
        "q {:.4} {:.4} {:.4} {:.4} {:.4} {:.4} cm /Fx0 Do Q",
        matrix[0], matrix[1], matrix[2], matrix[3], matrix[4], matrix[5]
    );
    let contents_id = doc.add_object(Stream::new(Dictionary::new(), ops.into_bytes()));

    let dict = doc.get_object_mut(page_id)?.as_dict_mut()?;
    for key in [&b"CropBox"[..], &b"TrimBox"[..], &b"BleedBox"[..], &b"ArtBox"[..]] {
        dict.remove(key);
    }
    dict.set(
        "MediaBox",
        vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Real(LEGAL_WIDTH),
            Object::Real(LEGAL_HEIGHT),
        ],
    );
    dict.set("Rotate", Object::Integer(0));
    dict.set("Contents", Object::Reference(contents_id));
    dict.set(
        "Resources",
        dictionary! {
            "XObject" => dictionary! { "Fx0" => Object::Reference(form_id) },
        },
    );
    Ok(())
}

/// `cm` matrix drawing the form's bounding box turned, scaled to fit and
/// centered on the legal page.
fn placement(page: PageGeometry) -> [f32; 6] {
    let (displayed_w, displayed_h) = page.displayed();
    let extra = if displayed_w > displayed_h { 90 } else { 0 };
    let turn = (page.rotate + extra).rem_euclid(360);
    let (w, h) = (page.width, page.height);
    let (out_w, out_h) = if turn % 180 == 0 { (w, h) } else { (h, w) };
    let s = (LEGAL_WIDTH / out_w).min(LEGAL_HEIGHT / out_h);
    let tx = (LEGAL_WIDTH - out_w * s) / 2.0;
    let ty = (LEGAL_HEIGHT - out_h * s) / 2.0;
    let (x0, y0) = (page.x0, page.y0);
    // Clockwise quarter turns of the box translated to the origin.
    match turn {
        90 => [0.0, -s, s, 0.0, tx - s * y0, ty + s * (w + x0)],
        180 => [-s, 0.0, 0.0, -s, tx + s * (w + x0), ty + s * (h + y0)],
        270 => [0.0, s, -s, 0.0, tx + s * (h + y0), ty - s * x0],
        _ => [s, 0.0, 0.0, s, tx - s * x0, ty - s * y0],
    }
}

fn geometry(doc: &Document, page_id: ObjectId) -> Option<PageGeometry> {
    let media_box = inherited(doc, page_id, b"MediaBox")?;
    let values: Vec<f32> = media_box
        .as_array()
        .ok()?
        .iter()
        .filter_map(|v| doc.dereference(v).ok().and_then(|(_, o)| o.as_float().ok()))
        .collect();
    let [a, b, c, d] = values.as_slice() else {
        return None;
    };
    let (x0, x1) = (a.min(*c), a.max(*c));
    let (y0, y1) = (b.min(*d), b.max(*d));
    if x1 - x0 <= 0.0 || y1 - y0 <= 0.0 {
        return None;
    }
    let rotate = inherited(doc, page_id, b"Rotate")
        .and_then(|o| o.as_i64().ok())
        .unwrap_or(0)
        .rem_euclid(360);
    Some(PageGeometry {
        x0,
        y0,
        width: x1 - x0,
        height: y1 - y0,
        rotate: rotate - rotate % 90,
    })
}

/// Looks `key` up on the page, then on its ancestors, resolving references.
fn inherited(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut current = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_INHERITANCE {
        if let Ok(value) = current.get(key) {
            return doc.dereference(value).ok().map(|(_, object)| object.clone());
        }
        let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
        current = doc.get_dictionary(parent).ok()?;
    }
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Writes a PDF with one page per `(width, height)` entry.
    pub(crate) fn write_pdf(path: &Path, sizes: &[(f32, f32)]) {
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
        let count = i64::try_from(kids.len()).unwrap();
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
        doc.save(path).unwrap();
    }

    #[test]
    fn test_legal_pdf_is_copied_byte_for_byte() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("legal.pdf");
        let output = dir.path().join("out.pdf");
        write_pdf(&input, &[(612.0, 936.0), (610.0, 938.0)]);

        normalize_pdf(&input, &output).unwrap();
        assert_eq!(std::fs::read(&input).unwrap(), std::fs::read(&output).unwrap());
    }

    #[test]
    fn test_letter_and_landscape_pages_become_legal() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("mixed.pdf");
        let output = dir.path().join("out.pdf");
        write_pdf(&input, &[(612.0, 792.0), (842.0, 595.0)]);

        normalize_pdf(&input, &output).unwrap();
        let sizes = page_sizes(&output).unwrap();
        assert_eq!(sizes.len(), 2);
        assert!(sizes.iter().all(|(w, h)| is_legal_size(*w, *h)), "{sizes:?}");
    }

    #[test]
    fn test_placement_fits_landscape_inside_page() {
        let page = PageGeometry {
            x0: 0.0,
            y0: 0.0,
            width: 842.0,
            height: 595.0,
            rotate: 0,
        };
        let [a, b, c, d, e, f] = placement(page);
        // Corners of the source box must land inside the legal page.
        for (x, y) in [(0.0, 0.0), (842.0, 0.0), (0.0, 595.0), (842.0, 595.0)] {
            let nx = a * x + c * y + e;
            let ny = b * x + d * y + f;
            assert!((-0.01..=LEGAL_WIDTH + 0.01).contains(&nx), "x {nx}");
            assert!((-0.01..=LEGAL_HEIGHT + 0.01).contains(&ny), "y {ny}");
        }
    }

    #[test]
    fn test_not_a_pdf_is_an_error() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("x.pdf");
        std::fs::write(&input, b"hello").unwrap();
        let result = normalize_pdf(&input, &dir.path().join("out.pdf"));
        assert!(matches!(result, Err(ConvertError::Pdf { .. })));
    }
}
