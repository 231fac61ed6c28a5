//! Single-page legal PDFs from raster images.

use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, ImageFormat};
use lopdf::{Dictionary, Document, Object, Stream, dictionary};

use super::ConvertError;
use super::pdf::{LEGAL_HEIGHT, LEGAL_WIDTH};

/// Blank border around the image, in points.
pub const MARGIN: f32 = 36.0;

/// Writes `input` as a one-page legal PDF at `output`.
///
/// Landscape images are turned a quarter clockwise. The image is scaled to
/// fit inside the margin, keeping its aspect ratio, and centered.
///
/// # Errors
///
/// Returns [`ConvertError`] when the image cannot be decoded or the PDF
/// cannot be written.
pub fn image_to_pdf(input: &Path, output: &Path) -> Result<(), ConvertError> {
    let mut picture = image::open(input).map_err(|e| ConvertError::image(input, e))?;
    if picture.width() > picture.height() {
        picture = picture.rotate90();
    }
    let rgb = DynamicImage::ImageRgb8(picture.to_rgb8());
    let mut jpeg = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
        .map_err(|e| ConvertError::image(input, e))?;

    let (width, height) = (rgb.width(), rgb.height());
    #[allow(clippy::cast_precision_loss)]
    let (w, h) = (width as f32, height as f32);
    let scale = ((LEGAL_WIDTH - 2.0 * MARGIN) / w).min((LEGAL_HEIGHT - 2.0 * MARGIN) / h);
    let (draw_w, draw_h) = (w * scale, h * scale);
    let x = (LEGAL_WIDTH - draw_w) / 2.0;
    let y = (LEGAL_HEIGHT - draw_h) / 2.0;

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let image_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => i64::from(width),
            "Height" => i64::from(height),
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "DCTDecode",
        },
        jpeg,
    ));
    let ops = format!("q {draw_w:.4} 0 0 {draw_h:.4} {x:.4} {y:.4} cm /Im0 Do Q");
    let content_id = doc.add_object(Stream::new(Dictionary::new(), ops.into_bytes()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Real(LEGAL_WIDTH),
            Object::Real(LEGAL_HEIGHT),
        ],
        "Contents" => content_id,
        "Resources" => dictionary! {
            "XObject" => dictionary! { "Im0" => Object::Reference(image_id) },
        },
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(output)
        .map_err(|e| ConvertError::save(output, e.to_string()))?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::convert::pdf::{is_legal_size, page_sizes};
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    #[test]
    fn test_landscape_png_becomes_one_legal_page() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("foto.png");
        RgbImage::from_pixel(300, 120, Rgb([200, 10, 10]))
            .save(&input)
            .unwrap();
        let output = dir.path().join("foto.pdf");

        image_to_pdf(&input, &output).unwrap();
        let sizes = page_sizes(&output).unwrap();
        assert_eq!(sizes.len(), 1);
        assert!(is_legal_size(sizes[0].0, sizes[0].1));
    }

    #[test]
    fn test_corrupt_image_is_an_error() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("roto.jpg");
        std::fs::write(&input, b"not an image").unwrap();
        let result = image_to_pdf(&input, &dir.path().join("roto.pdf"));
        assert!(matches!(result, Err(ConvertError::Image { .. })));
    }
}
