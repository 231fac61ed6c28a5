//! Office documents and presentations through the office renderer.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::ConvertError;
use super::pdf::normalize_pdf;
use crate::download::filename::sanitize_filename_component;
use crate::render::OfficeRenderer;

/// Input paths longer than this go straight to the short-name retry.
pub const MAX_OFFICE_PATH_CHARS: usize = 200;

/// Characters kept from the original stem in the short-name retry.
const SHORT_STEM_CHARS: usize = 24;

/// Converts `input` with `renderer` and re-paginates the result into `output`.
///
/// The intermediate PDF lives in a temporary directory. When the input path is
/// too long, or the first attempt fails, the input is copied under a short
/// sanitized name and converted again.
///
/// # Errors
///
/// Returns [`ConvertError`] when both attempts fail or the intermediate PDF
/// cannot be re-paginated.
pub fn office_to_pdf(
    renderer: &dyn OfficeRenderer,
    input: &Path,
    output: &Path,
) -> Result<(), ConvertError> {
    let work = tempfile::tempdir().map_err(|e| ConvertError::io(std::env::temp_dir(), e))?;
    let intermediate = if input.as_os_str().len() > MAX_OFFICE_PATH_CHARS {
        debug!(input = %input.display(), "path too long, converting a short-name copy");
        convert_short_name(renderer, input, work.path())?
    } else {
        let direct_dir = work.path().join("direct");
        std::fs::create_dir_all(&direct_dir).map_err(|e| ConvertError::io(&direct_dir, e))?;
        match renderer.convert_to_pdf(input, &direct_dir) {
            Ok(pdf) => pdf,
            Err(error) => {
                warn!(
                    input = %input.display(),
                    error = %error,
                    "office conversion failed, retrying with short name"
                );
                convert_short_name(renderer, input, work.path())?
            }
        }
    };
    normalize_pdf(&intermediate, output)
}

fn convert_short_name(
    renderer: &dyn OfficeRenderer,
    input: &Path,
    work: &Path,
) -> Result<PathBuf, ConvertError> {
    let short_dir = work.join("short");
    std::fs::create_dir_all(&short_dir).map_err(|e| ConvertError::io(&short_dir, e))?;
    let copy = short_dir.join(short_name(input));
    std::fs::copy(input, &copy).map_err(|e| ConvertError::io(input, e))?;
    renderer
        .convert_to_pdf(&copy, &short_dir)
        .map_err(|e| ConvertError::render(input, e))
}

/// `{first chars of the sanitized stem}.{ext}`, falling back to `documento`.
fn short_name(input: &Path) -> String {
    let stem: String = input
        .file_stem()
        .map(|s| sanitize_filename_component(&s.to_string_lossy()))
        .unwrap_or_default()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(SHORT_STEM_CHARS)
        .collect();
    let stem = if stem.is_empty() { "documento".to_string() } else { stem };
    match input.extension() {
        Some(ext) => format!("{stem}.{}", ext.to_string_lossy().to_ascii_lowercase()),
        None => stem,
    }
}
