//! Runtime settings shared by every pipeline stage.

use std::path::PathBuf;

/// Default portal root.
pub const DEFAULT_PORTAL_URL: &str = "https://seia.sea.gob.cl";

/// Default size of the primary-document download pool.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Default size of the attachment download pool.
pub const DEFAULT_ATTACHMENT_CONCURRENCY: usize = 3;

/// Completed downloads between two section checkpoints.
pub const DEFAULT_CHECKPOINT_EVERY: usize = 10;

/// Read timeout for listing and ficha pages (seconds).
pub const DEFAULT_PAGE_TIMEOUT_SECS: u64 = 30;

/// Read timeout for file downloads (seconds).
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 90;

/// Upper bound on a browser print-to-PDF run (seconds).
pub const DEFAULT_PRINT_TIMEOUT_SECS: u64 = 60;

/// Hard limit on nested archive expansion.
pub const DEFAULT_MAX_ARCHIVE_DEPTH: usize = 20;

/// Everything a pipeline run needs besides the project id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Directory holding one folder per project.
    pub base_dir: PathBuf,
    /// Scheme and host of the portal, without trailing slash.
    pub portal_url: String,
    pub concurrency: usize,
    pub attachment_concurrency: usize,
    pub checkpoint_every: usize,
    pub page_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub print_timeout_secs: u64,
    pub max_archive_depth: usize,
    /// Chromium-compatible executable used for print-to-PDF.
    pub browser_binary: String,
    /// LibreOffice executable used for office conversion.
    pub office_binary: String,
    /// External extractor tried when the rar library fails.
    pub unrar_binary: String,
    /// Second external extractor for rar archives.
    pub sevenzip_binary: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("expedientes"),
            portal_url: DEFAULT_PORTAL_URL.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            attachment_concurrency: DEFAULT_ATTACHMENT_CONCURRENCY,
            checkpoint_every: DEFAULT_CHECKPOINT_EVERY,
            page_timeout_secs: DEFAULT_PAGE_TIMEOUT_SECS,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            print_timeout_secs: DEFAULT_PRINT_TIMEOUT_SECS,
            max_archive_depth: DEFAULT_MAX_ARCHIVE_DEPTH,
            browser_binary: "chromium".to_string(),
            office_binary: "soffice".to_string(),
            unrar_binary: "unrar".to_string(),
            sevenzip_binary: "7z".to_string(),
        }
    }
}

impl Settings {
    /// Portal root with any trailing slash removed.
    #[must_use]
    pub fn portal_root(&self) -> &str {
        self.portal_url.trim_end_matches('/')
    }
}
