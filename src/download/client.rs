//! HTTP client wrapper for downloading files.
//!
//! This module provides the `HttpClient` struct which streams a response body
//! into a caller-chosen directory under a caller-chosen stem, picking the
//! extension from the response.

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument};
use url::Url;

use super::error::DownloadError;
use super::filename::{choose_extension, sanitize_filename};
use crate::http;

/// HTTP client for downloading files with streaming support.
///
/// Create once and share; clones reuse the same connection pool and cookie
/// store.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

/// Outcome of a successful download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadFileResult {
    /// Final path of the file.
    pub path: PathBuf,
    /// Bytes written to disk.
    pub bytes_downloaded: u64,
    /// Length announced by the server, if any.
    pub content_length: Option<u64>,
}

impl HttpClient {
    /// Creates a client with the given read timeout.
    ///
    /// # Errors
    ///
    /// Returns [`reqwest::Error`] when the underlying client cannot be built.
    pub fn new(read_timeout_secs: u64) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: http::build_client(read_timeout_secs)?,
        })
    }


    /// Downloads `url` to `{output_dir}/{stem}{ext}`.
    ///
    /// The extension is taken from Content-Disposition, then the URL path,
    /// then `label`, then Content-Type. The body goes to a `.part` sibling
    /// that replaces the final path only once it arrived in full, so a
    /// failed download never touches an existing file.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] for invalid URLs, network failures, non-2xx
    /// responses, empty bodies and file system errors.
    #[instrument(skip(self, output_dir), fields(dir = %output_dir.display()))]
    pub async fn download_to_dir(
        &self,
        url: &str,
        output_dir: &Path,
        stem: &str,
        label: &str,
    ) -> Result<DownloadFileResult, DownloadError> {
        debug!("starting download");
        Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::network(url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::http_status(url, status.as_u16()));
        }

        let header = |name| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let disposition = header(CONTENT_DISPOSITION);
        let content_type = header(CONTENT_TYPE);
        let content_length = header(CONTENT_LENGTH).and_then(|v| v.parse::<u64>().ok());
        let extension = choose_extension(
            disposition.as_deref(),
            url,
            label,
            content_type.as_deref(),
        );
        let file_path = output_dir.join(sanitize_filename(&format!("{stem}{extension}")));

        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| DownloadError::io(output_dir, e))?;
        let part_path = partial_path(&file_path);
        let mut file = File::create(&part_path)
            .await
            .map_err(|e| DownloadError::io(part_path.clone(), e))?;

        let stream_result = stream_to_file(&mut file, response, url, &part_path).await;
        drop(file);
        let bytes_written = match stream_result {
            Ok(0) => Err(DownloadError::empty(url)),
            Ok(bytes) => tokio::fs::rename(&part_path, &file_path)
                .await
                .map(|()| bytes)
                .map_err(|e| DownloadError::io(file_path.clone(), e)),
            Err(e) => Err(e),
        };
        if bytes_written.is_err() {
            debug!(path = %part_path.display(), "cleaning up partial file after error");
            let _ = tokio::fs::remove_file(&part_path).await;
        }
        let bytes_written = bytes_written?;

        info!(path = %file_path.display(), bytes = bytes_written, "download complete");
        Ok(DownloadFileResult {
            path: file_path,
            bytes_downloaded: bytes_written,
            content_length,
        })
    }
}

/// `informe.pdf` becomes `informe.pdf.part`.
pub(crate) fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(std::ffi::OsStr::to_os_string).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

/// Streams response body to file, returning bytes written.
///
/// Kept separate so the caller can clean up on error.
async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
) -> Result<u64, DownloadError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| DownloadError::network(url, e))?;

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(file_path.to_path_buf(), e))?;

        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(file_path.to_path_buf(), e))?;

    Ok(bytes_written)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use crate::test_support::start_mock_server_or_skip;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    fn client() -> HttpClient {
        HttpClient::new(5).unwrap()
    }

    #[tokio::test]
    async fn test_download_uses_stem_and_url_extension() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        let temp_dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/archivos/informe.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4 content"))
            .mount(&mock_server)
            .await;

        let url = format!("{}/archivos/informe.pdf", mock_server.uri());
        let result = client()
            .download_to_dir(&url, temp_dir.path(), "0001_Informe", "PDF")
            .await
            .unwrap();

        assert_eq!(result.path, temp_dir.path().join("0001_Informe.pdf"));
        assert_eq!(std::fs::read(&result.path).unwrap(), b"%PDF-1.4 content");
        assert_eq!(result.bytes_downloaded, 16);
    }

    #[tokio::test]
    async fn test_download_prefers_content_disposition_extension() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        let temp_dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/descargar.php"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Disposition", r#"attachment; filename="planos.zip""#)
                    .set_body_bytes(b"PK\x03\x04"),
            )
            .mount(&mock_server)
            .await;

        let url = format!("{}/descargar.php?id=3", mock_server.uri());
        let result = client()
            .download_to_dir(&url, temp_dir.path(), "0002_Planos", "desconocido")
            .await
            .unwrap();
        assert_eq!(
            result.path.file_name().unwrap().to_str().unwrap(),
            "0002_Planos.zip"
        );
    }

    #[tokio::test]
    async fn test_failed_download_keeps_existing_file() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        let temp_dir = TempDir::new().unwrap();
        let existing = temp_dir.path().join("0002_Acta.pdf");
        std::fs::write(&existing, b"%PDF-1.4 good copy").unwrap();

        Mock::given(method("GET"))
            .and(path("/archivos/acta.pdf"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let url = format!("{}/archivos/acta.pdf", mock_server.uri());
        let result = client()
            .download_to_dir(&url, temp_dir.path(), "0002_Acta", "PDF")
            .await;

        assert!(matches!(result, Err(DownloadError::Empty { .. })));
        assert_eq!(std::fs::read(&existing).unwrap(), b"%PDF-1.4 good copy");
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("/d/0001_Informe.pdf")),
            PathBuf::from("/d/0001_Informe.pdf.part")
        );
    }

    #[tokio::test]
    async fn test_download_404_error_leaves_no_file() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        let temp_dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/missing.pdf"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let url = format!("{}/missing.pdf", mock_server.uri());
        let result = client()
            .download_to_dir(&url, temp_dir.path(), "0003_x", "PDF")
            .await;

        match result {
            Err(DownloadError::HttpStatus { status, .. }) => assert_eq!(status, 404),
            other => panic!("Expected HttpStatus error, got: {other:?}"),
        }
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_download_empty_body_is_an_error() {
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        let temp_dir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/vacio.pdf"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let url = format!("{}/vacio.pdf", mock_server.uri());
        let result = client()
            .download_to_dir(&url, temp_dir.path(), "0004_vacio", "PDF")
            .await;
        assert!(matches!(result, Err(DownloadError::Empty { .. })));
        assert!(!temp_dir.path().join("0004_vacio.pdf").exists());
    }

    #[tokio::test]
    async fn test_download_invalid_url() {
        let temp_dir = TempDir::new().unwrap();
        let result = client()
            .download_to_dir("not-a-url", temp_dir.path(), "x", "PDF")
            .await;
        assert!(matches!(result, Err(DownloadError::InvalidUrl { .. })));
    }
}
