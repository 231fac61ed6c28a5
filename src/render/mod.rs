//! External renderers: headless browser print-to-PDF and office-to-PDF.
//!
//! Both sit behind traits so tests and alternative installations can swap
//! them out. The browser printer is async and bounded by a timeout; the
//! office converter is blocking and unbounded, and is only called from the
//! conversion stage's blocking thread.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument};

/// Errors raised by external renderers.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The program could not be started.
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program exceeded its time budget and was killed.
    #[error("renderer timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// The program exited unsuccessfully.
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    /// The program reported success but produced no usable file.
    #[error("renderer produced no output at {path}")]
    MissingOutput { path: PathBuf },

    /// File system error around the renderer run.
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RenderError {
    pub fn spawn(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    fn failed(program: &str, output: &std::process::Output) -> Self {
        Self::Failed {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }
}

/// Prints a server-rendered page to PDF.
#[async_trait]
pub trait BrowserRenderer: Send + Sync {
    /// Renders `url` into a PDF at `output`.
    async fn print_to_pdf(&self, url: &str, output: &Path) -> Result<(), RenderError>;
}

/// Converts an office document or presentation to PDF.
pub trait OfficeRenderer: Send + Sync {
    /// Converts `input` and returns the path of the PDF written to `out_dir`.
    fn convert_to_pdf(&self, input: &Path, out_dir: &Path) -> Result<PathBuf, RenderError>;
}

/// Chromium-compatible headless printer.
#[derive(Debug, Clone)]
pub struct ChromiumPrinter {
    binary: String,
    timeout: Duration,
}

impl ChromiumPrinter {
    #[must_use]
    pub fn new(binary: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            binary: binary.into(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    fn args(&self, url: &str, output: &Path) -> Vec<String> {
        let budget_ms = self.timeout.as_millis().saturating_sub(5_000).max(1_000);
        vec![
            "--headless".to_string(),
            "--disable-gpu".to_string(),
            "--no-sandbox".to_string(),
            "--no-pdf-header-footer".to_string(),
            format!("--virtual-time-budget={budget_ms}"),
            format!("--print-to-pdf={}", output.display()),
            url.to_string(),
        ]
    }
}

#[async_trait]
impl BrowserRenderer for ChromiumPrinter {
    #[instrument(skip(self, output), fields(output = %output.display()))]
    async fn print_to_pdf(&self, url: &str, output: &Path) -> Result<(), RenderError> {
        let child = tokio::process::Command::new(&self.binary)
            .args(self.args(url, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();
        let result = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| RenderError::Timeout {
                seconds: self.timeout.as_secs(),
            })?
            .map_err(|e| RenderError::spawn(&self.binary, e))?;
        if !result.status.success() {
            return Err(RenderError::failed(&self.binary, &result));
        }
        ensure_output(output)?;
        debug!("page printed");
        Ok(())
    }
}

/// `soffice --headless --convert-to pdf` converter.
#[derive(Debug, Clone)]
pub struct LibreOfficeConverter {
    binary: String,
}

impl LibreOfficeConverter {
    #[must_use]
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl OfficeRenderer for LibreOfficeConverter {
    #[instrument(skip(self), fields(input = %input.display()))]
    fn convert_to_pdf(&self, input: &Path, out_dir: &Path) -> Result<PathBuf, RenderError> {
        let output = std::process::Command::new(&self.binary)
            .arg("--headless")
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(out_dir)
            .arg(input)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| RenderError::spawn(&self.binary, e))?;
        if !output.status.success() {
            return Err(RenderError::failed(&self.binary, &output));
        }
        let stem = input.file_stem().unwrap_or_default().to_string_lossy();
        let pdf = out_dir.join(format!("{stem}.pdf"));
        ensure_output(&pdf)?;
        Ok(pdf)
    }
}

/// Fails unless `path` exists and is non-empty.
fn ensure_output(path: &Path) -> Result<(), RenderError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => Ok(()),
        _ => Err(RenderError::MissingOutput {
            path: path.to_path_buf(),
        }),
    }
}
