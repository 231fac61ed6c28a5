//! Download engine for concurrent section downloads.
//!
//! This module provides the `DownloadEngine` which fetches every record of a
//! section that still needs a file, using a semaphore-bounded task pool.
//!
//! # Overview
//!
//! The coordinator plans one [`DownloadJob`] per record, the engine spawns a
//! task per job, and results flow back to the coordinator, which is the only
//! writer of the [`SectionDocument`]. Every `checkpoint_every` completions
//! the caller's checkpoint hook runs, and once more when the batch ends.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use super::client::partial_path;
use super::filename::{bucket_dir, item_stem};
use super::{DownloadError, HttpClient};
use crate::format::{self, FormatCategory};
use crate::model::{FileItem, ItemAddress, SectionDocument, relative_ruta};
use crate::render::BrowserRenderer;

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 100;

/// Error type for download engine construction.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },
}

/// Statistics from a download batch run.
///
/// Counters are atomic because worker tasks update them directly.
#[derive(Debug, Default)]
pub struct DownloadStats {
    completed: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

impl DownloadStats {
    /// Creates a new stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of successfully completed downloads.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Returns the number of failed downloads.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Returns the number of records that needed no download.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    /// Returns the number of attempted downloads (completed + failed).
    #[must_use]
    pub fn total(&self) -> usize {
        self.completed() + self.failed()
    }

    fn increment_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn add_skipped(&self, count: usize) {
        self.skipped.fetch_add(count, Ordering::SeqCst);
    }
}

/// How a record's file is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Streamed HTTP GET.
    Fetch,
    /// Headless browser print of a server-rendered page.
    Print,
}

impl Strategy {
    /// Strategy for a format label. Signed PDFs are always fetched.
    #[must_use]
    pub fn for_label(label: &str) -> Self {
        if format::category(label) == FormatCategory::DocDigital {
            Self::Print
        } else {
            Self::Fetch
        }
    }
}

/// One planned download.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub address: ItemAddress,
    pub url: String,
    pub label: String,
    pub output_dir: PathBuf,
    pub stem: String,
    pub strategy: Strategy,
}

/// Where a section's files live.
#[derive(Debug, Clone)]
pub struct SectionLayout {
    /// `{base_dir}/{project}`.
    pub project_root: PathBuf,
    /// Section code, also its directory name.
    pub section: String,
}

impl SectionLayout {
    #[must_use]
    pub fn new(project_root: impl Into<PathBuf>, section: impl Into<String>) -> Self {
        Self {
            project_root: project_root.into(),
            section: section.into(),
        }
    }

    /// `{root}/{SECTION}`.
    #[must_use]
    pub fn section_dir(&self) -> PathBuf {
        self.project_root.join(&self.section)
    }

    /// `{root}/{SECTION}/files/{NN}` for a document ordinal.
    #[must_use]
    pub fn bucket(&self, ordinal: usize) -> PathBuf {
        self.section_dir().join("files").join(bucket_dir(ordinal))
    }

    /// `{root}/{SECTION}/conv`.
    #[must_use]
    pub fn conv_dir(&self) -> PathBuf {
        self.section_dir().join("conv")
    }

    /// Target directory and file stem for the record at `address`.
    #[must_use]
    pub fn target(
        &self,
        section: &SectionDocument,
        address: ItemAddress,
    ) -> Option<(PathBuf, String)> {
        let documento = section.documentos.get(address.doc())?;
        let ordinal = documento.ordinal().unwrap_or(address.doc() + 1);
        let bucket = self.bucket(ordinal);
        let (kind, list, item) = match address {
            ItemAddress::Documento { .. } => {
                return Some((bucket, item_stem(&documento.n, &documento.titulo)));
            }
            ItemAddress::Anexo { item, .. } => ("anexos", &documento.anexos_detectados, item),
            ItemAddress::Vinculado { item, .. } => {
                ("vinculados", &documento.vinculados_detectados, item)
            }
        };
        let link = list.get(item)?;
        let n = link
            .n
            .clone()
            .unwrap_or_else(|| format!("{:03}", item + 1));
        Some((
            bucket.join(&documento.n).join(kind),
            item_stem(&n, &link.titulo),
        ))
    }
}

/// Whether a record needs (another) download.
///
/// Records without a URL or with an unfetchable label never do. Otherwise a
/// record is downloaded when overwriting, when flagged as failed, when it has
/// no `ruta`, or when the file behind `ruta` is missing or empty.
#[must_use]
pub fn needs_download(item: &dyn FileItem, project_root: &Path, overwrite: bool) -> bool {
    if item.url().trim().is_empty() || format::is_unfetchable(item.formato()) {
        return false;
    }
    if overwrite || item.has_error() {
        return true;
    }
    let Some(ruta) = item.ruta() else {
        return true;
    };
    std::fs::metadata(project_root.join(ruta)).map_or(true, |meta| meta.len() == 0)
}

/// Result of one job, applied by the coordinator.
#[derive(Debug)]
pub struct JobOutcome {
    pub address: ItemAddress,
    pub result: Result<PathBuf, DownloadError>,
}

/// Download engine for concurrent file downloads.
///
/// # Concurrency Model
///
/// - Each download runs in its own Tokio task inside a [`JoinSet`]
/// - A semaphore permit is acquired inside the task before any I/O
/// - Permits are released automatically when downloads complete (RAII)
/// - Only the coordinator mutates the section document
pub struct DownloadEngine {
    /// Semaphore for concurrency control.
    semaphore: Arc<Semaphore>,
    /// Configured concurrency limit.
    concurrency: usize,
    /// Completions between two checkpoints.
    checkpoint_every: usize,
    client: HttpClient,
    printer: Arc<dyn BrowserRenderer>,
}

impl std::fmt::Debug for DownloadEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadEngine")
            .field("concurrency", &self.concurrency)
            .field("checkpoint_every", &self.checkpoint_every)
            .finish_non_exhaustive()
    }
}

impl DownloadEngine {
    /// Creates a new download engine.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if the value is outside
    /// the valid range.
    #[instrument(level = "debug", skip(client, printer))]
    pub fn new(
        concurrency: usize,
        client: HttpClient,
        printer: Arc<dyn BrowserRenderer>,
    ) -> Result<Self, EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(EngineError::InvalidConcurrency { value: concurrency });
        }
        debug!(concurrency, "creating download engine");
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            checkpoint_every: crate::settings::DEFAULT_CHECKPOINT_EVERY,
            client,
            printer,
        })
    }

    /// Sets the number of completions between checkpoints (minimum 1).
    #[must_use]
    pub fn with_checkpoint_every(mut self, checkpoint_every: usize) -> Self {
        self.checkpoint_every = checkpoint_every.max(1);
        self
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Builds jobs for `addresses` that need a file.
    #[must_use]
    pub fn plan(
        section: &SectionDocument,
        layout: &SectionLayout,
        addresses: &[ItemAddress],
        overwrite: bool,
    ) -> Vec<DownloadJob> {
        addresses
            .iter()
            .filter_map(|&address| {
                let item = section.item(address)?;
                if !needs_download(item, &layout.project_root, overwrite) {
                    return None;
                }
                let (output_dir, stem) = layout.target(section, address)?;
                Some(DownloadJob {
                    address,
                    url: item.url().to_string(),
                    label: item.formato().to_string(),
                    output_dir,
                    stem,
                    strategy: Strategy::for_label(item.formato()),
                })
            })
            .collect()
    }

    /// Downloads every record at `addresses` that needs it and records the
    /// results in `section`.
    ///
    /// `checkpoint` runs every `checkpoint_every` completions and once at the
    /// end, even when nothing was downloaded.
    ///
    /// Individual failures never fail the batch; they set the record's
    /// `error` flag.
    #[instrument(skip_all, fields(section = %layout.section, targets = addresses.len(), overwrite))]
    pub async fn download_section(
        &self,
        section: &mut SectionDocument,
        layout: &SectionLayout,
        addresses: &[ItemAddress],
        overwrite: bool,
        checkpoint: &mut (dyn FnMut(&SectionDocument) + Send),
    ) -> DownloadStats {
        let stats = Arc::new(DownloadStats::new());
        let jobs = Self::plan(section, layout, addresses, overwrite);
        stats.add_skipped(addresses.len() - jobs.len());
        info!(jobs = jobs.len(), skipped = stats.skipped(), "starting section downloads");

        let mut tasks = JoinSet::new();
        for job in jobs {
            let semaphore = Arc::clone(&self.semaphore);
            let client = self.client.clone();
            let printer = Arc::clone(&self.printer);
            let stats = Arc::clone(&stats);
            tasks.spawn(async move {
                // Permit is dropped when this block exits (RAII)
                let _permit = semaphore.acquire_owned().await.ok();
                let result = run_job(&client, printer.as_ref(), &job).await;
                match &result {
                    Ok(path) => {
                        debug!(
                            address = %job.address,
                            path = %path.display(),
                            "download completed"
                        );
                        stats.increment_completed();
                    }
                    Err(e) => {
                        warn!(
                            address = %job.address,
                            url = %job.url,
                            error = %e,
                            "download failed"
                        );
                        stats.increment_failed();
                    }
                }
                JobOutcome {
                    address: job.address,
                    result,
                }
            });
        }

        let mut since_checkpoint = 0;
        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    // The record keeps its previous state and is retried next pass.
                    warn!(error = %e, "download task panicked");
                    continue;
                }
            };
            apply_outcome(section, &layout.project_root, outcome);
            since_checkpoint += 1;
            if since_checkpoint >= self.checkpoint_every {
                checkpoint(section);
                since_checkpoint = 0;
            }
        }
        checkpoint(section);

        info!(
            completed = stats.completed(),
            failed = stats.failed(),
            skipped = stats.skipped(),
            "section downloads complete"
        );
        match Arc::try_unwrap(stats) {
            Ok(stats) => stats,
            Err(shared) => {
                let copy = DownloadStats::new();
                copy.completed.store(shared.completed(), Ordering::SeqCst);
                copy.failed.store(shared.failed(), Ordering::SeqCst);
                copy.skipped.store(shared.skipped(), Ordering::SeqCst);
                copy
            }
        }
    }
}

/// Records a job result on the addressed record.
pub fn apply_outcome(section: &mut SectionDocument, project_root: &Path, outcome: JobOutcome) {
    let Some(item) = section.item_mut(outcome.address) else {
        return;
    };
    let ruta = outcome.result.and_then(|path| {
        relative_ruta(project_root, &path).ok_or(DownloadError::OutsideRoot { path })
    });
    match ruta {
        Ok(ruta) => item.mark_downloaded(ruta),
        Err(e) => {
            debug!(address = %outcome.address, error = %e, "marking record as failed");
            item.mark_download_failed();
        }
    }
}

#[instrument(
    skip(client, printer, job),
    fields(address = %job.address, url = %job.url, strategy = ?job.strategy)
)]
async fn run_job(
    client: &HttpClient,
    printer: &dyn BrowserRenderer,
    job: &DownloadJob,
) -> Result<PathBuf, DownloadError> {
    match job.strategy {
        Strategy::Fetch => client
            .download_to_dir(&job.url, &job.output_dir, &job.stem, &job.label)
            .await
            .map(|result| result.path),
        Strategy::Print => {
            tokio::fs::create_dir_all(&job.output_dir)
                .await
                .map_err(|e| DownloadError::io(&job.output_dir, e))?;
            let path = job.output_dir.join(format!("{}.pdf", job.stem));
            let part = partial_path(&path);
            if let Err(e) = printer.print_to_pdf(&job.url, &part).await {
                let _ = tokio::fs::remove_file(&part).await;
                return Err(DownloadError::render(&job.url, e));
            }
            if let Err(e) = tokio::fs::rename(&part, &path).await {
                let _ = tokio::fs::remove_file(&part).await;
                return Err(DownloadError::io(&path, e));
            }
            Ok(path)
        }
    }
}
