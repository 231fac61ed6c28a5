//! Run coordinator: detection, then the six stages for each section.
//!
//! Stages, recorded in the registry as `step_index`:
//!
//! 1. listing
//! 2. primary document downloads
//! 3. attachment discovery and downloads
//! 4. archive expansion
//! 5. conversion
//! 6. indexing
//!
//! The section document is saved after every stage, so an interrupted run
//! resumes from what is on disk. Only the coordinator writes project files;
//! download workers hand their results back to it.

mod error;
mod progress;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{info, instrument, warn};

pub use error::PipelineError;
pub use progress::{FnSink, ProgressSink, RunSummary, SectionSummary, TracingSink};

use crate::attachments;
use crate::convert::Converter;
use crate::detect::{self, DetectionOutcome};
use crate::download::{DownloadEngine, DownloadStats, HttpClient, SectionLayout};
use crate::extract;
use crate::index;
use crate::model::{
    EstadoFormato, Expediente, ExpedienteStatus, ItemAddress, SectionDocument, StepStatus,
};
use crate::portal::PortalClient;
use crate::render::{BrowserRenderer, ChromiumPrinter, LibreOfficeConverter, OfficeRenderer};
use crate::settings::Settings;
use crate::store::{JsonStore, ProjectRepository, validate_project_id, validate_section_code};
use crate::unpack::ArchiveExpander;

/// Registry step indexes.
pub const STEP_LISTADO: u8 = 1;
pub const STEP_DESCARGA: u8 = 2;
pub const STEP_ANEXOS: u8 = 3;
pub const STEP_DESCOMPRESION: u8 = 4;
pub const STEP_CONVERSION: u8 = 5;
pub const STEP_INDEXADO: u8 = 6;

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub project_id: String,
    /// Restricts the run to one section.
    pub section: Option<String>,
    /// Replaces the selected section's target id.
    pub target_id: Option<String>,
}

impl RunRequest {
    #[must_use]
    pub fn project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            section: None,
            target_id: None,
        }
    }

    #[must_use]
    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }

    #[must_use]
    pub fn with_target_id(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }
}

/// Result of starting a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(RunSummary),
    /// Another run holds this project.
    AlreadyRunning,
}

/// Result of a single-item repair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    /// The item was downloaded again; carries its new `ruta`.
    Repaired { ruta: String },
    /// The download failed again; the item keeps its `error` flag.
    Failed,
    AlreadyRunning,
}

/// Coordinates detection and the per-section stages.
pub struct Pipeline {
    settings: Settings,
    repository: Arc<dyn ProjectRepository>,
    portal: PortalClient,
    downloads: HttpClient,
    printer: Arc<dyn BrowserRenderer>,
    office: Arc<dyn OfficeRenderer>,
    active: Mutex<HashSet<String>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Marks a project as running until dropped.
struct RunGuard<'a> {
    active: &'a Mutex<HashSet<String>>,
    project_id: String,
}

impl<'a> RunGuard<'a> {
    fn acquire(active: &'a Mutex<HashSet<String>>, project_id: &str) -> Option<Self> {
        let mut running = active.lock().unwrap_or_else(PoisonError::into_inner);
        running.insert(project_id.to_string()).then(|| Self {
            active,
            project_id: project_id.to_string(),
        })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.project_id);
    }
}

impl Pipeline {
    /// Builds a pipeline with the JSON store and the external renderers
    /// named in `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Client`] when an HTTP client cannot be built.
    pub fn new(settings: Settings) -> Result<Self, PipelineError> {
        let repository = Arc::new(JsonStore::new(settings.base_dir.clone()));
        let printer = Arc::new(ChromiumPrinter::new(
            settings.browser_binary.clone(),
            settings.print_timeout_secs,
        ));
        let office = Arc::new(LibreOfficeConverter::new(settings.office_binary.clone()));
        Self::with_components(settings, repository, printer, office)
    }

    /// Builds a pipeline around caller-provided store and renderers.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Client`] when an HTTP client cannot be built.
    pub fn with_components(
        settings: Settings,
        repository: Arc<dyn ProjectRepository>,
        printer: Arc<dyn BrowserRenderer>,
        office: Arc<dyn OfficeRenderer>,
    ) -> Result<Self, PipelineError> {
        let portal = PortalClient::new(settings.portal_root(), settings.page_timeout_secs)
            .map_err(PipelineError::client)?;
        let downloads =
            HttpClient::new(settings.download_timeout_secs).map_err(PipelineError::client)?;
        Ok(Self {
            settings,
            repository,
            portal,
            downloads,
            printer,
            office,
            active: Mutex::new(HashSet::new()),
        })
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Root directory of a project's files.
    #[must_use]
    pub fn project_root(&self, project_id: &str) -> PathBuf {
        self.repository.project_root(project_id)
    }

    /// Detects the sections of a project and writes the registry.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] for an invalid project id or a persistence
    /// failure.
    pub async fn detect(
        &self,
        project_id: &str,
        sink: &dyn ProgressSink,
    ) -> Result<DetectionOutcome, PipelineError> {
        validate_project_id(project_id)?;
        self.notify(sink, &format!("detecting sections of project {project_id}"));
        let outcome =
            detect::detect_sections(&self.portal, self.repository.as_ref(), project_id).await?;
        let message = match &outcome {
            DetectionOutcome::Found { sections } => format!("{sections} section(s) detected"),
            DetectionOutcome::NoneFound => "no sections found".to_string(),
            DetectionOutcome::Unreachable => {
                "portal unreachable, empty registry written".to_string()
            }
        };
        self.notify(sink, &message);
        Ok(outcome)
    }

    /// Runs the pipeline for a project.
    ///
    /// A full run re-detects sections first; a section run uses the stored
    /// registry and only detects when none exists. A section that fails
    /// structurally is marked `error` and the run moves on.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] for invalid ids, an unknown section, or a
    /// persistence failure outside a section.
    #[instrument(skip(self, request, sink), fields(project = %request.project_id))]
    pub async fn run(
        &self,
        request: &RunRequest,
        sink: &dyn ProgressSink,
    ) -> Result<RunOutcome, PipelineError> {
        let project_id = request.project_id.as_str();
        validate_project_id(project_id)?;
        if let Some(section) = &request.section {
            validate_section_code(section)?;
        }
        let Some(_guard) = RunGuard::acquire(&self.active, project_id) else {
            warn!("a run for this project is already active");
            sink.on_progress(&format!("project {project_id} is already running"));
            return Ok(RunOutcome::AlreadyRunning);
        };

        let stored = self.repository.load_registry(project_id)?;
        if request.section.is_none() || stored.is_none() {
            self.detect(project_id, sink).await?;
        }
        let mut registry = self.repository.load_registry(project_id)?.unwrap_or_default();

        let codes: Vec<String> = match &request.section {
            Some(code) => {
                let Some(expediente) = registry.get_mut(code) else {
                    return Err(PipelineError::UnknownSection {
                        project: project_id.to_string(),
                        section: code.clone(),
                    });
                };
                expediente.reset_error();
                if let Some(target_id) = &request.target_id {
                    apply_target_override(expediente, project_id, target_id);
                }
                self.repository.save_registry(project_id, &registry)?;
                vec![code.clone()]
            }
            None => {
                if request.target_id.is_some() {
                    warn!("target id override ignored without a section");
                }
                registry
                    .values()
                    .filter(|e| {
                        let runnable = !matches!(
                            e.status,
                            ExpedienteStatus::Error | ExpedienteStatus::Verificado
                        );
                        if !runnable {
                            self.notify(sink, &format!("skipping {} ({:?})", e.code, e.status));
                        }
                        runnable
                    })
                    .map(|e| e.code.clone())
                    .collect()
            }
        };

        let mut summary = RunSummary {
            project_id: project_id.to_string(),
            sections: Vec::with_capacity(codes.len()),
        };
        for code in codes {
            let Some(expediente) = registry.get(&code).cloned() else {
                continue;
            };
            let section_summary = match self.run_section(project_id, &expediente, sink).await {
                Ok(section_summary) => section_summary,
                Err(error) => {
                    warn!(section = %code, error = %error, "section failed");
                    self.notify(sink, &format!("{code}: {error}"));
                    self.mark_error(project_id, &code);
                    SectionSummary {
                        code: code.clone(),
                        error: Some(error.to_string()),
                        ..SectionSummary::default()
                    }
                }
            };
            summary.sections.push(section_summary);
        }

        info!(
            sections = summary.sections.len(),
            failed = summary.failed_sections(),
            "run finished"
        );
        sink.on_complete(&summary);
        Ok(RunOutcome::Completed(summary))
    }

    /// Downloads one record again in overwrite mode, then re-expands,
    /// re-converts and re-indexes its section.
    ///
    /// `address` is `0003`, `0003/anexos/002` or `0003/vinculados/001`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] for invalid ids, unknown sections or
    /// addresses, and persistence failures.
    #[instrument(skip(self, sink))]
    pub async fn repair_item(
        &self,
        project_id: &str,
        section_code: &str,
        address: &str,
        sink: &dyn ProgressSink,
    ) -> Result<RepairOutcome, PipelineError> {
        validate_project_id(project_id)?;
        validate_section_code(section_code)?;
        let Some(_guard) = RunGuard::acquire(&self.active, project_id) else {
            warn!("a run for this project is already active");
            return Ok(RepairOutcome::AlreadyRunning);
        };

        let unknown_section = || PipelineError::UnknownSection {
            project: project_id.to_string(),
            section: section_code.to_string(),
        };
        let registry = self.repository.load_registry(project_id)?.ok_or_else(unknown_section)?;
        if !registry.contains_key(section_code) {
            return Err(unknown_section());
        }
        let mut section = self
            .repository
            .load_section(project_id, section_code)?
            .ok_or_else(unknown_section)?;
        let target = section
            .resolve_address(address)
            .ok_or_else(|| PipelineError::UnknownAddress {
                section: section_code.to_string(),
                address: address.to_string(),
            })?;
        self.repository
            .update_expediente(project_id, section_code, &mut |e| e.reset_error())?;

        let layout = SectionLayout::new(self.project_root(project_id), section_code);
        self.notify(sink, &format!("{section_code}: retrying {address}"));
        let engine = self.engine(1)?;
        let stats = engine
            .download_section(&mut section, &layout, &[target], true, &mut |doc| {
                self.checkpoint(project_id, section_code, doc);
            })
            .await;

        let outcome = match section.item_mut(target) {
            Some(item) if stats.completed() > 0 => {
                let ruta = item.ruta().unwrap_or_default().to_string();
                item.set_conversion(None, EstadoFormato::Pendiente);
                *item.descomprimidos_mut() = None;
                RepairOutcome::Repaired { ruta }
            }
            _ => RepairOutcome::Failed,
        };
        self.repository.save_section(project_id, section_code, &section)?;

        if matches!(outcome, RepairOutcome::Repaired { .. }) {
            let section = self.expand(section, &layout).await?;
            let mut section = self.convert(section, &layout).await?;
            index::index_section(&mut section);
            self.repository.save_section(project_id, section_code, &section)?;
        }
        self.notify(sink, &format!("{section_code}: {address} {outcome:?}"));
        Ok(outcome)
    }

    #[instrument(skip(self, expediente, sink), fields(section = %expediente.code))]
    async fn run_section(
        &self,
        project_id: &str,
        expediente: &Expediente,
        sink: &dyn ProgressSink,
    ) -> Result<SectionSummary, PipelineError> {
        let code = expediente.code.as_str();
        let profile = extract::profile(&expediente.fetch_code).ok_or_else(|| {
            PipelineError::UnknownProfile {
                section: code.to_string(),
                fetch_code: expediente.fetch_code.clone(),
            }
        })?;
        let layout = SectionLayout::new(self.project_root(project_id), code);

        // 1. listing
        self.step(project_id, code, STEP_LISTADO, StepStatus::EnCurso)?;
        self.notify(sink, &format!("{code}: listing documents"));
        let listing = extract::extract_listing(&self.portal, profile, &expediente.target_id).await;
        let stored = self.repository.load_section(project_id, code)?;
        let mut section = match stored {
            Some(mut stored) => {
                stored.documentos = extract::merge_listing(stored.documentos, listing.documentos);
                stored.refresh_summary();
                stored
            }
            None => SectionDocument::from_documents(listing.documentos),
        };
        if !listing.reachable {
            warn!("no listing endpoint answered");
        }
        self.repository.save_section(project_id, code, &section)?;
        self.step(project_id, code, STEP_LISTADO, StepStatus::Completado)?;
        self.notify(sink, &format!("{code}: {} document(s) listed", section.documentos.len()));

        // 2. primary documents
        self.step(project_id, code, STEP_DESCARGA, StepStatus::EnCurso)?;
        let addresses = section.document_addresses();
        let stats = self
            .download(
                project_id,
                code,
                &mut section,
                &layout,
                &addresses,
                self.settings.concurrency,
            )
            .await?;
        self.step(project_id, code, STEP_DESCARGA, StepStatus::Completado)?;
        self.notify(sink, &downloads_message(code, "documents", &stats));

        // 3. attachments
        self.step(project_id, code, STEP_ANEXOS, StepStatus::EnCurso)?;
        let discovery = attachments::discover_attachments(&self.portal, &mut section).await;
        index::index_links(&mut section);
        self.repository.save_section(project_id, code, &section)?;
        let addresses = section.link_addresses();
        let stats = self
            .download(
                project_id,
                code,
                &mut section,
                &layout,
                &addresses,
                self.settings.attachment_concurrency,
            )
            .await?;
        self.step(project_id, code, STEP_ANEXOS, StepStatus::Completado)?;
        self.notify(
            sink,
            &format!(
                "{code}: {} attachment page(s) read, {} failed; {}",
                discovery.reviewed,
                discovery.failed,
                downloads_message(code, "attachments", &stats)
            ),
        );

        // 4. archives
        self.step(project_id, code, STEP_DESCOMPRESION, StepStatus::EnCurso)?;
        let section = self.expand(section, &layout).await?;
        self.repository.save_section(project_id, code, &section)?;
        self.step(project_id, code, STEP_DESCOMPRESION, StepStatus::Completado)?;
        self.notify(
            sink,
            &format!("{code}: {} archive failure(s)", section.fallos_descompresion.len()),
        );

        // 5. conversion
        self.step(project_id, code, STEP_CONVERSION, StepStatus::EnCurso)?;
        let mut section = self.convert(section, &layout).await?;
        self.repository.save_section(project_id, code, &section)?;
        self.step(project_id, code, STEP_CONVERSION, StepStatus::Completado)?;

        // 6. indexing
        self.step(project_id, code, STEP_INDEXADO, StepStatus::EnCurso)?;
        index::index_section(&mut section);
        self.repository.save_section(project_id, code, &section)?;
        self.repository.update_expediente(project_id, code, &mut |e| {
            e.record_step(STEP_INDEXADO, StepStatus::Completado);
            e.advance_status(ExpedienteStatus::Edicion);
        })?;
        self.notify(sink, &format!("{code}: done"));

        Ok(section_summary(code, &section))
    }

    async fn download(
        &self,
        project_id: &str,
        code: &str,
        section: &mut SectionDocument,
        layout: &SectionLayout,
        addresses: &[ItemAddress],
        concurrency: usize,
    ) -> Result<DownloadStats, PipelineError> {
        let engine = self.engine(concurrency)?;
        Ok(engine
            .download_section(section, layout, addresses, false, &mut |doc| {
                self.checkpoint(project_id, code, doc);
            })
            .await)
    }

    fn engine(&self, concurrency: usize) -> Result<DownloadEngine, PipelineError> {
        Ok(DownloadEngine::new(concurrency, self.downloads.clone(), Arc::clone(&self.printer))?
            .with_checkpoint_every(self.settings.checkpoint_every))
    }

    async fn expand(
        &self,
        mut section: SectionDocument,
        layout: &SectionLayout,
    ) -> Result<SectionDocument, PipelineError> {
        let expander = ArchiveExpander::from_settings(&self.settings);
        let root = layout.project_root.clone();
        let section = tokio::task::spawn_blocking(move || {
            expander.expand_section(&mut section, &root);
            section
        })
        .await?;
        Ok(section)
    }

    async fn convert(
        &self,
        mut section: SectionDocument,
        layout: &SectionLayout,
    ) -> Result<SectionDocument, PipelineError> {
        let converter = Converter::new(Arc::clone(&self.office));
        let layout = layout.clone();
        let section = tokio::task::spawn_blocking(move || {
            converter.convert_section(&mut section, &layout);
            section
        })
        .await?;
        Ok(section)
    }

    fn checkpoint(&self, project_id: &str, code: &str, section: &SectionDocument) {
        if let Err(error) = self.repository.save_section(project_id, code, section) {
            warn!(section = %code, error = %error, "checkpoint failed");
        }
    }

    fn step(
        &self,
        project_id: &str,
        code: &str,
        index: u8,
        status: StepStatus,
    ) -> Result<(), PipelineError> {
        self.repository
            .update_expediente(project_id, code, &mut |e| e.record_step(index, status))?;
        Ok(())
    }

    fn mark_error(&self, project_id: &str, code: &str) {
        let result = self.repository.update_expediente(project_id, code, &mut |e| {
            e.status = ExpedienteStatus::Error;
            e.step_status = StepStatus::Error;
        });
        if let Err(error) = result {
            warn!(section = %code, error = %error, "cannot record section error");
        }
    }

    fn notify(&self, sink: &dyn ProgressSink, message: &str) {
        info!("{message}");
        sink.on_progress(message);
    }
}

/// Points a section at an operator-supplied id.
fn apply_target_override(expediente: &mut Expediente, project_id: &str, target_id: &str) {
    if target_id == project_id {
        expediente.target_id = target_id.to_string();
        expediente.id_mode = crate::model::IdMode::Idp;
    } else {
        expediente.use_idr(target_id);
    }
}

fn downloads_message(code: &str, what: &str, stats: &DownloadStats) -> String {
    format!(
        "{code}: {what} {} downloaded, {} failed, {} skipped",
        stats.completed(),
        stats.failed(),
        stats.skipped()
    )
}

fn section_summary(code: &str, section: &SectionDocument) -> SectionSummary {
    let links = section
        .documentos
        .iter()
        .flat_map(|d| d.anexos_detectados.iter().chain(&d.vinculados_detectados));
    SectionSummary {
        code: code.to_string(),
        documentos: section.documentos.len(),
        descargados: section
            .documentos
            .iter()
            .filter(|d| d.ruta.is_some() && !d.error)
            .count(),
        fallidos: section.documentos.iter().filter(|d| d.error).count()
            + links.filter(|l| l.error).count(),
        convertidos: section
            .documentos
            .iter()
            .filter(|d| d.estado_formato == EstadoFormato::Convertido)
            .count(),
        fallos_descompresion: section.fallos_descompresion.len(),
        error: None,
    }
}
