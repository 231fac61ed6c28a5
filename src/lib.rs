//! Expediente Core Library
//!
//! Acquires the sections of a regulatory case file from the public portal and
//! turns them into a local corpus: every listed document and attachment on
//! disk, archives expanded, everything convertible normalized to legal-size
//! PDF, and a JSON index per section.
//!
//! # Architecture
//!
//! - [`detect`] - section discovery and the per-project registry
//! - [`extract`] - listing tables to [`model::Documento`] records
//! - [`download`] - bounded concurrent downloads with a print-to-PDF fallback
//! - [`attachments`] - attachment and linked-document discovery
//! - [`unpack`] - recursive archive expansion
//! - [`convert`] - normalization to legal-size PDF
//! - [`index`] - hierarchical ordinals and counters
//! - [`store`] - JSON persistence behind [`ProjectRepository`]
//! - [`pipeline`] - the coordinator tying the stages together

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod attachments;
pub mod convert;
pub mod detect;
pub mod download;
pub mod extract;
pub mod format;
mod http;
pub mod index;
pub mod model;
pub mod pipeline;
pub mod portal;
pub mod render;
pub mod settings;
pub mod store;
pub mod unpack;
mod user_agent;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use detect::DetectionOutcome;
pub use download::{DownloadEngine, DownloadStats, EngineError, HttpClient, SectionLayout};
pub use model::{
    Documento, EstadoFormato, Expediente, ExpedienteStatus, ItemAddress, LinkItem, Registry,
    SectionDocument,
};
pub use pipeline::{
    FnSink, Pipeline, PipelineError, ProgressSink, RepairOutcome, RunOutcome, RunRequest,
    RunSummary, SectionSummary, TracingSink,
};
pub use portal::PortalClient;
pub use render::{
    BrowserRenderer, ChromiumPrinter, LibreOfficeConverter, OfficeRenderer, RenderError,
};
pub use settings::Settings;
pub use store::{JsonStore, ProjectRepository, StoreError};
