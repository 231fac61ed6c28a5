//! Error types for pipeline runs.

use thiserror::Error;

use crate::download::EngineError;
use crate::store::StoreError;

/// Errors that stop a run, or one section of it.
///
/// Item-level failures never surface here; they are flags on the records.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Reading or writing a project document failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A download engine could not be built.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// An HTTP client could not be built.
    #[error("cannot build HTTP client: {source}")]
    Client {
        #[source]
        source: reqwest::Error,
    },

    /// The registry has no entry for the requested section.
    #[error("section {section} is not registered for project {project}")]
    UnknownSection { project: String, section: String },

    /// The section's fetch code has no extraction profile.
    #[error("no extraction profile for {fetch_code} (section {section})")]
    UnknownProfile { section: String, fetch_code: String },

    /// The operator address does not resolve to a record.
    #[error("no record at {address} in section {section}")]
    UnknownAddress { section: String, address: String },

    /// A blocking stage panicked or was cancelled.
    #[error("blocking stage failed: {0}")]
    Blocking(#[from] tokio::task::JoinError),
}

impl PipelineError {
    pub fn client(source: reqwest::Error) -> Self {
        Self::Client { source }
    }
}
