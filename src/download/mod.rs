//! Download stage: streams listed documents and attachments to disk.
//!
//! # Features
//!
//! - Streaming downloads (memory-efficient for large files)
//! - Extension chosen from Content-Disposition, URL, format label, then Content-Type
//! - Browser print-to-PDF for server-rendered documents
//! - Bounded concurrency with periodic checkpoints of the section document
//! - Idempotent re-runs: records with a valid file on disk are skipped
//!
//! # Example
//!
//! ```no_run
//! use expediente_core::download::HttpClient;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new(90)?;
//! let result = client
//!     .download_to_dir(
//!         "https://example.com/informe.pdf",
//!         Path::new("./files"),
//!         "0001_Informe",
//!         "PDF",
//!     )
//!     .await?;
//! println!("Downloaded: {}", result.path.display());
//! # Ok(())
//! # }
//! ```

mod client;
mod engine;
mod error;
pub mod filename;

pub use client::{DownloadFileResult, HttpClient};
pub use engine::{
    DownloadEngine, DownloadJob, DownloadStats, EngineError, JobOutcome, SectionLayout, Strategy,
    apply_outcome, needs_download,
};
pub use error::DownloadError;

// Note: we do NOT define module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.
