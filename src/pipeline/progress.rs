//! Progress reporting seam between the coordinator and its host.

use std::fmt;

use tracing::{debug, info};

/// Per-section result of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionSummary {
    pub code: String,
    pub documentos: usize,
    /// Documents with a file on disk.
    pub descargados: usize,
    /// Records (documents and attachments) flagged as failed downloads.
    pub fallidos: usize,
    /// Documents converted to the standard PDF.
    pub convertidos: usize,
    pub fallos_descompresion: usize,
    /// Structural failure that stopped the section, if any.
    pub error: Option<String>,
}

/// Result of a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub project_id: String,
    pub sections: Vec<SectionSummary>,
}

impl RunSummary {
    /// Sections that stopped on a structural failure.
    #[must_use]
    pub fn failed_sections(&self) -> usize {
        self.sections.iter().filter(|s| s.error.is_some()).count()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "project {}: {} section(s)", self.project_id, self.sections.len())?;
        for section in &self.sections {
            match &section.error {
                Some(error) => write!(f, "; {} error: {error}", section.code)?,
                None => write!(
                    f,
                    "; {} {} docs, {} downloaded, {} failed, {} converted",
                    section.code,
                    section.documentos,
                    section.descargados,
                    section.fallidos,
                    section.convertidos
                )?,
            }
        }
        Ok(())
    }
}

/// Receives human-readable progress from the coordinator.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, message: &str);
    fn on_complete(&self, summary: &RunSummary);
}

/// Sink forwarding every message, including the final summary, to a closure.
pub struct FnSink<F>(pub F);

impl<F> ProgressSink for FnSink<F>
where
    F: Fn(&str) + Send + Sync,
{
    fn on_progress(&self, message: &str) {
        (self.0)(message);
    }

    fn on_complete(&self, summary: &RunSummary) {
        (self.0)(&summary.to_string());
    }
}

/// Sink for headless runs. Progress lines are already logged by the
/// coordinator, so only the summary is logged here, one event per section.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn on_progress(&self, message: &str) {
        debug!(target: "expediente::progress", "{message}");
    }

    fn on_complete(&self, summary: &RunSummary) {
        for section in &summary.sections {
            info!(
                project = %summary.project_id,
                section = %section.code,
                documentos = section.documentos,
                descargados = section.descargados,
                fallidos = section.fallidos,
                convertidos = section.convertidos,
                error = section.error.as_deref().unwrap_or(""),
                "section summary"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_fn_sink_receives_progress_and_summary() {
        let lines = Mutex::new(Vec::new());
        let sink = FnSink(|line: &str| lines.lock().unwrap().push(line.to_string()));
        sink.on_progress("listing EXEVA");
        sink.on_complete(&RunSummary {
            project_id: "1".to_string(),
            sections: vec![SectionSummary {
                code: "EXEVA".to_string(),
                documentos: 3,
                ..SectionSummary::default()
            }],
        });
        let lines = lines.lock().unwrap();
        assert_eq!(lines[0], "listing EXEVA");
        assert!(lines[1].contains("EXEVA 3 docs"), "{}", lines[1]);
    }

    #[test]
    fn test_summary_counts_failed_sections() {
        let summary = RunSummary {
            project_id: "1".to_string(),
            sections: vec![
                SectionSummary::default(),
                SectionSummary {
                    error: Some("boom".to_string()),
                    ..SectionSummary::default()
                },
            ],
        };
        assert_eq!(summary.failed_sections(), 1);
        assert!(summary.to_string().contains("error: boom"));
    }
}
