//! Spinner progress sink for interactive runs.

use std::time::Duration;

use expediente_core::{ProgressSink, RunSummary};
use indicatif::{ProgressBar, ProgressStyle};

/// Shows the latest progress line on a spinner and prints the run summary.
pub(crate) struct SpinnerSink {
    spinner: ProgressBar,
}

impl SpinnerSink {
    pub(crate) fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));
        Self { spinner }
    }

    /// Hidden spinner for `--quiet` and non-terminal output.
    pub(crate) fn hidden() -> Self {
        Self {
            spinner: ProgressBar::hidden(),
        }
    }

    pub(crate) fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressSink for SpinnerSink {
    fn on_progress(&self, message: &str) {
        self.spinner.set_message(message.to_string());
    }

    fn on_complete(&self, summary: &RunSummary) {
        self.spinner.finish_and_clear();
        for section in &summary.sections {
            match &section.error {
                Some(error) => self.spinner.println(format!("{}: error: {error}", section.code)),
                None => self.spinner.println(format!(
                    "{}: {} document(s), {} downloaded, {} failed, {} converted, {} archive failure(s)",
                    section.code,
                    section.documentos,
                    section.descargados,
                    section.fallidos,
                    section.convertidos,
                    section.fallos_descompresion
                )),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use expediente_core::SectionSummary;

    #[test]
    fn test_hidden_sink_accepts_progress_and_summary() {
        let sink = SpinnerSink::hidden();
        sink.on_progress("EXEVA: listing documents");
        sink.on_complete(&RunSummary {
            project_id: "123".to_string(),
            sections: vec![SectionSummary {
                code: "EXEVA".to_string(),
                ..SectionSummary::default()
            }],
        });
        sink.finish();
    }
}
