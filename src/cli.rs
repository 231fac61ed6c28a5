//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Acquire, expand and normalize regulatory case files.
///
/// Detects the sections of a project on the portal, downloads every listed
/// document with its attachments, expands archives and converts the result
/// into legal-size PDFs with a JSON index per section.
#[derive(Parser, Debug)]
#[command(name = "expediente")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (defaults to $XDG_CONFIG_HOME/expediente/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory holding one folder per project
    #[arg(long, global = true, value_name = "DIR")]
    pub base_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the full pipeline for a project, or for one of its sections
    Run(RunArgs),
    /// Detect the sections of a project and write its registry
    Detect(ProjectArg),
    /// Download one record again and refresh its section
    Retry(RetryArgs),
}

#[derive(Args, Debug)]
pub struct ProjectArg {
    /// Numeric project id
    pub project_id: String,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Numeric project id
    pub project_id: String,

    /// Only run this section (e.g. EXEVA)
    #[arg(short, long, value_name = "CODE")]
    pub section: Option<String>,

    /// Query the selected section with this id instead of the stored one
    #[arg(long, value_name = "ID", requires = "section")]
    pub target_id: Option<String>,

    /// Primary download pool size (1-100)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Attachment download pool size (1-100)
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub attachment_concurrency: Option<u8>,
}

#[derive(Args, Debug)]
pub struct RetryArgs {
    /// Numeric project id
    pub project_id: String,

    /// Section code
    pub section: String,

    /// Record address: 0003, 0003/anexos/002 or 0003/vinculados/001
    pub address: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_run_parses_project_only() {
        let cli = Cli::try_parse_from(["expediente", "run", "2150000000"]).unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.project_id, "2150000000");
        assert!(args.section.is_none());
        assert!(args.concurrency.is_none());
    }

    #[test]
    fn test_cli_run_with_section_and_target() {
        let cli = Cli::try_parse_from([
            "expediente",
            "run",
            "123",
            "--section",
            "EXEVA",
            "--target-id",
            "777",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.section.as_deref(), Some("EXEVA"));
        assert_eq!(args.target_id.as_deref(), Some("777"));
    }

    #[test]
    fn test_cli_target_id_requires_section() {
        let err =
            Cli::try_parse_from(["expediente", "run", "123", "--target-id", "777"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_cli_verbose_flag_is_global() {
        let cli = Cli::try_parse_from(["expediente", "detect", "123", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Command::Detect(_)));
    }

    #[test]
    fn test_cli_retry_takes_three_positionals() {
        let cli = Cli::try_parse_from(["expediente", "retry", "123", "EXEVA", "0003/anexos/002"])
            .unwrap();
        let Command::Retry(args) = cli.command else {
            panic!("expected retry");
        };
        assert_eq!(args.section, "EXEVA");
        assert_eq!(args.address, "0003/anexos/002");
    }

    #[test]
    fn test_cli_concurrency_zero_rejected() {
        let err = Cli::try_parse_from(["expediente", "run", "123", "-c", "0"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_concurrency_over_max_rejected() {
        let err = Cli::try_parse_from(["expediente", "run", "123", "-c", "101"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_missing_subcommand_is_error() {
        let result = Cli::try_parse_from(["expediente"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let err = Cli::try_parse_from(["expediente", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }
}
