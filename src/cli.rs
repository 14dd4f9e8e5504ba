//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser};

/// Search a patent portal and download the matching PDFs.
///
/// A browser is driven once to capture the portal's own search request; the
/// captured session is then replayed over plain HTTP for searching,
/// pagination and downloads.
#[derive(Parser, Debug)]
#[command(name = "patent-downloader")]
#[command(author, version, about)]
pub struct Args {
    /// Queries, e.g. 'title:neural AND abstract:pruning'. Read from stdin,
    /// one per line, when none are given and stdin is not a terminal.
    #[arg(value_name = "QUERY")]
    pub queries: Vec<String>,

    /// File with one query per line ('#' lines are skipped)
    #[arg(short = 'f', long, value_name = "PATH")]
    pub query_file: Option<PathBuf>,

    /// Output directory for PDFs and the run manifest [default: ./downloads]
    #[arg(short = 'o', long = "out", id = "output_dir", value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Records to process per query (1-1000)
    #[arg(short = 'n', long, default_value_t = 5, value_parser = clap::value_parser!(u16).range(1..=1000))]
    pub max_results: u16,

    /// Results requested per search page (1-100)
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub page_size: u8,

    /// Minimum delay between requests to the same host in milliseconds (0-60000)
    #[arg(short = 'l', long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub delay: u64,

    /// Concurrent detail/download pipelines (1-32)
    #[arg(short = 'c', long, default_value_t = 4, value_parser = clap::value_parser!(u8).range(1..=32))]
    pub concurrency: u8,

    /// Attempts for transient network failures (1-10)
    #[arg(short = 'r', long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub max_retries: u8,

    /// Browser capture budget in seconds (1-600)
    #[arg(short = 't', long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..=600))]
    pub timeout: u64,

    /// Run the capture browser without a window
    #[arg(long)]
    pub headless: bool,

    /// Keep raw captured and received payloads under <out>/diagnostics
    #[arg(long)]
    pub diagnostics: bool,

    /// Report result counts and first-page records without downloading
    #[arg(long)]
    pub count_only: bool,

    /// Chrome/Chromium executable (auto-detected when omitted)
    #[arg(long, value_name = "PATH")]
    pub chrome_path: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Which arguments were given explicitly, so config file values do not
/// override them.
#[derive(Debug, Clone, Copy, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct CliValueSources {
    pub output_dir: bool,
    pub max_results: bool,
    pub page_size: bool,
    pub delay: bool,
    pub concurrency: bool,
    pub max_retries: bool,
    pub timeout: bool,
    pub headless: bool,
    pub diagnostics: bool,
    pub chrome_path: bool,
}

impl CliValueSources {
    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            output_dir: is_commandline_value(matches, "output_dir"),
            max_results: is_commandline_value(matches, "max_results"),
            page_size: is_commandline_value(matches, "page_size"),
            delay: is_commandline_value(matches, "delay"),
            concurrency: is_commandline_value(matches, "concurrency"),
            max_retries: is_commandline_value(matches, "max_retries"),
            timeout: is_commandline_value(matches, "timeout"),
            headless: is_commandline_value(matches, "headless"),
            diagnostics: is_commandline_value(matches, "diagnostics"),
            chrome_path: is_commandline_value(matches, "chrome_path"),
        }
    }
}

/// Parses the process arguments, exiting with clap's usage error on failure.
pub fn parse_cli_with_sources() -> (Args, CliValueSources) {
    let matches = Args::command().get_matches();
    let args = Args::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());
    let sources = CliValueSources::from_matches(&matches);
    (args, sources)
}

fn is_commandline_value(matches: &ArgMatches, id: &str) -> bool {
    matches.value_source(id) == Some(ValueSource::CommandLine)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sources_for(argv: &[&str]) -> CliValueSources {
        let matches = Args::command().try_get_matches_from(argv).unwrap();
        CliValueSources::from_matches(&matches)
    }

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = Args::try_parse_from(["patent-downloader"]).unwrap();
        assert!(args.queries.is_empty());
        assert_eq!(args.max_results, 5);
        assert_eq!(args.page_size, 10);
        assert_eq!(args.delay, 1000);
        assert_eq!(args.concurrency, 4);
        assert_eq!(args.max_retries, 3);
        assert_eq!(args.timeout, 30);
        assert!(!args.headless);
        assert!(!args.count_only);
        assert!(args.output_dir.is_none());
    }

    #[test]
    fn test_cli_positional_queries() {
        let args = Args::try_parse_from([
            "patent-downloader",
            "title:neural AND abstract:pruning",
            "CL=battery",
        ])
        .unwrap();
        assert_eq!(args.queries, vec!["title:neural AND abstract:pruning", "CL=battery"]);
    }

    #[test]
    fn test_cli_out_and_query_file_flags() {
        let args = Args::try_parse_from(["patent-downloader", "-o", "pdfs", "-f", "queries.txt"]).unwrap();
        assert_eq!(args.output_dir, Some(PathBuf::from("pdfs")));
        assert_eq!(args.query_file, Some(PathBuf::from("queries.txt")));
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["patent-downloader", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_quiet_flag_sets_quiet() {
        let args = Args::try_parse_from(["patent-downloader", "-q"]).unwrap();
        assert!(args.quiet);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["patent-downloader", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let err = Args::try_parse_from(["patent-downloader", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let err = Args::try_parse_from(["patent-downloader", "--invalid-flag"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }

    #[test]
    fn test_cli_range_limits_rejected() {
        for argv in [
            ["patent-downloader", "-n", "0"],
            ["patent-downloader", "-n", "1001"],
            ["patent-downloader", "-c", "33"],
            ["patent-downloader", "-r", "0"],
            ["patent-downloader", "-l", "60001"],
            ["patent-downloader", "-t", "0"],
        ] {
            let err = Args::try_parse_from(argv).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation, "{argv:?}");
        }
        let err = Args::try_parse_from(["patent-downloader", "--page-size", "101"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_range_limits_accepted_at_bounds() {
        let args = Args::try_parse_from([
            "patent-downloader",
            "-n",
            "1000",
            "-c",
            "32",
            "-r",
            "10",
            "-l",
            "0",
            "--page-size",
            "100",
        ])
        .unwrap();
        assert_eq!(args.max_results, 1000);
        assert_eq!(args.concurrency, 32);
        assert_eq!(args.max_retries, 10);
        assert_eq!(args.delay, 0);
        assert_eq!(args.page_size, 100);
    }

    #[test]
    fn test_cli_value_sources_track_explicit_flags() {
        let sources = sources_for(&["patent-downloader", "-c", "4", "--out", "x", "--headless"]);
        assert!(sources.concurrency);
        assert!(sources.output_dir);
        assert!(sources.headless);
        assert!(!sources.delay);
        assert!(!sources.max_results);
    }
}
