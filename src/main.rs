//! CLI entry point for the patent downloader.

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use patent_core::session::SessionSource;
use patent_core::{
    ChromiumDriver, DiagnosticsRecorder, DownloadManager, EngineOptions, HttpSettings, ParserPolicy, PortalSettings,
    QueryEngine, RequestExecutor, ResultParser, RetrySettings, SessionCapturer, SessionHandle, normalize,
    write_manifest,
};
use tracing::{debug, info, warn};

mod app_config;
mod cli;
mod output;

use app_config::FileConfig;
use cli::Args;

/// Output directory when neither the CLI nor the config file names one.
const DEFAULT_OUTPUT_DIR: &str = "downloads";

/// Subdirectory of the output directory holding diagnostics payloads.
const DIAGNOSTICS_DIR: &str = "diagnostics";

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let (args, sources) = cli::parse_cli_with_sources();
    init_tracing(&args);

    let file_config = app_config::load_default_file_config()?;
    let args = app_config::apply_config_defaults(args, &sources, file_config.as_ref());
    debug!(?args, "CLI arguments parsed");

    let queries = collect_queries(&args)?;
    if queries.is_empty() {
        for line in output::quick_start_guidance_lines(output::terminal_width().min(80)) {
            info!("{line}");
        }
        return Ok(ExitCode::SUCCESS);
    }
    info!(queries = queries.len(), "Patent downloader starting");

    run(args, file_config.unwrap_or_default(), queries).await
}

/// Priority: `RUST_LOG` > `--quiet` > `-v` count > info.
fn init_tracing(args: &Args) {
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .init();
}

fn collect_queries(args: &Args) -> Result<Vec<String>> {
    let mut queries: Vec<String> = args
        .queries
        .iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect();

    if let Some(path) = &args.query_file {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read query file '{}'", path.display()))?;
        queries.extend(output::split_query_lines(&text));
    }

    if queries.is_empty() && !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        queries.extend(output::split_query_lines(&buffer));
    }
    Ok(queries)
}

fn build_settings(args: &Args, file: &FileConfig) -> (HttpSettings, RetrySettings, EngineOptions) {
    let mut http = HttpSettings::default();
    if let Some(secs) = file.connect_timeout_secs {
        http.connect_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = file.request_timeout_secs {
        http.request_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = file.download_timeout_secs {
        http.download_timeout = Duration::from_secs(secs);
    }

    let mut retry = RetrySettings {
        network_attempts: u32::from(args.max_retries),
        min_request_delay: Duration::from_millis(args.delay),
        ..RetrySettings::default()
    };
    if let Some(secs) = file.session_max_age_secs {
        retry.session_max_age = Duration::from_secs(secs);
    }
    if let Some(max) = file.max_block_retries {
        retry.max_block_retries = max;
    }

    let options = EngineOptions {
        max_results: usize::from(args.max_results),
        page_size: u32::from(args.page_size),
        concurrency: usize::from(args.concurrency),
        count_only: args.count_only,
        ..EngineOptions::default()
    };
    (http, retry, options)
}

fn capture_spinner(quiet: bool) -> Option<ProgressBar> {
    let dumb = std::env::var("TERM").is_ok_and(|term| term.eq_ignore_ascii_case("dumb"));
    if quiet || dumb || !io::stderr().is_terminal() {
        return None;
    }
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message("Capturing portal session in the browser...");
    spinner.enable_steady_tick(Duration::from_millis(100));
    Some(spinner)
}

async fn run(args: Args, file_config: FileConfig, queries: Vec<String>) -> Result<ExitCode> {
    let (http, retry, options) = build_settings(&args, &file_config);
    let output_dir = args
        .output_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
    let diagnostics = if args.diagnostics {
        DiagnosticsRecorder::new(output_dir.join(DIAGNOSTICS_DIR))
    } else {
        DiagnosticsRecorder::disabled()
    };

    let portal = PortalSettings::default();
    let first_query = normalize(&queries[0]);
    let mut driver = ChromiumDriver::new(args.headless);
    if let Some(path) = &args.chrome_path {
        driver = driver.with_executable(path);
    }
    let capturer = SessionCapturer::new(
        driver,
        portal.entry_url(first_query.as_str()),
        portal.search_path_marker.clone(),
        Duration::from_secs(args.timeout),
    )
    .with_diagnostics(diagnostics.clone(), first_query.as_str());

    let spinner = capture_spinner(args.quiet);
    let captured = capturer.capture().await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    let captured = captured.context("Could not capture a portal session")?;

    let sessions = Arc::new(
        SessionHandle::new(&captured, Arc::new(capturer), http.clone(), retry.session_max_age)
            .context("Could not build an HTTP client from the captured session")?,
    );
    let executor = Arc::new(RequestExecutor::new(sessions, &retry));
    let parser = ResultParser::new(portal.origin.clone(), ParserPolicy::default());

    let downloads = if options.count_only {
        None
    } else {
        Some(
            DownloadManager::new(
                Arc::clone(&executor),
                &output_dir,
                options.download_attempts,
                http.download_timeout,
            )
            .await
            .with_context(|| format!("Cannot use output directory '{}'", output_dir.display()))?,
        )
    };
    let manifest_dir = downloads.as_ref().map(|d| d.root().to_path_buf());

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_signal = Arc::clone(&interrupted);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight downloads");
            interrupted_signal.store(true, Ordering::SeqCst);
        }
    });

    let engine = QueryEngine::new(executor, parser, downloads, diagnostics, options).with_interrupt(interrupted);
    let report = engine.run_batch(&queries).await;

    if !args.quiet {
        output::print_run_report(&report);
    }
    if let Some(dir) = manifest_dir {
        write_manifest(&dir, &report).await?;
    }

    if report.summary.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
