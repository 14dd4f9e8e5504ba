//! `manifest.json`: a machine-readable record of what a run produced.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::info;

use super::{EngineError, QueryReport, RunReport, RunSummary};
use crate::user_agent::tool_identifier;

/// File name inside the output directory.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

#[derive(Serialize)]
struct Manifest<'a> {
    tool: String,
    generated_at: u64,
    queries: &'a [QueryReport],
    summary: &'a RunSummary,
}

/// Writes the manifest for `report` into `output_dir`, replacing any
/// previous one atomically.
///
/// # Errors
///
/// Returns [`EngineError`] when encoding or writing fails.
pub async fn write_manifest(output_dir: &Path, report: &RunReport) -> Result<PathBuf, EngineError> {
    let manifest = Manifest {
        tool: tool_identifier(),
        generated_at: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
        queries: &report.queries,
        summary: &report.summary,
    };
    let json = serde_json::to_vec_pretty(&manifest)?;

    let path = output_dir.join(MANIFEST_FILE_NAME);
    let temp = output_dir.join(format!(".{MANIFEST_FILE_NAME}.part"));
    let io_err = |source| EngineError::Manifest {
        path: path.clone(),
        source,
    };
    tokio::fs::create_dir_all(output_dir).await.map_err(io_err)?;
    tokio::fs::write(&temp, &json).await.map_err(io_err)?;
    tokio::fs::rename(&temp, &path).await.map_err(io_err)?;
    info!(path = %path.display(), "wrote run manifest");
    Ok(path)
}
