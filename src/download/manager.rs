//! Streams artifacts to disk through the request executor.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};

use super::error::DownloadError;
use super::filename::{artifact_file_name, confine_dir};
use super::{DownloadOutcome, DownloadStatus};
use crate::executor::{PortalRequest, RequestExecutor, RequestPurpose};
use crate::resolver::ArtifactLocation;

/// Removes the temporary file unless disarmed. Runs on error, panic and
/// task abort alike.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed && std::fs::remove_file(&self.path).is_ok() {
            debug!(path = %self.path.display(), "removed partial download");
        }
    }
}

/// A completed transfer.
struct Transfer {
    bytes: u64,
    sha256: String,
}

/// Writes artifacts into one output directory.
#[derive(Clone)]
pub struct DownloadManager {
    executor: Arc<RequestExecutor>,
    root: PathBuf,
    attempts: u32,
    timeout: Duration,
}

impl std::fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadManager")
            .field("root", &self.root)
            .field("attempts", &self.attempts)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl DownloadManager {
    /// Creates a manager rooted at `output_dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Io`] when the directory cannot be created or
    /// canonicalized.
    pub async fn new(
        executor: Arc<RequestExecutor>,
        output_dir: &Path,
        attempts: u32,
        timeout: Duration,
    ) -> Result<Self, DownloadError> {
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| DownloadError::io(output_dir, e))?;
        let root = tokio::fs::canonicalize(output_dir)
            .await
            .map_err(|e| DownloadError::io(output_dir, e))?;
        Ok(Self {
            executor,
            root,
            attempts: attempts.max(1),
            timeout,
        })
    }

    /// Canonical output directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Downloads `location` into `destination_dir`, which must lie inside
    /// the output directory (relative paths are taken relative to it).
    ///
    /// Never fails: every path ends in exactly one [`DownloadOutcome`].
    #[instrument(skip(self, location), fields(patent_id = %location.patent_id))]
    pub async fn download(&self, location: &ArtifactLocation, destination_dir: &Path) -> DownloadOutcome {
        let file_name = artifact_file_name(&location.patent_id);
        let dir = match confine_dir(&self.root, destination_dir).await {
            Ok(dir) => dir,
            Err(e) => {
                warn!(error = %e, "refusing destination");
                return DownloadOutcome::failed(location, destination_dir.join(&file_name), &e);
            }
        };
        let destination = dir.join(&file_name);

        if let Ok(meta) = tokio::fs::metadata(&destination).await
            && meta.is_file()
        {
            debug!(path = %destination.display(), "already downloaded");
            return DownloadOutcome {
                patent_id: location.patent_id.clone(),
                destination_path: destination,
                byte_count: meta.len(),
                sha256: None,
                status: DownloadStatus::SkippedExists,
                session_fatal: false,
            };
        }

        let mut attempt = 1;
        loop {
            match self.transfer(location, &dir, &destination).await {
                Ok(transfer) => {
                    info!(bytes = transfer.bytes, path = %destination.display(), "download complete");
                    return DownloadOutcome {
                        patent_id: location.patent_id.clone(),
                        destination_path: destination,
                        byte_count: transfer.bytes,
                        sha256: Some(transfer.sha256),
                        status: DownloadStatus::Completed,
                        session_fatal: false,
                    };
                }
                Err(e) if e.is_retryable() && attempt < self.attempts => {
                    warn!(attempt, error = %e, "download attempt failed, retrying");
                    attempt += 1;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "download failed");
                    return DownloadOutcome::failed(location, destination, &e);
                }
            }
        }
    }

    async fn transfer(
        &self,
        location: &ArtifactLocation,
        dir: &Path,
        destination: &Path,
    ) -> Result<Transfer, DownloadError> {
        let request = PortalRequest::get(&location.pdf_url, RequestPurpose::Artifact)
            .with_header("Referer", &location.detail_url)
            .with_header("Accept", "application/pdf,*/*")
            .with_timeout(self.timeout);
        let response = self.executor.execute(&request).await?;

        if let Some(content_type) = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            && content_type.trim().to_ascii_lowercase().starts_with("text/html")
        {
            return Err(DownloadError::NotADocument {
                url: location.pdf_url.clone(),
                content_type: content_type.to_string(),
            });
        }
        let expected = response.content_length();

        let temp_path = dir.join(temp_file_name(destination));
        let mut guard = TempFileGuard::new(temp_path.clone());
        let file = File::create(&temp_path)
            .await
            .map_err(|e| DownloadError::io(&temp_path, e))?;

        let mut writer = BufWriter::new(file);
        let mut stream = response.bytes_stream();
        let mut hasher = Sha256::new();
        let mut bytes: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| DownloadError::Stream {
                url: location.pdf_url.clone(),
                source,
            })?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| DownloadError::io(&temp_path, e))?;
            hasher.update(&chunk);
            bytes += chunk.len() as u64;
        }
        writer
            .flush()
            .await
            .map_err(|e| DownloadError::io(&temp_path, e))?;
        writer
            .get_mut()
            .sync_all()
            .await
            .map_err(|e| DownloadError::io(&temp_path, e))?;
        drop(writer);

        if let Some(expected) = expected
            && expected != bytes
        {
            return Err(DownloadError::integrity(&temp_path, expected, bytes));
        }

        tokio::fs::rename(&temp_path, destination)
            .await
            .map_err(|e| DownloadError::io(destination, e))?;
        guard.disarm();

        Ok(Transfer {
            bytes,
            sha256: format!("{:x}", hasher.finalize()),
        })
    }
}

fn temp_file_name(destination: &Path) -> String {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!(".{name}.part-{:08x}", rand::random::<u32>())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_file_name_is_hidden_and_unique() {
        let a = temp_file_name(Path::new("/out/US1.pdf"));
        let b = temp_file_name(Path::new("/out/US1.pdf"));
        assert!(a.starts_with(".US1.pdf.part-"));
        assert_eq!(a.len(), ".US1.pdf.part-".len() + 8);
        assert_ne!(a, b);
    }

    #[test]
    fn test_temp_file_guard_removes_file_unless_disarmed() {
        let dir = tempfile::tempdir().unwrap();
        let removed = dir.path().join(".a.part");
        let kept = dir.path().join(".b.part");
        std::fs::write(&removed, b"x").unwrap();
        std::fs::write(&kept, b"x").unwrap();

        drop(TempFileGuard::new(removed.clone()));
        let mut guard = TempFileGuard::new(kept.clone());
        guard.disarm();
        drop(guard);

        assert!(!removed.exists());
        assert!(kept.exists());
    }
}
