//! Best-effort persistence of raw payloads for offline debugging.
//!
//! Each query gets its own subdirectory named from a deterministic slug of
//! the query text, so concurrent writers for different queries never touch
//! the same directory. Files are created with `create_new` and never
//! overwritten; a name that already exists gets a numeric suffix.
//!
//! Recording never fails the caller: errors are logged and swallowed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Maximum slug length before the hash suffix.
const MAX_SLUG_CHARS: usize = 50;

/// Attempts at finding a free file name before giving up.
const MAX_NAME_SUFFIX: u32 = 1000;

/// Writes raw captured and observed payloads when diagnostics mode is on.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsRecorder {
    root: Option<Arc<PathBuf>>,
}

impl DiagnosticsRecorder {
    /// A recorder that writes under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(Arc::new(root.into())),
        }
    }

    /// A recorder that drops everything.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Whether payloads are persisted.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.root.is_some()
    }

    /// Directory used for `query`, if enabled.
    #[must_use]
    pub fn query_dir(&self, query: &str) -> Option<PathBuf> {
        self.root.as_deref().map(|root| root.join(query_slug(query)))
    }

    /// Persists `payload` as `name` in the query's directory.
    ///
    /// Returns the written path, or `None` when disabled or on failure.
    pub async fn record(&self, query: &str, name: &str, payload: &[u8]) -> Option<PathBuf> {
        let dir = self.query_dir(query)?;
        match write_unique(&dir, name, payload).await {
            Ok(path) => {
                debug!(path = %path.display(), bytes = payload.len(), "recorded diagnostics payload");
                Some(path)
            }
            Err(e) => {
                warn!(dir = %dir.display(), name, error = %e, "failed to record diagnostics payload");
                None
            }
        }
    }

    /// Same as [`record`](Self::record) without waiting for the write.
    pub fn record_in_background(&self, query: &str, name: &str, payload: Vec<u8>) {
        if !self.is_enabled() {
            return;
        }
        let recorder = self.clone();
        let query = query.to_string();
        let name = name.to_string();
        tokio::spawn(async move {
            recorder.record(&query, &name, &payload).await;
        });
    }
}

async fn write_unique(dir: &Path, name: &str, payload: &[u8]) -> std::io::Result<PathBuf> {
    fs::create_dir_all(dir).await?;

    // Only the final component is honored; callers pass constant names.
    let file_name = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("payload.bin");
    let (stem, ext) = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (file_name, None),
    };

    for suffix in 0..MAX_NAME_SUFFIX {
        let candidate = match (suffix, ext) {
            (0, _) => file_name.to_string(),
            (n, Some(ext)) => format!("{stem}-{n}.{ext}"),
            (n, None) => format!("{stem}-{n}"),
        };
        let path = dir.join(candidate);
        match OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(mut file) => {
                file.write_all(payload).await?;
                file.flush().await?;
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
    }

    Err(std::io::Error::other(format!(
        "no free diagnostics file name for {file_name}"
    )))
}

/// Deterministic directory name for a query.
///
/// Whitespace becomes `_`, characters outside `[A-Za-z0-9_-]` are dropped,
/// the result is cut to 50 characters and suffixed with a short hash of the
/// full query so distinct queries never share a directory.
#[must_use]
pub fn query_slug(query: &str) -> String {
    let mut slug = String::new();
    let mut last_was_space = false;
    for ch in query.trim().chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                slug.push('_');
            }
            last_was_space = true;
            continue;
        }
        last_was_space = false;
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
            slug.push(ch);
        }
    }
    let mut slug: String = slug.chars().take(MAX_SLUG_CHARS).collect();
    if slug.trim_matches('_').is_empty() {
        slug = "query".to_string();
    }

    let digest = Sha256::digest(query.trim().as_bytes());
    let short: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
    format!("{slug}-{short}")
}
