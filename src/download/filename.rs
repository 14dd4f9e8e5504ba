//! Deterministic artifact file names and output-directory confinement.

use std::path::{Component, Path, PathBuf};

use super::error::DownloadError;

/// Longest stem kept before the extension.
const MAX_STEM_CHARS: usize = 200;

/// File name for a patent's PDF, derived only from its identifier.
///
/// `US11056471B2` becomes `US11056471B2.pdf`; path separators and other
/// characters that are unsafe on common file systems become `_`.
#[must_use]
pub fn artifact_file_name(patent_id: &str) -> String {
    let stem: String = sanitize_filename(patent_id.trim())
        .chars()
        .take(MAX_STEM_CHARS)
        .collect();
    format!("{stem}.pdf")
}

/// Replaces characters that cannot appear in a single path segment.
pub(crate) fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() || c.is_whitespace() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

/// Resolves `requested` against the canonical output `root` and refuses
/// anything that escapes it, lexically or through symlinks.
///
/// Relative paths are taken relative to `root`. The directory is created
/// only after the lexical check passes.
///
/// # Errors
///
/// Returns [`DownloadError::OutsideOutputDir`] for escaping paths and
/// [`DownloadError::Io`] when the directory cannot be created.
pub async fn confine_dir(root: &Path, requested: &Path) -> Result<PathBuf, DownloadError> {
    let joined = if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        root.join(requested)
    };
    let lexical = normalize_lexically(&joined)
        .filter(|p| p.starts_with(root))
        .ok_or_else(|| DownloadError::outside_output_dir(requested, root))?;

    tokio::fs::create_dir_all(&lexical)
        .await
        .map_err(|e| DownloadError::io(&lexical, e))?;
    let canonical = tokio::fs::canonicalize(&lexical)
        .await
        .map_err(|e| DownloadError::io(&lexical, e))?;
    if !canonical.starts_with(root) {
        return Err(DownloadError::outside_output_dir(requested, root));
    }
    Ok(canonical)
}

fn normalize_lexically(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    Some(out)
}
