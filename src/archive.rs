//! Guarded extraction of uploaded zip archives.
//!
//! Rejection happens before any entry is written: encrypted archives,
//! archives with too many entries or too large an uncompressed payload,
//! and entries whose resolved path would escape the extraction root all
//! fail with a client error.

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::Context;
use zip::ZipArchive;

use crate::{convert, error::ApiError};

/// Caps applied to an uploaded archive before extraction.
#[derive(Debug, Copy, Clone)]
pub struct ZipLimits {
    /// Maximum number of entries.
    pub max_entries: usize,

    /// Maximum cumulative uncompressed size, in bytes.
    pub max_uncompressed_bytes: u64,
}

/// Extract `archive_path` into `dest_dir` and return the path of the
/// first entry (in archive order) with a supported extension.
///
/// The zip crate is synchronous, so the whole walk runs on the blocking
/// pool.
pub async fn extract_first_supported(
    archive_path: &Path,
    dest_dir: &Path,
    limits: ZipLimits,
) -> Result<PathBuf, ApiError> {
    let archive_path = archive_path.to_owned();
    let dest_dir = dest_dir.to_owned();

    tokio::task::spawn_blocking(move || extract_blocking(&archive_path, &dest_dir, limits))
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("archive extraction task failed: {}", e)))?
}

fn extract_blocking(
    archive_path: &Path,
    dest_dir: &Path,
    limits: ZipLimits,
) -> Result<PathBuf, ApiError> {
    let file = File::open(archive_path)
        .with_context(|| format!("failed to open archive {}", archive_path.display()))?;
    let mut archive = ZipArchive::new(BufReader::new(file))
        .map_err(|e| ApiError::Validation(format!("upload is not a readable zip archive: {}", e)))?;

    if archive.len() > limits.max_entries {
        return Err(ApiError::Validation(format!(
            "archive contains {} entries, more than the {} allowed",
            archive.len(),
            limits.max_entries
        )));
    }

    // First pass: validate every entry before writing anything.
    let mut total_uncompressed: u64 = 0;
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .map_err(|e| ApiError::Validation(format!("unreadable archive entry: {}", e)))?;

        if entry.encrypted() {
            return Err(ApiError::Validation(
                "encrypted archives are not supported".to_string(),
            ));
        }

        total_uncompressed = total_uncompressed.saturating_add(entry.size());
        if total_uncompressed > limits.max_uncompressed_bytes {
            return Err(ApiError::Validation(format!(
                "archive expands past the {} byte limit",
                limits.max_uncompressed_bytes
            )));
        }

        let Some(resolved) = entry.enclosed_name() else {
            return Err(ApiError::Validation(format!(
                "archive entry {:?} escapes the extraction directory",
                entry.name()
            )));
        };
        if !dest_dir.join(&resolved).starts_with(dest_dir) {
            return Err(ApiError::Validation(format!(
                "archive entry {:?} escapes the extraction directory",
                entry.name()
            )));
        }
    }

    // Second pass: extract, remembering the first supported entry.
    std::fs::create_dir_all(dest_dir)
        .with_context(|| format!("failed to create {}", dest_dir.display()))?;

    let mut selected: Option<PathBuf> = None;
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| ApiError::Internal(anyhow::anyhow!("unreadable archive entry: {}", e)))?;
        let Some(resolved) = entry.enclosed_name() else {
            continue;
        };
        let target = dest_dir.join(resolved);

        if entry.is_dir() {
            std::fs::create_dir_all(&target)
                .with_context(|| format!("failed to create {}", target.display()))?;
            continue;
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut out = File::create(&target)
            .with_context(|| format!("failed to create {}", target.display()))?;
        std::io::copy(&mut entry, &mut out)
            .with_context(|| format!("failed to extract {}", target.display()))?;

        if selected.is_none() {
            let extension = target
                .extension()
                .and_then(|ext| ext.to_str())
                .map(str::to_lowercase)
                .unwrap_or_default();
            if convert::classify(&extension).is_some() {
                selected = Some(target);
            }
        }
    }

    selected.ok_or_else(|| {
        ApiError::UnsupportedFileType("archive contains no printable file".to_string())
    })
}
