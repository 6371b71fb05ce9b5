//! Dataset ingress: extension gate, upload storage, and source identity.
//!
//! Only `.csv .xlsx .xls .pdf .txt .epub` get past this module. Everything
//! downstream may assume a [`DataSource`] names an analyzable file.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::PathsConfig;
use crate::error::{AnalysisError, Result};
use crate::models::{DataSource, SourceKind};

pub const TABULAR_EXTENSIONS: &[&str] = &["csv", "xlsx", "xls"];
pub const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "txt", "epub"];

/// Lowercase extension of a file name, without the dot.
pub fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

impl SourceKind {
    /// Classifies a file purely by its extension.
    pub fn from_filename(filename: &str) -> Result<SourceKind> {
        let ext = extension_of(filename).unwrap_or_default();
        if TABULAR_EXTENSIONS.contains(&ext.as_str()) {
            Ok(SourceKind::Tabular)
        } else if DOCUMENT_EXTENSIONS.contains(&ext.as_str()) {
            Ok(SourceKind::Document)
        } else {
            Err(AnalysisError::UnsupportedExtension(if ext.is_empty() {
                filename.to_string()
            } else {
                format!(".{}", ext)
            }))
        }
    }
}

impl DataSource {
    /// A source for an existing file, identified by its canonical path so the
    /// same file always maps to the same retrieval index.
    pub fn from_path(path: &Path, owner: &str) -> Result<DataSource> {
        let canonical = path
            .canonicalize()
            .map_err(|_| AnalysisError::NotFound(path.display().to_string()))?;
        let filename = canonical
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| AnalysisError::NotFound(path.display().to_string()))?
            .to_string();
        let kind = SourceKind::from_filename(&filename)?;

        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string_lossy().as_bytes());
        let digest = format!("{:x}", hasher.finalize());

        Ok(DataSource {
            id: digest[..32].to_string(),
            kind,
            path: canonical,
            filename,
            owner: owner.to_string(),
        })
    }
}

fn check_component(what: &str, value: &str) -> Result<()> {
    if value.is_empty()
        || value == "."
        || value == ".."
        || value.contains('/')
        || value.contains('\\')
        || value.contains('\0')
    {
        return Err(AnalysisError::format(format!("invalid {} '{}'", what, value)));
    }
    Ok(())
}

/// Stores uploaded bytes under `<upload_root>/<owner>/<filename>`.
///
/// The extension is checked before anything touches the disk. The file is
/// written to a temporary name and renamed into place. A new upload with the
/// same name replaces the old file but receives a fresh identity.
pub fn store_upload(
    paths: &PathsConfig,
    owner: &str,
    filename: &str,
    bytes: &[u8],
) -> Result<DataSource> {
    check_component("owner", owner)?;
    check_component("file name", filename)?;
    let kind = SourceKind::from_filename(filename)?;

    let dir: PathBuf = paths.upload_root.join(owner);
    std::fs::create_dir_all(&dir)?;
    let id = uuid::Uuid::new_v4().to_string();
    let tmp = dir.join(format!(".{}.part", id));
    let target = dir.join(filename);

    std::fs::write(&tmp, bytes)?;
    if let Err(e) = std::fs::rename(&tmp, &target) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }

    info!(owner, filename, bytes = bytes.len(), kind = ?kind, "upload stored");
    Ok(DataSource {
        id,
        kind,
        path: target,
        filename: filename.to_string(),
        owner: owner.to_string(),
    })
}
