//! Output artifacts: converted content persisted to a temp file whose
//! extension matches the requested format.
//!
//! Unlike the staged input, an artifact outlives the job: ownership passes
//! to the caller with the [`crate::output::ConversionOutput`].

use crate::error::MarkitError;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Prefix of every output artifact file name.
pub const ARTIFACT_PREFIX: &str = "markit-output-";

/// Write `content` to a new temp file ending in `extension` inside `dir`
/// (system temp dir if `None`) and return its path.
///
/// The file is synced before returning.
pub fn write_artifact(
    content: &str,
    extension: &str,
    dir: Option<&Path>,
) -> Result<PathBuf, MarkitError> {
    let target_dir = dir
        .map(Path::to_path_buf)
        .unwrap_or_else(std::env::temp_dir);
    let write_err = |source: std::io::Error| MarkitError::OutputWriteFailed {
        path: target_dir.clone(),
        source,
    };

    let mut file = tempfile::Builder::new()
        .prefix(ARTIFACT_PREFIX)
        .suffix(extension)
        .tempfile_in(&target_dir)
        .map_err(write_err)?;

    file.write_all(content.as_bytes()).map_err(write_err)?;
    file.as_file().sync_all().map_err(write_err)?;

    let (_, path) = file.keep().map_err(|e| write_err(e.error))?;
    debug!("Wrote {} bytes to {}", content.len(), path.display());
    Ok(path)
}

/// Delete an artifact that will not be handed to the caller.
pub fn discard_artifact(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!("Failed to remove discarded artifact {}: {}", path.display(), e);
    }
}

/// Copy an artifact to a caller-chosen destination.
///
/// Uses write-to-temp-then-rename so `dest` is never left half written.
pub fn save_artifact(artifact: &Path, dest: &Path) -> Result<(), MarkitError> {
    let write_err = |source: std::io::Error| MarkitError::OutputWriteFailed {
        path: dest.to_path_buf(),
        source,
    };

    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }

    let mut tmp_name = dest.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    std::fs::copy(artifact, &tmp_path).map_err(write_err)?;
    std::fs::rename(&tmp_path, dest).map_err(|e| {
        let _ = std::fs::remove_file(&tmp_path);
        write_err(e)
    })?;
    Ok(())
}
