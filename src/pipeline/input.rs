//! Input resolution: validate a user-supplied document path.
//!
//! pdfium reports a missing file, a permission problem, and a non-PDF file
//! with the same opaque load error. Checking existence, readability, and the
//! `%PDF` magic bytes up front turns those into a [`ExtractError::DocumentOpen`]
//! with a reason an operator can act on.

use crate::error::ExtractError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Validate `path` and return it as an owned `PathBuf`.
pub fn resolve_local(path: &Path) -> Result<PathBuf, ExtractError> {
    let open_error = |reason: String| ExtractError::DocumentOpen {
        path: path.to_path_buf(),
        reason,
    };

    if !path.exists() {
        return Err(open_error("file not found".into()));
    }
    if path.is_dir() {
        return Err(open_error("path is a directory".into()));
    }

    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(open_error("permission denied".into()));
        }
        Err(e) => return Err(open_error(e.to_string())),
    };

    let mut magic = [0u8; 4];
    match file.read_exact(&mut magic) {
        Ok(()) if &magic == b"%PDF" => {}
        Ok(()) => {
            return Err(open_error(format!(
                "not a PDF (first bytes: {magic:?})"
            )))
        }
        Err(_) => return Err(open_error("file is too short to be a PDF".into())),
    }

    debug!("Resolved local document: {}", path.display());
    Ok(path.to_path_buf())
}
