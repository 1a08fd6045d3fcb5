//! Per-run scratch space for rendered pages.
//!
//! When [`crate::config::ExtractionConfig::scratch_dir`] is set, every page
//! image is staged in a fresh directory named after the run id and the
//! request is built from the staged files. Two concurrent runs never share a
//! directory, and the directory is removed when the run ends, whether it
//! succeeded or not.

use crate::error::ExtractError;
use crate::pipeline::render::PageImage;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

/// A run-scoped directory holding copies of the rendered pages.
#[derive(Debug)]
pub struct ScratchSpace {
    dir: TempDir,
}

impl ScratchSpace {
    /// Create `<base>/bol-<run_id>-XXXXXX`.
    pub fn create(base: &Path, run_id: &str) -> Result<Self, ExtractError> {
        std::fs::create_dir_all(base).map_err(|e| {
            ExtractError::InvalidConfig(format!(
                "cannot create scratch directory '{}': {e}",
                base.display()
            ))
        })?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("bol-{run_id}-"))
            .tempdir_in(base)
            .map_err(|e| {
                ExtractError::InvalidConfig(format!(
                    "cannot create scratch directory in '{}': {e}",
                    base.display()
                ))
            })?;
        debug!("Scratch directory: {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `page` as `page-<n>.png` and return its path.
    pub fn persist(&self, page: &PageImage) -> Result<PathBuf, ExtractError> {
        let path = self.dir.path().join(format!("page-{}.png", page.page_index));
        std::fs::write(&path, &page.bytes).map_err(|e| {
            ExtractError::Internal(format!(
                "failed to write scratch page '{}': {e}",
                path.display()
            ))
        })?;
        Ok(path)
    }

    /// Write `page` to disk and return it backed by the bytes read back
    /// from the staged file.
    pub fn stage(&self, page: PageImage) -> Result<PageImage, ExtractError> {
        let path = self.persist(&page)?;
        let bytes = std::fs::read(&path).map_err(|e| {
            ExtractError::Internal(format!(
                "failed to read scratch page '{}': {e}",
                path.display()
            ))
        })?;
        Ok(PageImage { bytes, ..page })
    }

    /// Remove the directory. Failure is logged, never returned.
    pub fn close(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!("Failed to remove scratch directory '{}': {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(n: usize) -> PageImage {
        PageImage {
            page_index: n,
            dpi: 72,
            mime_type: "image/png".into(),
            bytes: vec![1, 2, 3],
        }
    }

    #[test]
    fn concurrent_runs_do_not_share_a_directory() {
        let base = tempfile::tempdir().unwrap();
        let a = ScratchSpace::create(base.path(), "run").unwrap();
        let b = ScratchSpace::create(base.path(), "run").unwrap();
        assert_ne!(a.path(), b.path());

        let pa = a.persist(&page(1)).unwrap();
        let pb = b.persist(&page(1)).unwrap();
        assert_ne!(pa, pb);
        assert_eq!(std::fs::read(&pa).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn staged_page_carries_the_file_contents() {
        let base = tempfile::tempdir().unwrap();
        let s = ScratchSpace::create(base.path(), "stage").unwrap();
        let staged = s.stage(page(3)).unwrap();
        let on_disk = std::fs::read(s.path().join("page-3.png")).unwrap();
        assert_eq!(staged.bytes, on_disk);
        assert_eq!(staged.page_index, 3);
        assert_eq!(staged.mime_type, "image/png");
    }

    #[test]
    fn close_removes_directory() {
        let base = tempfile::tempdir().unwrap();
        let s = ScratchSpace::create(base.path(), "abc").unwrap();
        s.persist(&page(2)).unwrap();
        let path = s.path().to_path_buf();
        assert!(path.join("page-2.png").exists());
        s.close();
        assert!(!path.exists());
    }
}
