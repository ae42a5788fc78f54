//! Scratch file allocation with guaranteed cleanup.
//!
//! Every scratch file is deleted when its [`ScratchFile`] handle is dropped,
//! on success, error and task cancellation alike, unless ownership of the file
//! was handed out with [`ScratchFile::keep`].

use gifforge_common::{Error, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Directory in which scratch files are allocated.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    dir: PathBuf,
}

impl ScratchDir {
    /// Use `dir` for scratch files, creating it if needed.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| Error::temp_file("create directory for", e))?;
        Ok(Self { dir })
    }

    /// The scratch directory.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Create a new, uniquely named, empty file ending in `suffix`.
    pub fn allocate(&self, suffix: &str) -> Result<ScratchFile> {
        let file = tempfile::Builder::new()
            .prefix("gifforge-")
            .suffix(suffix)
            .tempfile_in(&self.dir)
            .map_err(|e| Error::temp_file("create", e))?;

        // Cleanup is handled by ScratchFile so that failures get logged.
        let path = file
            .into_temp_path()
            .keep()
            .map_err(|e| Error::temp_file("create", e.error))?;

        tracing::trace!(path = %path.display(), "Allocated scratch file");
        Ok(ScratchFile { path, armed: true })
    }
}

/// Handle to a scratch file, deleted on drop unless kept.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
    armed: bool,
}

impl ScratchFile {
    /// Path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file now. Calling this more than once is harmless.
    pub fn release(&mut self) {
        if std::mem::take(&mut self.armed) {
            dispose(&self.path);
        }
    }

    /// Transfer ownership of the file to the caller, who becomes responsible
    /// for deleting it.
    pub fn keep(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        self.release();
    }
}

/// Delete a file, logging instead of returning failures.
///
/// A file that is already gone is not an error.
pub fn dispose(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::trace!(path = %path.display(), "Removed file"),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "File already removed");
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_creates_unique_files() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::create(dir.path()).unwrap();

        let a = scratch.allocate(".mp4").unwrap();
        let b = scratch.allocate(".mp4").unwrap();

        assert!(a.path().exists());
        assert!(b.path().exists());
        assert_ne!(a.path(), b.path());
        assert!(a.path().starts_with(dir.path()));
        assert_eq!(a.path().extension().unwrap(), "mp4");
    }

    #[test]
    fn test_drop_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::create(dir.path()).unwrap();

        let file = scratch.allocate(".gif").unwrap();
        let path = file.path().to_path_buf();
        drop(file);

        assert!(!path.exists());
    }

    #[test]
    fn test_release_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::create(dir.path()).unwrap();

        let mut file = scratch.allocate(".gif").unwrap();
        let path = file.path().to_path_buf();
        file.release();
        assert!(!path.exists());

        // Already gone: neither a second release nor the drop may panic.
        file.release();
        drop(file);
    }

    #[test]
    fn test_release_tolerates_external_deletion() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::create(dir.path()).unwrap();

        let mut file = scratch.allocate(".gif").unwrap();
        std::fs::remove_file(file.path()).unwrap();
        file.release();
    }

    #[test]
    fn test_keep_transfers_ownership() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::create(dir.path()).unwrap();

        let file = scratch.allocate(".gif").unwrap();
        let path = file.keep();
        assert!(path.exists());

        dispose(&path);
        assert!(!path.exists());
    }

    #[test]
    fn test_create_makes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let scratch = ScratchDir::create(&nested).unwrap();
        assert!(scratch.path().is_dir());
    }

    #[test]
    fn test_dispose_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        dispose(&dir.path().join("never-existed"));
    }
}
