//! Process-wide owner of session storage directories.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::booru::post::THUMBNAIL_DIR;

#[derive(Error, Debug)]
pub enum TempDirError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Directory is not managed by this authority: {0}")]
    NotManaged(PathBuf),
}

pub type TempDirResult<T> = Result<T, TempDirError>;

static GLOBAL: OnceCell<Arc<TempDir>> = OnceCell::new();

fn default_root() -> PathBuf {
    std::env::temp_dir().join("booru_imagelist")
}

/// Hands out unique session directories below one root and removes them again.
///
/// Directories still tracked when the authority is dropped are removed then.
#[derive(Debug)]
pub struct TempDir {
    root: PathBuf,
    dirs: Mutex<HashSet<PathBuf>>,
}

impl TempDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dirs: Mutex::new(HashSet::new()),
        }
    }

    /// Sets the root of the process-wide authority and returns it.
    ///
    /// Only the first call picks the root. Later calls with another root get the
    /// existing authority back.
    pub fn init_global(root: impl Into<PathBuf>) -> Arc<TempDir> {
        let root = root.into();
        let global = GLOBAL.get_or_init(|| Arc::new(TempDir::new(root.clone())));
        if global.root != root {
            warn!(
                requested = %root.display(),
                root = %global.root.display(),
                "Session storage root already set"
            );
        }
        global.clone()
    }

    /// The process-wide authority, rooted in the system temp dir unless
    /// [`TempDir::init_global`] ran first.
    pub fn global() -> Arc<TempDir> {
        GLOBAL.get_or_init(|| Arc::new(TempDir::new(default_root()))).clone()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates `<root>/<uuid>/thumbnails` and returns `<root>/<uuid>`.
    pub fn make_dir(&self) -> TempDirResult<PathBuf> {
        let dir = self.root.join(Uuid::new_v4().to_string());
        fs::create_dir_all(dir.join(THUMBNAIL_DIR))?;
        self.dirs.lock().insert(dir.clone());
        debug!(path = %dir.display(), "Created session directory");
        Ok(dir)
    }

    /// Removes a directory previously returned by [`TempDir::make_dir`].
    pub fn remove_dir(&self, path: &Path) -> TempDirResult<()> {
        if !self.dirs.lock().remove(path) {
            return Err(TempDirError::NotManaged(path.to_path_buf()));
        }
        match fs::remove_dir_all(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        debug!(path = %path.display(), "Removed session directory");
        Ok(())
    }

    pub fn is_tracked(&self, path: &Path) -> bool {
        self.dirs.lock().contains(path)
    }

    pub fn tracked(&self) -> usize {
        self.dirs.lock().len()
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let dirs: Vec<PathBuf> = self.dirs.get_mut().drain().collect();
        if dirs.is_empty() {
            return;
        }
        info!("Cleaning up {} session directories", dirs.len());
        for dir in dirs {
            if let Err(e) = fs::remove_dir_all(&dir) {
                warn!(path = %dir.display(), "Failed to remove session directory: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_and_remove() {
        let root = tempfile::tempdir().unwrap();
        let authority = TempDir::new(root.path());

        let a = authority.make_dir().unwrap();
        let b = authority.make_dir().unwrap();
        assert_ne!(a, b);
        assert!(a.join("thumbnails").is_dir());
        assert_eq!(authority.tracked(), 2);

        authority.remove_dir(&a).unwrap();
        assert!(!a.exists());
        assert!(!authority.is_tracked(&a));

        // Removing twice is reported
        assert!(matches!(authority.remove_dir(&a), Err(TempDirError::NotManaged(_))));
    }

    #[test]
    fn test_global_is_shared() {
        let first = TempDir::init_global(default_root());
        let again = TempDir::init_global(default_root().join("other"));

        assert!(Arc::ptr_eq(&first, &again));
        assert!(Arc::ptr_eq(&first, &TempDir::global()));
        assert_eq!(TempDir::global().root(), default_root());
    }

    #[test]
    fn test_drop_removes_remaining() {
        let root = tempfile::tempdir().unwrap();
        let dir = {
            let authority = TempDir::new(root.path());
            authority.make_dir().unwrap()
        };
        assert!(!dir.exists());
    }
}
