//! Open file handles owned by the interception layer

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Mutable part of a handle, only touched with the handle lock held
#[derive(Debug)]
pub(crate) struct HandleState {
    /// Backing descriptor; `None` for a sink handle handed to a denied caller
    pub(crate) file: Option<File>,
    /// Current mount-relative path (changes if a tripwire renames the file)
    pub(crate) path: PathBuf,
    /// Set once a tripwire has moved this file
    pub(crate) tripped: bool,
}

/// One open file as seen by the caller.
///
/// Every operation on the handle runs with its lock held, so reads and
/// writes on the same handle never interleave. Dropping the handle closes
/// the backing descriptor.
#[derive(Debug)]
pub struct GuardedFile {
    name: String,
    state: Mutex<HandleState>,
}

impl GuardedFile {
    pub fn new(path: &Path, file: File) -> Self {
        Self::with_file(path, Some(file))
    }

    /// Handle with no backing descriptor: writes vanish, reads return nothing
    pub fn detached(path: &Path) -> Self {
        Self::with_file(path, None)
    }

    fn with_file(path: &Path, file: Option<File>) -> Self {
        Self {
            name: file_name_of(path),
            state: Mutex::new(HandleState {
                file,
                path: path.to_path_buf(),
                tripped: false,
            }),
        }
    }

    /// Logical file name recorded in audit rows
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_detached(&self) -> bool {
        self.lock().file.is_none()
    }

    pub fn path(&self) -> PathBuf {
        self.lock().path.clone()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, HandleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Last path component as a display string
pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_handle() {
        let handle = GuardedFile::detached(Path::new("docs/report.pdf"));
        assert!(handle.is_detached());
        assert_eq!(handle.name(), "report.pdf");
        assert_eq!(handle.path(), PathBuf::from("docs/report.pdf"));
    }

    #[test]
    fn test_file_name_of_root() {
        assert_eq!(file_name_of(Path::new("/")), "/");
        assert_eq!(file_name_of(Path::new("a/b.txt")), "b.txt");
    }
}
