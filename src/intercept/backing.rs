//! Backing store primitives
//!
//! The interception layer wraps a backing store rather than extending a
//! passthrough filesystem: it only needs these six primitives, and every
//! error comes back as the raw `Errno` so an allowed operation fails exactly
//! the way the real filesystem would.

use std::fs::{self, File};
use std::os::unix::fs::FileExt;
use std::os::unix::io::FromRawFd;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{self, OFlag};
use nix::sys::stat::Mode;
use nix::unistd;

/// Minimal file capability needed by the hooks
pub trait BackingStore: Send + Sync {
    /// Open an existing file
    fn open(&self, path: &Path, flags: OFlag) -> Result<File, Errno>;
    /// Create (or open) a file
    fn create(&self, path: &Path, flags: OFlag, mode: Mode) -> Result<File, Errno>;
    /// Read up to `len` bytes at `offset`; shorter only at end of file
    fn read(&self, file: &File, offset: u64, len: usize) -> Result<Vec<u8>, Errno>;
    /// Write `data` at `offset`, returning the byte count written
    fn write(&self, file: &File, offset: u64, data: &[u8]) -> Result<usize, Errno>;
    fn rename(&self, from: &Path, to: &Path) -> Result<(), Errno>;
    /// Rename that fails with `EEXIST` instead of replacing `to`
    fn rename_noreplace(&self, from: &Path, to: &Path) -> Result<(), Errno>;
    fn unlink(&self, path: &Path) -> Result<(), Errno>;
}

/// Backing store that applies operations to a real directory tree.
///
/// Paths handed to it are relative to the mount root.
#[derive(Debug, Clone)]
pub struct PassthroughStore {
    root: PathBuf,
}

impl PassthroughStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a mount-relative path onto the underlay
    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path.strip_prefix("/").unwrap_or(path))
    }
}

impl BackingStore for PassthroughStore {
    fn open(&self, path: &Path, flags: OFlag) -> Result<File, Errno> {
        let fd = fcntl::open(&self.resolve(path), flags, Mode::empty())?;
        // SAFETY: open() just returned this descriptor and nothing else owns it
        Ok(unsafe { File::from_raw_fd(fd) })
    }

    fn create(&self, path: &Path, flags: OFlag, mode: Mode) -> Result<File, Errno> {
        let fd = fcntl::open(&self.resolve(path), flags | OFlag::O_CREAT, mode)?;
        // SAFETY: open() just returned this descriptor and nothing else owns it
        Ok(unsafe { File::from_raw_fd(fd) })
    }

    fn read(&self, file: &File, offset: u64, len: usize) -> Result<Vec<u8>, Errno> {
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            match file.read_at(&mut buf[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(errno_of(&e)),
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }

    fn write(&self, file: &File, offset: u64, data: &[u8]) -> Result<usize, Errno> {
        file.write_at(data, offset).map_err(|e| errno_of(&e))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), Errno> {
        fcntl::renameat(None, &self.resolve(from), None, &self.resolve(to))
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    fn rename_noreplace(&self, from: &Path, to: &Path) -> Result<(), Errno> {
        let (from, to) = (self.resolve(from), self.resolve(to));
        match fcntl::renameat2(None, &from, None, &to, fcntl::RenameFlags::RENAME_NOREPLACE) {
            // Underlay filesystem without RENAME_NOREPLACE support
            Err(Errno::EINVAL) => link_then_unlink(&from, &to),
            result => result,
        }
    }

    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    fn rename_noreplace(&self, from: &Path, to: &Path) -> Result<(), Errno> {
        link_then_unlink(&self.resolve(from), &self.resolve(to))
    }

    fn unlink(&self, path: &Path) -> Result<(), Errno> {
        unistd::unlink(&self.resolve(path))
    }
}

/// link(2) refuses an existing target, so this never clobbers `to`
fn link_then_unlink(from: &Path, to: &Path) -> Result<(), Errno> {
    fs::hard_link(from, to).map_err(|e| errno_of(&e))?;
    fs::remove_file(from).map_err(|e| errno_of(&e))
}

fn errno_of(e: &std::io::Error) -> Errno {
    Errno::from_i32(e.raw_os_error().unwrap_or(libc::EIO))
}
