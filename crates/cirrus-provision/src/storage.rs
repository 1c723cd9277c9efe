//! Storage medium abstraction.
//!
//! The provisioner only needs existence checks, byte-for-byte copies, and
//! path derivation. `LocalStorage` implements this on a flat image
//! directory with the `<instance>.qcow2` naming scheme.

use std::io;
use std::path::{Path, PathBuf};

/// Minimal filesystem capability used for disk image duplication.
pub trait Storage: Send + Sync {
    /// Whether a file exists at the given path.
    fn exists(&self, path: &Path) -> bool;

    /// Copy the file at `from` to `to`, returning the number of bytes
    /// copied.
    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64>;

    /// Path of the disk image backing the named instance.
    fn image_path(&self, instance: &str) -> PathBuf;
}

/// Disk images in a flat directory on the local filesystem.
pub struct LocalStorage {
    image_dir: PathBuf,
}

impl LocalStorage {
    pub fn new(image_dir: impl Into<PathBuf>) -> Self {
        Self {
            image_dir: image_dir.into(),
        }
    }
}

impl Storage for LocalStorage {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
        std::fs::copy(from, to)
    }

    fn image_path(&self, instance: &str) -> PathBuf {
        self.image_dir.join(format!("{instance}.qcow2"))
    }
}
