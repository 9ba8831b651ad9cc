//! Scratch directories for store and vector files.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// One mebibyte.
pub const MIB: u64 = 1024 * 1024;

/// A temporary directory that is deleted on drop.
///
/// Keep the fixture alive for as long as any file inside it is mapped.
pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    pub fn new() -> Self {
        let dir = tempfile::Builder::new()
            .prefix("fmalloc-test-")
            .tempdir()
            .expect("failed to create scratch directory");
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// A path inside the directory. The file is not created.
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Create `name` with exactly `len` zero bytes and return its path.
    pub fn sized_file(&self, name: &str, len: u64) -> PathBuf {
        let path = self.file(name);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .expect("failed to create sized file");
        file.set_len(len).expect("failed to size file");
        path
    }

    /// Current length of `path` in bytes.
    pub fn file_len(path: &Path) -> u64 {
        std::fs::metadata(path).expect("stat failed").len()
    }
}

impl Default for ScratchDir {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sized_file_has_requested_length() {
        let dir = ScratchDir::new();
        let p = dir.sized_file("a.bin", 3 * MIB);
        assert_eq!(ScratchDir::file_len(&p), 3 * MIB);
    }

    #[test]
    fn directory_removed_on_drop() {
        let dir = ScratchDir::new();
        let root = dir.path().to_path_buf();
        assert!(root.exists());
        drop(dir);
        assert!(!root.exists());
    }
}
