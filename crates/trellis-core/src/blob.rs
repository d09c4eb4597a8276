//! File-storage collaborator for task attachments.
//!
//! [`FsBlobStore`] is content-addressed: the handle is the BLAKE3 hex digest
//! of the bytes, and files live at `<root>/<first two hex chars>/<handle>`.
//! Storing the same bytes twice yields the same handle and one file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Store a blob, get a handle back.
pub trait BlobStore: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the blob cannot be written.
    fn store(&self, bytes: &[u8]) -> io::Result<String>;

    /// # Errors
    ///
    /// Returns `NotFound` for an unknown handle, or any read error.
    fn retrieve(&self, handle: &str) -> io::Result<Vec<u8>>;

    /// Deleting an unknown handle is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing blob cannot be removed.
    fn delete(&self, handle: &str) -> io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Create the store, making `root` if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the root directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, handle: &str) -> io::Result<PathBuf> {
        if handle.len() != 64 || !handle.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("malformed blob handle '{handle}'"),
            ));
        }
        let handle = handle.to_ascii_lowercase();
        Ok(self.root.join(&handle[..2]).join(handle))
    }
}

impl BlobStore for FsBlobStore {
    fn store(&self, bytes: &[u8]) -> io::Result<String> {
        let handle = blake3::hash(bytes).to_hex().to_string();
        let path = self.path_for(&handle)?;
        if path.exists() {
            return Ok(handle);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        // write-then-rename so readers never see a partial blob
        let staging = path.with_extension("partial");
        fs::write(&staging, bytes)?;
        fs::rename(&staging, &path)?;
        tracing::debug!(%handle, size = bytes.len(), "blob stored");
        Ok(handle)
    }

    fn retrieve(&self, handle: &str) -> io::Result<Vec<u8>> {
        fs::read(self.path_for(handle)?)
    }

    fn delete(&self, handle: &str) -> io::Result<()> {
        match fs::remove_file(self.path_for(handle)?) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}
