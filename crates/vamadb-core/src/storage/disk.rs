//! Disk-backed bucket store over an embedded key-value engine.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use super::BucketKind;
use crate::error::Result;

/// Persistent bucket store; each named bucket maps to one engine tree.
pub struct DiskStore {
    db: sled::Db,
    path: PathBuf,
    scope: RwLock<()>,
}

impl DiskStore {
    /// Opens or creates the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Storage`] if the engine cannot open the path.
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path)?;
        tracing::debug!(path = %path.display(), "opened disk store");
        Ok(Self {
            db,
            path: path.to_path_buf(),
            scope: RwLock::new(()),
        })
    }

    /// Returns the store's directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(super) fn scope_lock(&self) -> &RwLock<()> {
        &self.scope
    }

    pub(super) fn bucket(&self, name: &str, create: bool) -> Result<BucketKind> {
        if !create && !self.tree_exists(name) {
            return Ok(BucketKind::Missing);
        }
        Ok(BucketKind::Disk(self.db.open_tree(name)?))
    }

    pub(super) fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Writes a self-contained copy of the store to `path`.
    pub(super) fn backup_to_file(&self, path: &Path) -> Result<()> {
        let backup = sled::open(path)?;
        backup.import(self.db.export());
        backup.flush()?;
        tracing::info!(path = %path.display(), "store backup written");
        Ok(())
    }

    pub(super) fn size_in_bytes(&self) -> Result<u64> {
        Ok(self.db.size_on_disk()?)
    }

    pub(super) fn close(self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn tree_exists(&self, name: &str) -> bool {
        self.db
            .tree_names()
            .iter()
            .any(|n| n.as_ref() == name.as_bytes())
    }
}
