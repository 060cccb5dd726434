//! Filesystem image store for incident snapshots and enrollment photos.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use facegate_core::{SnapshotRef, SnapshotStore, StorageError};

const MAX_PREFIX_LEN: usize = 40;

/// Stores each image as `<prefix>_<uuid>.<ext>` in one directory.
///
/// Files are written to a temporary name, synced, then renamed into place, so
/// a returned reference always points at a complete file.
pub struct FsSnapshotStore {
    root: PathBuf,
}

impl FsSnapshotStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of a stored object.
    pub fn path_of(&self, snapshot: &SnapshotRef) -> Result<PathBuf, StorageError> {
        let name = snapshot.as_str();
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
            return Err(StorageError::Rejected(format!("invalid snapshot reference {name:?}")));
        }
        Ok(self.root.join(name))
    }
}

impl SnapshotStore for FsSnapshotStore {
    fn save(&self, bytes: &[u8], suggested_name: &str) -> Result<SnapshotRef, StorageError> {
        let name = format!(
            "{}_{}.{}",
            sanitize(suggested_name),
            uuid::Uuid::new_v4().simple(),
            extension_for(bytes)
        );
        let target = self.root.join(&name);
        let staging = self.root.join(format!(".{name}.tmp"));

        if let Err(e) = write_durable(bytes, &staging, &target, || sync_dir(&self.root)) {
            tracing::warn!(name = %name, error = %e, "snapshot write failed");
            return Err(e.into());
        }

        tracing::debug!(name = %name, size = bytes.len(), "snapshot stored");
        Ok(SnapshotRef(name))
    }

    fn remove(&self, snapshot: &SnapshotRef) -> Result<(), StorageError> {
        let path = self.path_of(snapshot)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write `bytes` to `staging`, rename it to `target`, then run `sync_parent`.
///
/// On any failure neither path is left behind: a target that was renamed into
/// place but whose directory entry could not be synced is removed again.
fn write_durable(
    bytes: &[u8],
    staging: &Path,
    target: &Path,
    sync_parent: impl FnOnce() -> std::io::Result<()>,
) -> std::io::Result<()> {
    let staged = (|| -> std::io::Result<()> {
        let mut file = File::create(staging)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(staging, target)
    })();
    if let Err(e) = staged {
        let _ = fs::remove_file(staging);
        return Err(e);
    }

    if let Err(e) = sync_parent() {
        let _ = fs::remove_file(target);
        return Err(e);
    }
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Keep `[A-Za-z0-9_-]`, replace the rest, cap the length.
fn sanitize(suggested: &str) -> String {
    let cleaned: String = suggested
        .chars()
        .take(MAX_PREFIX_LEN)
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "snapshot".to_string()
    } else {
        cleaned
    }
}

fn extension_for(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "jpg"
    } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        "png"
    } else {
        "bin"
    }
}
