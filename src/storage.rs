//! Local snapshot persistence.
//!
//! Every report writes the frame to local storage before anything leaves the
//! machine. The filesystem store lays snapshots out the same way the remote
//! archive does: `{root}/{category}_img/{file_name}`.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::category::Category;

pub const DEFAULT_SNAPSHOT_DIR: &str = "runs/detect";

pub trait SnapshotStore {
    /// Where `file_name` for `category` is (or would be) stored.
    fn path_for(&self, category: Category, file_name: &str) -> PathBuf;

    fn write(&mut self, category: Category, file_name: &str, bytes: &[u8]) -> io::Result<PathBuf>;
}

pub struct FilesystemSnapshotStore {
    root: PathBuf,
}

impl FilesystemSnapshotStore {
    /// Create the per-category directories under `root`.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        for category in Category::ALL {
            fs::create_dir_all(root.join(category.image_key()))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl SnapshotStore for FilesystemSnapshotStore {
    fn path_for(&self, category: Category, file_name: &str) -> PathBuf {
        self.root.join(category.image_key()).join(file_name)
    }

    fn write(&mut self, category: Category, file_name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        validate_file_name(file_name)?;
        let path = self.path_for(category, file_name);
        // Only complete files ever carry the final name.
        let tmp = path.with_extension("jpg.part");
        let written = fs::write(&tmp, bytes).and_then(|()| fs::rename(&tmp, &path));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        Ok(path)
    }
}

fn validate_file_name(file_name: &str) -> io::Result<()> {
    if file_name.is_empty()
        || file_name.contains(['/', '\\'])
        || file_name == "."
        || file_name == ".."
    {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid snapshot file name '{}'", file_name),
        ));
    }
    Ok(())
}

#[derive(Default)]
struct InMemorySnapshots {
    files: BTreeMap<PathBuf, Vec<u8>>,
    fail_writes: bool,
}

/// Snapshot store kept in memory. Clones share the same contents.
#[derive(Clone, Default)]
pub struct InMemorySnapshotStore {
    inner: Arc<Mutex<InMemorySnapshots>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent writes fail with an I/O error.
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    pub fn files(&self) -> Vec<PathBuf> {
        self.lock().files.keys().cloned().collect()
    }

    pub fn read(&self, path: &Path) -> Option<Vec<u8>> {
        self.lock().files.get(path).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InMemorySnapshots> {
        // A poisoned lock only means a test thread panicked mid-write.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn path_for(&self, category: Category, file_name: &str) -> PathBuf {
        Path::new(&category.image_key()).join(file_name)
    }

    fn write(&mut self, category: Category, file_name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        validate_file_name(file_name)?;
        let path = self.path_for(category, file_name);
        let mut inner = self.lock();
        if inner.fail_writes {
            return Err(io::Error::new(io::ErrorKind::Other, "snapshot disk unavailable"));
        }
        inner.files.insert(path.clone(), bytes.to_vec());
        Ok(path)
    }
}
