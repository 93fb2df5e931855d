//! Per-job scratch space
//!
//! A [`ScratchRoot`] is created once per process. Each job takes a
//! [`Workspace`] from it: a uniquely named child directory (timestamp plus
//! random suffix) that holds every file the job produces. Uniqueness is
//! structural, so concurrent jobs on one instance never share or clean up
//! each other's files.
//!
//! Releasing is best-effort: failures are logged and swallowed. A workspace
//! dropped without an explicit [`Workspace::release`] is released on drop.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{JobError, Result};

/// Process-wide parent directory of all job workspaces
#[derive(Debug, Clone)]
pub struct ScratchRoot {
    root: PathBuf,
}

impl ScratchRoot {
    /// Create the root directory if it is absent
    pub fn init(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| JobError::workspace(&root, e))?;
        log::info!("Scratch root ready at {:?}", root);
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Allocate a fresh, uniquely named workspace directory
    pub fn new_workspace(&self) -> Result<Workspace> {
        let prefix = format!("job_{}_", timestamp_token());
        let dir = unique_dir(&self.root, &prefix)?;
        log::debug!("Allocated workspace {:?}", dir);
        Ok(Workspace {
            path: dir,
            released: false,
        })
    }
}

/// Scratch directory owned by exactly one job
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    released: bool,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path for a new file directly inside the workspace
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Create a fresh, uniquely named subdirectory
    pub fn create_dir(&self, name: &str) -> Result<PathBuf> {
        unique_dir(&self.path, &format!("{}_{}_", name, timestamp_token()))
    }

    /// Remove the workspace and everything in it
    pub fn release(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if !self.released {
            self.released = true;
            release(&[&self.path]);
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.release_now();
    }
}

/// Best-effort removal of files and directory trees
///
/// Missing paths count as already released. Failures are logged, never
/// returned.
pub fn release<P: AsRef<Path>>(paths: &[P]) {
    for path in paths {
        release_path(path.as_ref());
    }
}

fn release_path(path: &Path) {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return,
        Err(e) => {
            log::warn!("Could not clean up {:?}: {}", path, e);
            return;
        }
    };

    let result = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    match result {
        Ok(()) => log::info!("Cleaned up: {:?}", path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Could not clean up {:?}: {}", path, e),
    }
}

/// Second-resolution local timestamp used in scratch names
pub(crate) fn timestamp_token() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

fn unique_dir(parent: &Path, prefix: &str) -> Result<PathBuf> {
    tempfile::Builder::new()
        .prefix(prefix)
        .rand_bytes(8)
        .tempdir_in(parent)
        .map(|dir| dir.keep())
        .map_err(|e| JobError::workspace(parent, e))
}
