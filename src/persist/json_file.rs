//! JSON state file persister

use super::traits::{PersistError, Persister};
use crate::types::{StoreSnapshot, SNAPSHOT_VERSION};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Persists snapshots as a single pretty-printed JSON document.
///
/// Writes go to a temp file in the same directory, are fsynced, then renamed
/// over the target, so a crash mid-write leaves the previous state intact.
#[derive(Debug, Clone)]
pub struct JsonFilePersister {
    path: PathBuf,
}

impl JsonFilePersister {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

impl Persister for JsonFilePersister {
    fn load(&self) -> Result<Option<StoreSnapshot>, PersistError> {
        let content = match std::fs::read(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("State file {} not found, starting empty", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let snapshot: StoreSnapshot = serde_json::from_slice(&content)?;
        if snapshot.version != SNAPSHOT_VERSION {
            warn!(
                "State file {} has version {}, expected {}",
                self.path.display(),
                snapshot.version,
                SNAPSHOT_VERSION
            );
            return Err(PersistError::UnsupportedVersion(snapshot.version));
        }

        debug!(
            "Loaded {} users and {} sessions from {}",
            snapshot.users.len(),
            snapshot.sessions.len(),
            self.path.display()
        );
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &StoreSnapshot) -> Result<(), PersistError> {
        let parent = self.parent_dir();
        std::fs::create_dir_all(&parent)?;

        let data = serde_json::to_vec_pretty(snapshot)?;
        let mut tmp = NamedTempFile::new_in(&parent)?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| PersistError::Io(e.error))?;

        debug!(
            "Saved {} users and {} sessions to {}",
            snapshot.users.len(),
            snapshot.sessions.len(),
            self.path.display()
        );
        Ok(())
    }
}
