//! Artifact store - per-session source and binary files
//!
//! Every session owns exactly one `code_<session id>.<ext>` pair inside the
//! artifact directory. Names are derived from the session id, so concurrent
//! sessions never collide and leftovers from a crashed process can be found
//! again by name alone.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::PlaygroundError;

const ARTIFACT_PREFIX: &str = "code_";

/// Source and binary path of one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub source: PathBuf,
    pub binary: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    source_extension: String,
    binary_extension: String,
}

impl ArtifactStore {
    pub fn new(
        dir: impl Into<PathBuf>,
        source_extension: impl Into<String>,
        binary_extension: impl Into<String>,
    ) -> Self {
        Self {
            dir: dir.into(),
            source_extension: source_extension.into(),
            binary_extension: binary_extension.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the artifact directory if it does not exist yet
    pub async fn ensure_dir(&self) -> Result<(), PlaygroundError> {
        fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    /// Paths for a session; the same id always yields the same pair
    pub fn allocate(&self, session_id: Uuid) -> ArtifactPaths {
        let stem = format!("{}{}", ARTIFACT_PREFIX, session_id.simple());
        ArtifactPaths {
            source: self
                .dir
                .join(format!("{}.{}", stem, self.source_extension)),
            binary: self
                .dir
                .join(format!("{}.{}", stem, self.binary_extension)),
        }
    }

    /// Overwrite a source artifact with the submitted text
    pub async fn write(&self, path: &Path, text: &str) -> Result<(), PlaygroundError> {
        fs::write(path, text).await?;
        debug!("Wrote {} bytes to {:?}", text.len(), path);
        Ok(())
    }

    /// Delete a file; a missing file is not an error
    pub async fn delete_if_exists(&self, path: &Path) -> Result<(), PlaygroundError> {
        match fs::remove_file(path).await {
            Ok(()) => {
                debug!("Deleted artifact {:?}", path);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PlaygroundError::Cleanup {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    /// Delete both artifacts of a session.
    ///
    /// Failures are logged and never stop the second deletion.
    pub async fn release(&self, paths: &ArtifactPaths) {
        for path in [&paths.source, &paths.binary] {
            if let Err(e) = self.delete_if_exists(path).await {
                warn!("{}", e);
            }
        }
    }

    /// Remove every file that follows the artifact naming convention.
    ///
    /// Returns the number of files deleted.
    pub async fn sweep(&self) -> Result<usize, PlaygroundError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !self.is_artifact_name(name) {
                continue;
            }

            match self.delete_if_exists(&entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("{}", e),
            }
        }

        if removed > 0 {
            info!("Swept {} orphaned artifacts from {:?}", removed, self.dir);
        }
        Ok(removed)
    }

    fn is_artifact_name(&self, name: &str) -> bool {
        let Some(rest) = name.strip_prefix(ARTIFACT_PREFIX) else {
            return false;
        };
        match rest.rsplit_once('.') {
            Some((stem, ext)) => {
                !stem.is_empty() && (ext == self.source_extension || ext == self.binary_extension)
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> ArtifactStore {
        ArtifactStore::new(dir, "cpp", "exe")
    }

    #[test]
    fn test_allocate_is_deterministic() {
        let store = store(Path::new("/tmp/artifacts"));
        let id = Uuid::new_v4();
        assert_eq!(store.allocate(id), store.allocate(id));

        let paths = store.allocate(id);
        assert_eq!(paths.source.extension().unwrap(), "cpp");
        assert_eq!(paths.binary.extension().unwrap(), "exe");
    }

    #[test]
    fn test_allocate_is_unique_per_session() {
        let store = store(Path::new("/tmp/artifacts"));
        let a = store.allocate(Uuid::new_v4());
        let b = store.allocate(Uuid::new_v4());
        assert_ne!(a.source, b.source);
        assert_ne!(a.binary, b.binary);
    }

    #[tokio::test]
    async fn test_delete_twice_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let paths = store.allocate(Uuid::new_v4());

        store.write(&paths.source, "int main() {}").await.unwrap();
        tokio_test::assert_ok!(store.delete_if_exists(&paths.source).await);
        tokio_test::assert_ok!(store.delete_if_exists(&paths.source).await);
        assert!(!paths.source.exists());
    }

    #[tokio::test]
    async fn test_delete_reports_other_failures() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        // Removing a directory with remove_file fails with something other than NotFound
        let err = tokio_test::assert_err!(store.delete_if_exists(dir.path()).await);
        assert!(matches!(err, PlaygroundError::Cleanup { .. }));
    }

    #[tokio::test]
    async fn test_release_removes_both() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let paths = store.allocate(Uuid::new_v4());
        store.write(&paths.source, "a").await.unwrap();
        store.write(&paths.binary, "b").await.unwrap();

        store.release(&paths).await;
        assert!(!paths.source.exists());
        assert!(!paths.binary.exists());

        // Already gone
        store.release(&paths).await;
    }

    #[tokio::test]
    async fn test_sweep_only_matches_convention() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let paths = store.allocate(Uuid::new_v4());
        store.write(&paths.source, "a").await.unwrap();
        store.write(&paths.binary, "b").await.unwrap();
        fs::write(dir.path().join("code_notes.txt"), "keep").await.unwrap();
        fs::write(dir.path().join("main.cpp"), "keep").await.unwrap();
        fs::write(dir.path().join("code_.cpp"), "keep").await.unwrap();

        let removed = store.sweep().await.unwrap();
        assert_eq!(removed, 2);
        assert!(!paths.source.exists());
        assert!(!paths.binary.exists());
        assert!(dir.path().join("code_notes.txt").exists());
        assert!(dir.path().join("main.cpp").exists());
        assert!(dir.path().join("code_.cpp").exists());
    }

    #[tokio::test]
    async fn test_sweep_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir.path().join("does-not-exist"));
        assert_eq!(store.sweep().await.unwrap(), 0);
    }
}
