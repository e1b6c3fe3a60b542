// Filesystem artifact store
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use fleet_core::port::{ArtifactStore, ArtifactStoreError};

/// Writes artifacts below a root directory
///
/// Relative artifact paths are resolved against the root; absolute paths are
/// used as given. Each write goes to a temp file in the target directory and
/// is renamed into place, so readers never see a half-written report.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

fn map_io(path: &Path, e: std::io::Error) -> ArtifactStoreError {
    let path = path.display().to_string();
    match e.kind() {
        ErrorKind::PermissionDenied => ArtifactStoreError::PermissionDenied {
            path,
            message: e.to_string(),
        },
        _ => ArtifactStoreError::WriteFailed {
            path,
            message: e.to_string(),
        },
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn write(&self, path: &str, bytes: &[u8]) -> Result<(), ArtifactStoreError> {
        let full = self.resolve(path);
        let file_name = full
            .file_name()
            .ok_or_else(|| ArtifactStoreError::WriteFailed {
                path: full.display().to_string(),
                message: "path has no file name".to_string(),
            })?
            .to_string_lossy()
            .into_owned();
        let dir = full.parent().unwrap_or(Path::new("."));

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| map_io(dir, e))?;

        let tmp = dir.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| map_io(&tmp, e))?;

        if let Err(e) = tokio::fs::rename(&tmp, &full).await {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
                warn!(path = %tmp.display(), error = %cleanup, "Failed to remove temp file");
            }
            return Err(map_io(&full, e));
        }

        debug!(path = %full.display(), bytes = bytes.len(), "Artifact written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_creates_parents_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());

        store.write("reports/2024/cmd-1.json", b"first").await.unwrap();
        store.write("reports/2024/cmd-1.json", b"second").await.unwrap();

        let path = dir.path().join("reports/2024/cmd-1.json");
        assert_eq!(std::fs::read(&path).unwrap(), b"second");

        // No temp files left behind
        let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("cmd-1.json")]);
    }

    #[tokio::test]
    async fn test_absolute_path_bypasses_root() {
        let root = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(root.path());

        let target = other.path().join("cmd-2.csv");
        store
            .write(target.to_str().unwrap(), b"a,b\r\n")
            .await
            .unwrap();
        assert!(target.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_read_only_directory() {
        use std::os::unix::fs::PermissionsExt;

        // root ignores permission bits
        if running_as_root() {
            return;
        }

        let dir = tempfile::tempdir().unwrap();
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o555)).unwrap();
        let store = FsArtifactStore::new(dir.path());

        let err = store.write("cmd-3.json", b"{}").await.unwrap_err();
        assert!(matches!(err, ArtifactStoreError::PermissionDenied { .. }));

        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    fn running_as_root() -> bool {
        std::process::Command::new("id")
            .arg("-u")
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).trim() == "0")
            .unwrap_or(false)
    }
}
