use std::path::{Component, Path, PathBuf};

use tokio::fs::{self, File};
use tracing::{debug, info};

use crate::error::ServerError;

/// Accept only a bare filename: exactly one normal path component.
/// Prevents path traversal out of the storage root.
fn validate_filename(filename: &str) -> Result<&Path, ServerError> {
    let path = Path::new(filename);
    let mut components = path.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None)
            if !filename.contains(['/', '\\', '\0']) =>
        {
            Ok(path)
        }
        _ => Err(ServerError::ProtocolViolation(format!(
            "Invalid filename: {filename:?}"
        ))),
    }
}

/// Flat directory of transferred files keyed by filename. Uploads with the
/// same name overwrite each other regardless of sender.
#[derive(Debug, Clone)]
pub struct FileStore {
    base_path: PathBuf,
}

impl FileStore {
    pub async fn new(base_path: PathBuf) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::Storage(format!(
                "Failed to create upload directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "File store initialized");

        Ok(Self { base_path })
    }

    pub fn path_for(&self, filename: &str) -> Result<PathBuf, ServerError> {
        Ok(self.base_path.join(validate_filename(filename)?))
    }

    /// Create (or truncate) the file for a new upload.
    pub async fn create(&self, filename: &str) -> Result<File, ServerError> {
        let path = self.path_for(filename)?;
        let file = File::create(&path).await.map_err(|e| {
            ServerError::Storage(format!("Failed to create {}: {}", path.display(), e))
        })?;

        debug!(file = %filename, "Opened upload file");
        Ok(file)
    }

    pub async fn open(&self, filename: &str) -> Result<File, ServerError> {
        let path = self.path_for(filename)?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ServerError::FileNotFound(filename.to_string()));
        }

        File::open(&path).await.map_err(|e| {
            ServerError::Storage(format!("Failed to open {}: {}", path.display(), e))
        })
    }

    pub async fn exists(&self, filename: &str) -> bool {
        match self.path_for(filename) {
            Ok(path) => fs::try_exists(&path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Remove a file; a file that is already gone is not an error.
    pub async fn remove(&self, filename: &str) -> Result<(), ServerError> {
        let path = self.path_for(filename)?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(file = %filename, "Deleted file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ServerError::Storage(format!(
                "Failed to delete {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_filename_validation() {
        assert!(validate_filename("photo.png").is_ok());
        assert!(validate_filename("my file (1).mp4").is_ok());

        for bad in ["", ".", "..", "../etc/passwd", "a/b.png", "/abs.png", "a\\b.png"] {
            assert!(validate_filename(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[tokio::test]
    async fn test_create_open_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("uploads")).await.unwrap();

        let mut file = store.create("song.mp3").await.unwrap();
        file.write_all(b"la la la").await.unwrap();
        file.flush().await.unwrap();
        drop(file);

        assert!(store.exists("song.mp3").await);
        assert!(store.open("song.mp3").await.is_ok());

        store.remove("song.mp3").await.unwrap();
        assert!(!store.exists("song.mp3").await);
        // Removing twice is fine.
        store.remove("song.mp3").await.unwrap();
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf()).await.unwrap();

        assert!(matches!(
            store.open("nope.png").await,
            Err(ServerError::FileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf()).await.unwrap();

        assert!(matches!(
            store.create("../escape.png").await,
            Err(ServerError::ProtocolViolation(_))
        ));
    }
}
