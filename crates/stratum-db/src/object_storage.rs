//! Filesystem object storage.
//!
//! Objects live at `{base_path}/{key}`. Writes go to a temporary sibling file
//! and are renamed into place, so readers never observe a partial object.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use stratum_core::defaults::OBJECT_KEY_MAX_LENGTH;
use stratum_core::{Error, ObjectStore, Result};

/// Reject keys that are empty, too long, or could escape the base directory.
pub fn validate_object_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidInput("object key must not be empty".to_string()));
    }
    if key.len() > OBJECT_KEY_MAX_LENGTH {
        return Err(Error::InvalidInput(format!(
            "object key exceeds {} bytes",
            OBJECT_KEY_MAX_LENGTH
        )));
    }
    if key.contains('\0') || key.contains('\\') {
        return Err(Error::InvalidInput(format!("invalid object key: {}", key)));
    }
    let safe = Path::new(key)
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !safe {
        return Err(Error::InvalidInput(format!("invalid object key: {}", key)));
    }
    Ok(())
}

/// Object store rooted at a local directory.
pub struct FilesystemObjectStore {
    base_path: PathBuf,
}

impl FilesystemObjectStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn full_path(&self, key: &str) -> Result<PathBuf> {
        validate_object_key(key)?;
        Ok(self.base_path.join(key))
    }

    /// Round-trip a health-check object to catch permission or mount problems at startup.
    pub async fn validate(&self) -> Result<()> {
        let key = format!(".health-check/{}", Uuid::new_v4());
        let sample = b"object-storage-health-check";
        self.put(&key, sample).await?;
        let read_back = self.get(&key).await?;
        self.delete(&key).await?;
        let _ = fs::remove_dir(self.base_path.join(".health-check")).await;
        if read_back != sample {
            return Err(Error::Storage("read-back mismatch".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(key)?;
        debug!(
            subsystem = "db",
            component = "object_storage",
            op = "put",
            key = %key,
            size = data.len(),
            "Writing object"
        );

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                warn!(parent = %parent.display(), error = %e, "object_storage: create_dir_all failed");
                e
            })?;
        }

        let mut temp_name = full_path.clone().into_os_string();
        temp_name.push(format!(".{}.tmp", Uuid::new_v4().simple()));
        let temp_path = PathBuf::from(temp_name);

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&temp_path, &full_path).await {
            warn!(to = %full_path.display(), error = %e, "object_storage: rename failed");
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&full_path, std::fs::Permissions::from_mode(0o644)).await?;
        }

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(key)?;
        match fs::read(&full_path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("object {}", key)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let full_path = self.full_path(key)?;
        match fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let full_path = self.full_path(key)?;
        Ok(fs::try_exists(full_path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_object_key() {
        assert!(validate_object_key("tasks/abc/step.png").is_ok());
        assert!(validate_object_key("").is_err());
        assert!(validate_object_key("../etc/passwd").is_err());
        assert!(validate_object_key("/absolute").is_err());
        assert!(validate_object_key("a/./b").is_ok());
        assert!(validate_object_key("a\\b").is_err());
        assert!(validate_object_key(&"k".repeat(OBJECT_KEY_MAX_LENGTH + 1)).is_err());
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemObjectStore::new(dir.path());

        store.put("tasks/t1/a.bin", b"hello").await.unwrap();
        assert!(store.exists("tasks/t1/a.bin").await.unwrap());
        assert_eq!(store.get("tasks/t1/a.bin").await.unwrap(), b"hello");

        store.put("tasks/t1/a.bin", b"replaced").await.unwrap();
        assert_eq!(store.get("tasks/t1/a.bin").await.unwrap(), b"replaced");

        store.delete("tasks/t1/a.bin").await.unwrap();
        assert!(!store.exists("tasks/t1/a.bin").await.unwrap());

        // Deleting twice is fine
        store.delete("tasks/t1/a.bin").await.unwrap();
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemObjectStore::new(dir.path());
        let err = store.get("nope").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemObjectStore::new(dir.path());
        store.put("obj", b"x").await.unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["obj".to_string()]);
    }

    #[tokio::test]
    async fn test_validate_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemObjectStore::new(dir.path());
        store.validate().await.unwrap();
    }
}
