use crate::error::{RegoloError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// A single JSON document on disk, always replaced as a whole.
#[derive(Clone, Debug)]
pub struct JsonFile {
    path: PathBuf,
    private: bool,
}

impl JsonFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            private: false,
        }
    }

    /// Like [`JsonFile::new`], but restricts the file to its owner on unix.
    pub fn private(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            private: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `None` when the file does not exist.
    pub async fn read<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(RegoloError::io(&self.path, err)),
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|source| RegoloError::ConfigCorrupt {
                path: self.path.clone(),
                source,
            })
    }

    /// Writes to a sibling temp file and renames it over the target, so readers
    /// see either the previous document or the new one.
    pub async fn write<T: Serialize>(&self, value: &T) -> Result<()> {
        let serialized = serde_json::to_vec_pretty(value)?;
        let parent = self
            .path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty());
        if let Some(dir) = parent {
            fs::create_dir_all(dir)
                .await
                .map_err(|err| RegoloError::io(dir, err))?;
        }

        let tmp_path = self.temp_path();
        if let Err(err) = self.write_temp(&tmp_path, &serialized).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        if let Err(err) = fs::rename(&tmp_path, &self.path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(RegoloError::io(&self.path, err));
        }
        Ok(())
    }

    /// Deletes the file. Returns whether anything was removed.
    pub async fn remove(&self) -> Result<bool> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(RegoloError::io(&self.path, err)),
        }
    }

    async fn write_temp(&self, tmp_path: &Path, bytes: &[u8]) -> Result<()> {
        let mut file = fs::File::create(tmp_path)
            .await
            .map_err(|err| RegoloError::io(tmp_path, err))?;
        #[cfg(unix)]
        if self.private {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(tmp_path, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|err| RegoloError::io(tmp_path, err))?;
        }
        file.write_all(bytes)
            .await
            .map_err(|err| RegoloError::io(tmp_path, err))?;
        file.sync_all()
            .await
            .map_err(|err| RegoloError::io(tmp_path, err))?;
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "record".to_string());
        self.path
            .with_file_name(format!(".{name}.{}.tmp", Uuid::new_v4().simple()))
    }
}
