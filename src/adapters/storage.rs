use crate::domain::ports::Storage;
use crate::utils::error::{StepError, StepResult};
use std::path::{Component, Path, PathBuf};

/// A directory acting as a filesystem root.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn resolve(&self, path: &str) -> StepResult<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(StepError::IoError(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("path escapes {}: {}", self.base_path.display(), path),
            )));
        }
        Ok(self.base_path.join(relative))
    }
}

impl Storage for LocalStorage {
    async fn read_file(&self, path: &str) -> StepResult<Vec<u8>> {
        let full_path = self.resolve(path)?;
        match tokio::fs::read(&full_path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StepError::not_found(path)),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes go to a sibling temp file first and are renamed into place.
    async fn write_file(&self, path: &str, data: &[u8]) -> StepResult<()> {
        let full_path = self.resolve(path)?;

        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file_name = full_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                StepError::IoError(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("not a file path: {}", path),
                ))
            })?;
        let staging = full_path.with_file_name(format!(".{}.envprov-tmp", file_name));

        tokio::fs::write(&staging, data).await?;
        if let Err(e) = tokio::fs::rename(&staging, &full_path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn exists(&self, path: &str) -> bool {
        match self.resolve(path) {
            Ok(full_path) => tokio::fs::try_exists(full_path).await.unwrap_or(false),
            Err(_) => false,
        }
    }
}
