//! Filesystem implementation of ObjectStore
//!
//! Containers are directories under the root. Object properties are kept
//! in a `<name>.props.json` sidecar next to the object.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use super::store::*;

const SIDECAR_SUFFIX: &str = ".props.json";

/// Filesystem implementation of ObjectStore
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Create a store rooted at `root`; the directory is created on demand
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn container_dir(&self, container: &str) -> PathBuf {
        self.root.join(container)
    }

    fn object_file(&self, path: &BlobPath) -> PathBuf {
        let mut file = self.container_dir(path.container());
        file.extend(path.name().split('/'));
        file
    }

    fn sidecar_file(&self, path: &BlobPath) -> PathBuf {
        let mut file = self.object_file(path).into_os_string();
        file.push(SIDECAR_SUFFIX);
        PathBuf::from(file)
    }
}

/// Write through a temporary file so readers never see a partial object
async fn write_atomic(target: &Path, data: &[u8]) -> Result<(), StorageError> {
    let mut tmp = target.as_os_str().to_owned();
    tmp.push(format!(".{}.tmp", Uuid::new_v4().simple()));
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, data).await?;
    if let Err(e) = fs::rename(&tmp, target).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

fn not_found(path: &BlobPath) -> impl Fn(std::io::Error) -> StorageError + '_ {
    move |e| match e.kind() {
        std::io::ErrorKind::NotFound => StorageError::NotFound(path.to_string()),
        _ => e.into(),
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn ensure_container(&self, container: &str) -> Result<(), StorageError> {
        if container.is_empty() || container.contains(['/', '\\']) || container.starts_with('.') {
            return Err(StorageError::InvalidPath(container.to_string()));
        }
        fs::create_dir_all(self.container_dir(container)).await?;
        Ok(())
    }

    async fn read(&self, path: &BlobPath) -> Result<Vec<u8>, StorageError> {
        fs::read(self.object_file(path))
            .await
            .map_err(not_found(path))
    }

    async fn write(&self, path: &BlobPath, object: NewObject) -> Result<(), StorageError> {
        if !fs::try_exists(self.container_dir(path.container())).await? {
            return Err(StorageError::ContainerNotFound(path.container().to_string()));
        }

        let file = self.object_file(path);
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).await?;
        }

        let props = serde_json::to_vec_pretty(&object.properties)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        write_atomic(&file, &object.data).await?;
        write_atomic(&self.sidecar_file(path), &props).await?;

        debug!(path = %path, bytes = object.data.len(), "wrote object");
        Ok(())
    }

    async fn properties(&self, path: &BlobPath) -> Result<ObjectProperties, StorageError> {
        if !fs::try_exists(self.object_file(path)).await? {
            return Err(StorageError::NotFound(path.to_string()));
        }

        match fs::read(self.sidecar_file(path)).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .map_err(|e| StorageError::Serialization(e.to_string())),
            // Objects dropped into the directory by hand have no sidecar
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ObjectProperties {
                content_type: "application/octet-stream".to_string(),
                ..Default::default()
            }),
            Err(e) => Err(e.into()),
        }
    }
}
