//! ObjectStore trait definition

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::envelope::Metadata;

/// Error type for object store operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Object does not exist
    #[error("object not found: {0}")]
    NotFound(String),

    /// Container does not exist
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// Path is not `container/name` or escapes its container
    #[error("invalid object path: {0:?}")]
    InvalidPath(String),

    /// I/O error
    #[error("storage I/O error: {0}")]
    Io(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Location of an object: container plus a `/`-separated name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobPath {
    container: String,
    name: String,
}

impl BlobPath {
    /// Build a path from its parts
    pub fn new(
        container: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self, StorageError> {
        let container = container.into();
        let name = name.into().trim_start_matches('/').to_string();
        let full = format!("{container}/{name}");

        if container.is_empty() || container.contains('/') || name.is_empty() {
            return Err(StorageError::InvalidPath(full));
        }
        if name
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            return Err(StorageError::InvalidPath(full));
        }
        Ok(Self { container, name })
    }

    /// Parse `container/name`
    pub fn parse(path: &str) -> Result<Self, StorageError> {
        let trimmed = path.trim().trim_start_matches('/');
        let (container, name) = trimmed
            .split_once('/')
            .ok_or_else(|| StorageError::InvalidPath(path.to_string()))?;
        Self::new(container, name)
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last segment of the name
    pub fn file_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// File name without its final extension
    pub fn file_stem(&self) -> &str {
        let file_name = self.file_name();
        match file_name.rfind('.') {
            Some(0) | None => file_name,
            Some(dot) => &file_name[..dot],
        }
    }

    /// Lowercased final extension, if any
    pub fn extension(&self) -> Option<String> {
        let file_name = self.file_name();
        match file_name.rfind('.') {
            Some(0) | None => None,
            Some(dot) => Some(file_name[dot + 1..].to_lowercase()),
        }
    }
}

impl fmt::Display for BlobPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.name)
    }
}

/// Properties stored alongside an object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectProperties {
    /// Content type recorded at write time
    #[serde(default)]
    pub content_type: String,

    /// User metadata
    #[serde(default)]
    pub metadata: Metadata,

    /// Index tags
    #[serde(default)]
    pub tags: Metadata,
}

/// An object to be written
#[derive(Debug, Clone)]
pub struct NewObject {
    pub data: Vec<u8>,
    pub properties: ObjectProperties,
}

impl NewObject {
    pub fn new(data: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            properties: ObjectProperties {
                content_type: content_type.into(),
                ..Default::default()
            },
        }
    }

    /// Attach index tags
    pub fn with_tags(mut self, tags: Metadata) -> Self {
        self.properties.tags = tags;
        self
    }

    /// Attach user metadata
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.properties.metadata = metadata;
        self
    }
}

/// Object storage
///
/// Writes overwrite, so a replayed step that writes the same path twice
/// leaves a single object behind.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Create the container unless it already exists
    async fn ensure_container(&self, container: &str) -> Result<(), StorageError>;

    /// Read an object's content
    async fn read(&self, path: &BlobPath) -> Result<Vec<u8>, StorageError>;

    /// Write an object, replacing any existing one
    async fn write(&self, path: &BlobPath, object: NewObject) -> Result<(), StorageError>;

    /// Read an object's properties
    async fn properties(&self, path: &BlobPath) -> Result<ObjectProperties, StorageError>;
}
