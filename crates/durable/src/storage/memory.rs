//! In-memory implementation of ObjectStore for testing

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::store::*;

/// In-memory implementation of ObjectStore
#[derive(Default)]
pub struct InMemoryObjectStore {
    containers: RwLock<HashSet<String>>,
    objects: RwLock<HashMap<BlobPath, NewObject>>,
}

impl InMemoryObjectStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object directly, creating its container
    pub fn insert(&self, path: &BlobPath, object: NewObject) {
        self.containers.write().insert(path.container().to_string());
        self.objects.write().insert(path.clone(), object);
    }

    /// Paths of every object in a container, sorted
    pub fn list(&self, container: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .objects
            .read()
            .keys()
            .filter(|p| p.container() == container)
            .map(ToString::to_string)
            .collect();
        names.sort();
        names
    }

    /// Number of objects across all containers
    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    pub fn has_container(&self, container: &str) -> bool {
        self.containers.read().contains(container)
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn ensure_container(&self, container: &str) -> Result<(), StorageError> {
        self.containers.write().insert(container.to_string());
        Ok(())
    }

    async fn read(&self, path: &BlobPath) -> Result<Vec<u8>, StorageError> {
        self.objects
            .read()
            .get(path)
            .map(|o| o.data.clone())
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn write(&self, path: &BlobPath, object: NewObject) -> Result<(), StorageError> {
        if !self.has_container(path.container()) {
            return Err(StorageError::ContainerNotFound(path.container().to_string()));
        }
        self.objects.write().insert(path.clone(), object);
        Ok(())
    }

    async fn properties(&self, path: &BlobPath) -> Result<ObjectProperties, StorageError> {
        self.objects
            .read()
            .get(path)
            .map(|o| o.properties.clone())
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }
}
