//! Step output artifacts and the writer that persists them

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::store::*;

/// Filesystem-safe slug of a file name
///
/// ASCII letters, digits and `_-=` are kept; every other run of characters
/// becomes a single `-`. Leading and trailing `-` are trimmed. An empty
/// result is replaced by a random id.
pub fn slug(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        let keep = c.is_ascii_alphanumeric() || matches!(c, '_' | '=' | '-');
        let c = if keep { c } else { '-' };
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }

    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        trimmed.to_string()
    }
}

/// The JSON document every step writes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepArtifact {
    pub document_id: String,
    pub reference_id: String,
    pub processor: String,
    pub main_content: String,
    /// Raw capability result
    pub message: serde_json::Value,
    pub original_filename: String,
    pub origin_file: String,
    #[serde(rename = "folderName")]
    pub folder_name: String,
}

impl StepArtifact {
    pub fn new(
        reference_id: impl Into<String>,
        processor: impl Into<String>,
        folder_name: impl Into<String>,
        original_filename: impl Into<String>,
    ) -> Self {
        let original_filename = original_filename.into();
        Self {
            document_id: slug(&original_filename),
            reference_id: reference_id.into(),
            processor: processor.into(),
            main_content: String::new(),
            message: serde_json::Value::Null,
            origin_file: original_filename.clone(),
            original_filename,
            folder_name: folder_name.into(),
        }
    }

    pub fn with_main_content(mut self, main_content: impl Into<String>) -> Self {
        self.main_content = main_content.into();
        self
    }

    pub fn with_message(mut self, message: serde_json::Value) -> Self {
        self.message = message;
        self
    }

    /// Extract `main_content` from a serialized artifact
    ///
    /// Returns `None` if the bytes are not a JSON object or the field is
    /// absent, not a string, or blank.
    pub fn main_content_of(raw: &[u8]) -> Option<String> {
        let value: serde_json::Value = serde_json::from_slice(raw).ok()?;
        value
            .get("main_content")?
            .as_str()
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
    }
}

/// Writes step outputs into the output container
///
/// Remembers which containers it has already ensured. The set only saves
/// round trips; the store's own create-if-absent is what makes it correct.
pub struct OutcomeWriter {
    store: Arc<dyn ObjectStore>,
    container: String,
    known_containers: Mutex<HashSet<String>>,
}

impl OutcomeWriter {
    pub fn new(store: Arc<dyn ObjectStore>, container: impl Into<String>) -> Self {
        Self {
            store,
            container: container.into(),
            known_containers: Mutex::new(HashSet::new()),
        }
    }

    /// The output container
    pub fn container(&self) -> &str {
        &self.container
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    async fn ensure_container(&self) -> Result<(), StorageError> {
        let mut known = self.known_containers.lock().await;
        if known.contains(&self.container) {
            return Ok(());
        }
        self.store.ensure_container(&self.container).await?;
        known.insert(self.container.clone());
        Ok(())
    }

    /// Write an artifact to `{folder}/{file_name}`, returning its location
    #[instrument(skip(self, artifact), fields(processor = %artifact.processor))]
    pub async fn write_artifact(
        &self,
        file_name: &str,
        artifact: &StepArtifact,
    ) -> Result<BlobPath, StorageError> {
        let json = serde_json::to_vec_pretty(artifact)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let name = format!("{}/{}", artifact.folder_name, file_name);
        self.write_object(&name, NewObject::new(json, "application/json"))
            .await
    }

    /// Write an arbitrary object under the output container
    pub async fn write_object(
        &self,
        name: &str,
        object: NewObject,
    ) -> Result<BlobPath, StorageError> {
        self.ensure_container().await?;
        let path = BlobPath::new(self.container.clone(), name)?;
        self.store.write(&path, object).await?;
        debug!(path = %path, "wrote step output");
        Ok(path)
    }
}
