//! Task output storage: the contract the [`crate::resolver`] reads task outputs
//! through. A networked/shared backend is an external collaborator (§3); this
//! module ships the in-memory implementation the core needs for single-process
//! execution and tests.

use async_trait::async_trait;
use serde_json::Value;
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::path;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("no output stored for task '{task_id}'"))]
    NotFound { task_id: String },

    #[snafu(display("path navigation error for task '{task_id}': {source}"))]
    Path { task_id: String, source: path::Error },

    #[snafu(display("stored output for task '{task_id}' is not valid JSON: {source}"))]
    Malformed {
        task_id: String,
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Semantic contract for reading a task's output, either as raw bytes
/// (passthrough) or as a navigated leaf value.
#[async_trait]
pub trait OptimizedJsonStorage: Send + Sync {
    /// The raw serialized bytes of a task's output, or `None` if the task has
    /// not produced output yet. Must return the stored bytes verbatim.
    async fn get_raw_json(&self, task_id: &str) -> Option<Vec<u8>>;

    /// A typed leaf value at `path` within a task's output.
    async fn get_value(&self, task_id: &str, path: &str) -> Result<Value>;
}

/// A single task's stored output: the original bytes plus a lazily-shared
/// parsed tree, so passthrough and deep-path navigation share one entry.
#[derive(Debug, Clone)]
struct StoredOutput {
    raw: Vec<u8>,
    parsed: Arc<Value>,
}

/// In-memory, single-process [`OptimizedJsonStorage`]. Reads and writes are
/// guarded by a single [`RwLock`]; writes only happen at task-completion
/// boundaries so contention is low (§5 Shared resources).
#[derive(Debug, Default, Clone)]
pub struct InMemoryOutputStore {
    outputs: Arc<RwLock<HashMap<String, StoredOutput>>>,
}

impl InMemoryOutputStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            outputs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Record a task's output. `raw` must be the exact bytes a passthrough
    /// read should return.
    pub async fn put(&self, task_id: impl Into<String>, raw: Vec<u8>) -> Result<()> {
        let task_id = task_id.into();
        let parsed: Value = serde_json::from_slice(&raw).context(MalformedSnafu {
            task_id: task_id.clone(),
        })?;
        self.outputs.write().await.insert(
            task_id,
            StoredOutput {
                raw,
                parsed: Arc::new(parsed),
            },
        );
        Ok(())
    }

    /// Convenience for producing output directly from a [`Value`].
    pub async fn put_value(&self, task_id: impl Into<String>, value: &Value) -> Result<()> {
        let task_id = task_id.into();
        let raw = serde_json::to_vec(value).context(MalformedSnafu {
            task_id: task_id.clone(),
        })?;
        self.put(task_id, raw).await
    }
}

#[async_trait]
impl OptimizedJsonStorage for InMemoryOutputStore {
    async fn get_raw_json(&self, task_id: &str) -> Option<Vec<u8>> {
        self.outputs.read().await.get(task_id).map(|o| o.raw.clone())
    }

    async fn get_value(&self, task_id: &str, path: &str) -> Result<Value> {
        let outputs = self.outputs.read().await;
        let stored = outputs
            .get(task_id)
            .ok_or_else(|| NotFoundSnafu { task_id }.build())?;

        let segments = path::parse(path).context(PathSnafu { task_id })?;
        let leaf = path::navigate(&stored.parsed, path, &segments).context(PathSnafu { task_id })?;
        Ok(leaf.clone())
    }
}
