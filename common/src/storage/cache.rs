use std::{
    collections::HashMap,
    io::Write,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::AppError;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheData {
    entries: HashMap<String, Vec<f32>>,
}

/// On-disk embedding cache keyed by (unit id, content hash, model id).
///
/// The snapshot is a single JSON document, loaded wholesale at startup and
/// rewritten through a temp-file rename so a crash mid-write never leaves a
/// half-written snapshot that could be read back as valid. Concurrent writers
/// computing the same entry are idempotent: the vector is a pure function of
/// the key, so last write wins.
#[derive(Clone)]
pub struct EmbeddingCache {
    path: Arc<PathBuf>,
    data: Arc<Mutex<CacheData>>,
    dirty: Arc<AtomicBool>,
}

impl EmbeddingCache {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let raw = tokio::fs::read(&path).await?;
            serde_json::from_slice(&raw)?
        } else {
            CacheData::default()
        };

        Ok(Self {
            path: Arc::new(path),
            data: Arc::new(Mutex::new(data)),
            dirty: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn key(unit_id: &str, content_hash: &str, model_id: &str) -> String {
        format!("{unit_id}\n{content_hash}\n{model_id}")
    }

    pub async fn get(&self, key: &str) -> Option<Vec<f32>> {
        let guard = self.data.lock().await;
        guard.entries.get(key).cloned()
    }

    pub async fn put(&self, key: String, vector: Vec<f32>) {
        let mut guard = self.data.lock().await;
        guard.entries.insert(key, vector);
        self.dirty.store(true, Ordering::Relaxed);
    }

    pub async fn len(&self) -> usize {
        let guard = self.data.lock().await;
        guard.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn persist(&self) -> Result<(), AppError> {
        if !self.dirty.load(Ordering::Relaxed) {
            return Ok(());
        }

        let body = {
            let guard = self.data.lock().await;
            serde_json::to_vec_pretty(&*guard)?
        };
        let path = (*self.path).clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &body)).await??;
        self.dirty.store(false, Ordering::Relaxed);
        debug!(path = %self.path.display(), "persisted embedding cache");
        Ok(())
    }
}

/// Write-to-temp-then-rename inside the destination directory, so the rename
/// stays on one filesystem and readers only ever observe complete snapshots.
pub(crate) fn write_atomic(path: &Path, body: &[u8]) -> Result<(), AppError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(body)?;
    tmp.persist(path).map_err(|e| AppError::Io(e.error))?;
    Ok(())
}
