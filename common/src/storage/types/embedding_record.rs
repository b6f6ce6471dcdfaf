use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::text_unit::TextUnit;

/// One embedded text unit as produced by the embedding pipeline and consumed
/// by the vector index and cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub unit_id: String,
    pub content_hash: String,
    pub vector: Vec<f32>,
    pub model_id: String,
    pub created_at: DateTime<Utc>,
}

impl EmbeddingRecord {
    pub fn new(unit: &TextUnit, vector: Vec<f32>, model_id: String) -> Self {
        Self {
            unit_id: unit.id.clone(),
            content_hash: content_hash(&unit.normalized_text),
            vector,
            model_id,
            created_at: Utc::now(),
        }
    }
}

/// Sha-256 of the normalized text, hex encoded. Cache entries are stale the
/// moment this stops matching the unit's current normalized text.
pub fn content_hash(normalized_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_text.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
