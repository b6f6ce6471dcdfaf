use std::{cmp::Ordering, collections::HashMap, path::Path, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::{
    error::AppError,
    storage::{
        cache::write_atomic,
        types::{embedding_record::EmbeddingRecord, text_unit::TextUnit},
    },
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    unit_id: String,
    vector: Vec<f32>,
}

/// Exact nearest-neighbour index over L2-normalized embedding vectors.
///
/// Rebuild is the only mutation path: `build` replaces the contents
/// wholesale, which makes stale vectors impossible at the cost of incremental
/// updates. Vectors are normalized once here and once per query, so search is
/// a plain dot product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    model_id: String,
    dimension: usize,
    entries: Vec<IndexEntry>,
    units: HashMap<String, TextUnit>,
}

/// One search hit, hydrated with its text unit. Orderings are always
/// score-descending with unit-id-ascending tie breaks.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub unit_id: String,
    pub score: f32,
    pub text_unit: TextUnit,
}

impl VectorIndex {
    pub fn build(
        records: Vec<EmbeddingRecord>,
        units: Vec<TextUnit>,
        model_id: String,
        dimension: usize,
    ) -> Result<Self, AppError> {
        let unit_map: HashMap<String, TextUnit> =
            units.into_iter().map(|unit| (unit.id.clone(), unit)).collect();

        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            if record.model_id != model_id {
                return Err(AppError::Validation(format!(
                    "embedding for unit {} was produced by model '{}', index expects '{}'",
                    record.unit_id, record.model_id, model_id
                )));
            }
            if record.vector.len() != dimension {
                return Err(AppError::Validation(format!(
                    "embedding for unit {} has dimension {}, index expects {}",
                    record.unit_id,
                    record.vector.len(),
                    dimension
                )));
            }
            if !unit_map.contains_key(&record.unit_id) {
                return Err(AppError::Validation(format!(
                    "no text unit found for embedding record {}",
                    record.unit_id
                )));
            }
            entries.push(IndexEntry {
                unit_id: record.unit_id,
                vector: l2_normalize(record.vector),
            });
        }

        Ok(Self {
            model_id,
            dimension,
            entries,
            units: unit_map,
        })
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the `min(k, len)` closest units by cosine similarity. The
    /// scan is exact, so a fixed index and query always produce the same
    /// ordering. An empty index yields an empty result, never an error.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievalResult>, AppError> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(AppError::Validation(format!(
                "query vector has dimension {}, index expects {}",
                query.len(),
                self.dimension
            )));
        }

        let query = l2_normalize(query.to_vec());
        let mut scored: Vec<RetrievalResult> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let unit = self.units.get(&entry.unit_id)?;
                Some(RetrievalResult {
                    unit_id: entry.unit_id.clone(),
                    score: dot(&entry.vector, &query),
                    text_unit: unit.clone(),
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.unit_id.cmp(&b.unit_id))
        });
        scored.truncate(k);
        Ok(scored)
    }

    /// Serializes the whole index (vectors plus unit map) so a restarted
    /// process can serve queries without re-embedding.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), AppError> {
        let body = serde_json::to_vec(self)?;
        let path = path.as_ref().to_path_buf();
        let display_path = path.display().to_string();
        tokio::task::spawn_blocking(move || write_atomic(&path, &body)).await??;
        info!(path = %display_path, vectors = self.entries.len(), "saved index snapshot");
        Ok(())
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let raw = tokio::fs::read(path.as_ref()).await?;
        let index: Self = serde_json::from_slice(&raw)?;
        for entry in &index.entries {
            if entry.vector.len() != index.dimension {
                return Err(AppError::Validation(format!(
                    "snapshot entry {} has dimension {}, index expects {}",
                    entry.unit_id,
                    entry.vector.len(),
                    index.dimension
                )));
            }
        }
        info!(
            path = %path.as_ref().display(),
            vectors = index.entries.len(),
            model = %index.model_id,
            "loaded index snapshot"
        );
        Ok(index)
    }
}

/// Handle shared between queries and rebuilds. Queries clone the current
/// index Arc under a read lock and keep serving it while a rebuild is in
/// flight; `publish` swaps the whole structure in one write-lock window, so a
/// partially built index is never visible.
#[derive(Clone, Default)]
pub struct SharedIndex {
    inner: Arc<RwLock<Option<Arc<VectorIndex>>>>,
}

impl SharedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn publish(&self, index: VectorIndex) {
        let mut guard = self.inner.write().await;
        *guard = Some(Arc::new(index));
    }

    pub async fn current(&self) -> Result<Arc<VectorIndex>, AppError> {
        let guard = self.inner.read().await;
        guard.clone().ok_or(AppError::IndexNotBuilt)
    }

    pub async fn is_built(&self) -> bool {
        self.inner.read().await.is_some()
    }
}

fn l2_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn unit(id_hint: usize, text: &str) -> TextUnit {
        TextUnit::new(
            "bhagavad_gita".into(),
            "gita/verses.json".into(),
            id_hint,
            text.into(),
            text.into(),
            BTreeMap::new(),
        )
    }

    fn record(unit: &TextUnit, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord::new(unit, vector, "m1".into())
    }

    fn three_vector_index() -> (VectorIndex, Vec<TextUnit>) {
        let units = vec![
            unit(0, "verse about dharma"),
            unit(1, "verse about karma"),
            unit(2, "verse about moksha"),
        ];
        let records = vec![
            record(&units[0], vec![1.0, 0.0, 0.0]),
            record(&units[1], vec![0.0, 1.0, 0.0]),
            record(&units[2], vec![0.7, 0.7, 0.0]),
        ];
        let index =
            VectorIndex::build(records, units.clone(), "m1".into(), 3).expect("build index");
        (index, units)
    }

    #[test]
    fn identical_vector_scores_maximum() {
        let (index, units) = three_vector_index();
        let results = index.search(&[1.0, 0.0, 0.0], 1).expect("search");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].unit_id, units[0].id);
        assert!(
            (results[0].score - 1.0).abs() < 1e-5,
            "expected maximal cosine score, got {}",
            results[0].score
        );
    }

    #[test]
    fn search_is_deterministic() {
        let (index, _) = three_vector_index();
        let first = index.search(&[0.9, 0.4, 0.0], 3).expect("search");
        let second = index.search(&[0.9, 0.4, 0.0], 3).expect("search");
        let ids: Vec<_> = first.iter().map(|r| r.unit_id.clone()).collect();
        let other: Vec<_> = second.iter().map(|r| r.unit_id.clone()).collect();
        assert_eq!(ids, other);
        for (a, b) in first.iter().zip(&second) {
            assert!((a.score - b.score).abs() < f32::EPSILON);
        }
    }

    #[test]
    fn ties_break_by_unit_id_ascending() {
        let units = vec![unit(1, "second verse"), unit(0, "first verse")];
        let records = vec![
            record(&units[0], vec![1.0, 0.0]),
            record(&units[1], vec![1.0, 0.0]),
        ];
        let index = VectorIndex::build(records, units, "m1".into(), 2).expect("build");
        let results = index.search(&[1.0, 0.0], 2).expect("search");
        assert_eq!(results[0].unit_id, "bhagavad_gita:verses:0");
        assert_eq!(results[1].unit_id, "bhagavad_gita:verses:1");
    }

    #[test]
    fn empty_index_returns_empty_results() {
        let index = VectorIndex::build(Vec::new(), Vec::new(), "m1".into(), 3).expect("build");
        let results = index.search(&[1.0, 0.0, 0.0], 5).expect("search");
        assert!(results.is_empty());
    }

    #[test]
    fn k_larger_than_index_is_clamped() {
        let (index, _) = three_vector_index();
        let results = index.search(&[1.0, 0.0, 0.0], 10).expect("search");
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn mixed_dimensions_are_rejected() {
        let units = vec![unit(0, "one"), unit(1, "two")];
        let records = vec![
            record(&units[0], vec![1.0, 0.0, 0.0]),
            record(&units[1], vec![1.0, 0.0]),
        ];
        let err = VectorIndex::build(records, units, "m1".into(), 3).expect_err("must fail");
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn foreign_model_records_are_rejected() {
        let units = vec![unit(0, "one")];
        let records = vec![EmbeddingRecord::new(
            &units[0],
            vec![1.0, 0.0, 0.0],
            "m2".into(),
        )];
        let err = VectorIndex::build(records, units, "m1".into(), 3).expect_err("must fail");
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn snapshot_roundtrips_through_disk() {
        let (index, units) = three_vector_index();
        let dir = std::env::temp_dir().join(format!("index_snapshot_{}", Uuid::new_v4()));
        let path = dir.join("index.json");

        index.save(&path).await.expect("save");
        let loaded = VectorIndex::load(&path).await.expect("load");

        assert_eq!(loaded.model_id(), "m1");
        assert_eq!(loaded.len(), 3);
        let results = loaded.search(&[1.0, 0.0, 0.0], 1).expect("search");
        assert_eq!(results[0].unit_id, units[0].id);
        assert_eq!(results[0].text_unit.normalized_text, "verse about dharma");

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn shared_index_errors_before_first_publish() {
        let shared = SharedIndex::new();
        let err = shared.current().await.expect_err("must fail");
        assert!(matches!(err, AppError::IndexNotBuilt));
    }

    #[tokio::test]
    async fn shared_index_swaps_on_publish() {
        let shared = SharedIndex::new();
        let (index, _) = three_vector_index();
        shared.publish(index).await;

        let current = shared.current().await.expect("current");
        assert_eq!(current.len(), 3);

        let empty = VectorIndex::build(Vec::new(), Vec::new(), "m1".into(), 3).expect("build");
        shared.publish(empty).await;
        let swapped = shared.current().await.expect("current");
        assert!(swapped.is_empty());
        // The handle taken before the swap keeps serving the old snapshot.
        assert_eq!(current.len(), 3);
    }
}
