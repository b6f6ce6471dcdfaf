use std::sync::Arc;

use futures::{stream, StreamExt, TryStreamExt};
use tracing::{info, info_span};

use common::{
    error::AppError,
    storage::{
        cache::EmbeddingCache,
        index::VectorIndex,
        types::{
            embedding_record::{content_hash, EmbeddingRecord},
            text_unit::TextUnit,
        },
    },
    utils::embedding::EmbeddingProvider,
};

/// Number of embedding batches allowed in flight at once. Results are
/// reassembled in input order regardless, so this is purely a throughput
/// knob.
const MAX_IN_FLIGHT_BATCHES: usize = 4;

/// Drives text units through the embedding backend into index-ready records.
///
/// Cache lookups precede every backend call; only misses are batched out.
/// Batch size bounds request memory and is never semantically observable:
/// the same corpus embeds to the same records at any batch size.
pub struct IngestionPipeline {
    provider: Arc<EmbeddingProvider>,
    cache: EmbeddingCache,
    batch_size: usize,
}

impl IngestionPipeline {
    pub fn new(provider: Arc<EmbeddingProvider>, cache: EmbeddingCache, batch_size: usize) -> Self {
        Self {
            provider,
            cache,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn embed_units(&self, units: &[TextUnit]) -> Result<Vec<EmbeddingRecord>, AppError> {
        let span = info_span!("embed_units", total = units.len());
        let _enter = span.enter();

        let model_id = self.provider.model_id();
        let dimension = self.provider.dimension();

        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; units.len()];
        let mut misses: Vec<usize> = Vec::new();

        for (idx, unit) in units.iter().enumerate() {
            let key = EmbeddingCache::key(&unit.id, &content_hash(&unit.normalized_text), &model_id);
            match self.cache.get(&key).await {
                Some(vector) => vectors[idx] = Some(vector),
                None => misses.push(idx),
            }
        }
        let cached = units.len() - misses.len();

        if !misses.is_empty() {
            let batches: Vec<Vec<usize>> = misses
                .chunks(self.batch_size)
                .map(<[usize]>::to_vec)
                .collect();

            let computed: Vec<Vec<Vec<f32>>> = stream::iter(batches.iter().map(|batch| {
                let texts: Vec<String> = batch
                    .iter()
                    .map(|&idx| units[idx].normalized_text.clone())
                    .collect();
                self.provider.embed_batch(texts)
            }))
            .buffered(MAX_IN_FLIGHT_BATCHES)
            .try_collect()
            .await?;

            for (batch, batch_vectors) in batches.iter().zip(computed) {
                if batch_vectors.len() != batch.len() {
                    return Err(AppError::EmbeddingBackend(format!(
                        "backend returned {} embeddings for a batch of {}",
                        batch_vectors.len(),
                        batch.len()
                    )));
                }
                for (&idx, vector) in batch.iter().zip(batch_vectors) {
                    if vector.len() != dimension {
                        return Err(AppError::Validation(format!(
                            "embedding for unit {} has dimension {}, model '{}' produces {}",
                            units[idx].id,
                            vector.len(),
                            model_id,
                            dimension
                        )));
                    }
                    let unit = &units[idx];
                    let key = EmbeddingCache::key(
                        &unit.id,
                        &content_hash(&unit.normalized_text),
                        &model_id,
                    );
                    self.cache.put(key, vector.clone()).await;
                    vectors[idx] = Some(vector);
                }
            }
            self.cache.persist().await?;
        }

        info!(
            total = units.len(),
            cached,
            computed = misses.len(),
            model = %model_id,
            "embedded corpus units"
        );

        units
            .iter()
            .zip(vectors)
            .map(|(unit, vector)| {
                let vector = vector.ok_or_else(|| {
                    AppError::EmbeddingBackend(format!("no embedding produced for unit {}", unit.id))
                })?;
                Ok(EmbeddingRecord::new(unit, vector, model_id.clone()))
            })
            .collect()
    }

    /// Embeds the units and builds a fresh index from the result. The caller
    /// decides when to publish it; a partially built index never leaves this
    /// function.
    pub async fn build_index(&self, units: Vec<TextUnit>) -> Result<VectorIndex, AppError> {
        let records = self.embed_units(&units).await?;
        VectorIndex::build(
            records,
            units,
            self.provider.model_id(),
            self.provider.dimension(),
        )
    }
}
