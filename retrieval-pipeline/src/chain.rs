use std::{collections::HashSet, sync::Arc};

use tracing::{info, instrument};

use common::{
    error::AppError,
    storage::{
        index::{RetrievalResult, SharedIndex},
        types::{embedding_record::content_hash, text_unit::TextUnit},
    },
    utils::embedding::EmbeddingProvider,
};

use crate::{answer_generation::GenerationBackend, context::assemble_context};

/// Fixed response returned when retrieval surfaces nothing above the
/// similarity floor. Distinct from an error: the system worked, the corpus
/// just has nothing relevant, and the generator is never called.
pub const NO_GROUNDING_ANSWER: &str =
    "No grounding passages were found for this question in the loaded scriptures.";

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub similarity_floor: f32,
    pub context_budget_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            similarity_floor: 0.3,
            context_budget_chars: 4000,
        }
    }
}

#[derive(Debug)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<RetrievalResult>,
}

/// Query-time orchestrator: embeds the question, searches the shared index,
/// dedups and floors the hits, assembles a budgeted context and delegates to
/// the generation backend.
pub struct RagChain {
    provider: Arc<EmbeddingProvider>,
    index: SharedIndex,
    generator: Arc<dyn GenerationBackend>,
    config: RetrievalConfig,
}

impl RagChain {
    pub fn new(
        provider: Arc<EmbeddingProvider>,
        index: SharedIndex,
        generator: Arc<dyn GenerationBackend>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            provider,
            index,
            generator,
            config,
        }
    }

    #[instrument(skip_all, fields(k))]
    pub async fn answer(&self, query: &str, k: usize) -> Result<Answer, AppError> {
        self.answer_filtered(query, k, None).await
    }

    /// Like `answer`, optionally restricted to a single collection. The
    /// filter matches canonical and display collection names,
    /// case-insensitively.
    pub async fn answer_filtered(
        &self,
        query: &str,
        k: usize,
        collection: Option<&str>,
    ) -> Result<Answer, AppError> {
        let index = self.index.current().await?;

        let query_model = self.provider.model_id();
        if index.model_id() != query_model {
            return Err(AppError::ModelMismatch {
                index_model: index.model_id().to_owned(),
                query_model,
            });
        }

        let query_vector = self.provider.embed(query).await?;
        // Over-fetch when filtering so a narrow collection can still fill k.
        let fetch_k = if collection.is_some() {
            k.saturating_mul(4).max(k)
        } else {
            k
        };
        let mut results = index.search(&query_vector, fetch_k)?;

        if let Some(wanted) = collection {
            let wanted = wanted.to_lowercase();
            results.retain(|result| collection_matches(&result.text_unit, &wanted));
        }
        results.retain(|result| result.score >= self.config.similarity_floor);
        let mut results = dedup_by_content(results);
        results.truncate(k);

        if results.is_empty() {
            info!("retrieval produced no grounding; skipping generation");
            return Ok(Answer {
                answer: NO_GROUNDING_ANSWER.to_owned(),
                sources: Vec::new(),
            });
        }

        let (context, kept) = assemble_context(&results, self.config.context_budget_chars);
        info!(
            sources = kept.len(),
            context_chars = context.chars().count(),
            "delegating to generation backend"
        );
        let answer = self.generator.generate(query, &context).await?;

        Ok(Answer {
            answer,
            sources: kept,
        })
    }
}

/// Keeps only the highest-scoring instance of each distinct passage text, so
/// the prompt is not dominated by the same verse repeated across collections.
/// Input must already be score-ordered.
fn dedup_by_content(results: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|result| seen.insert(content_hash(&result.text_unit.normalized_text)))
        .collect()
}

fn collection_matches(unit: &TextUnit, wanted_lower: &str) -> bool {
    if unit.collection.to_lowercase().contains(wanted_lower) {
        return true;
    }
    unit.metadata
        .get("collection_display")
        .map(|display| display.to_lowercase().contains(wanted_lower))
        .unwrap_or(false)
}
