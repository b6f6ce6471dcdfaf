pub mod answer_generation;
pub mod chain;
pub mod context;

pub use answer_generation::{GenerationBackend, OpenAiGeneration};
pub use chain::{Answer, RagChain, RetrievalConfig, NO_GROUNDING_ANSWER};

#[cfg(test)]
mod tests {
    use std::{
        fs,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    use async_trait::async_trait;
    use tempfile::tempdir;
    use tokio::sync::Mutex;

    use common::{
        error::AppError,
        storage::{cache::EmbeddingCache, index::SharedIndex},
        utils::embedding::EmbeddingProvider,
    };
    use ingestion_pipeline::{CorpusLoader, IngestionPipeline};
    use uuid::Uuid;

    use crate::{GenerationBackend, RagChain, RetrievalConfig};

    /// Records every delegated call so tests can assert on the prompt
    /// context without a live model.
    struct RecordingGenerator {
        calls: AtomicUsize,
        last_context: Mutex<Option<String>>,
    }

    impl RecordingGenerator {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                last_context: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl GenerationBackend for RecordingGenerator {
        async fn generate(&self, _query: &str, context: &str) -> Result<String, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_context.lock().await = Some(context.to_owned());
            Ok("The scriptures teach steadiness in action.".to_owned())
        }
    }

    const VERSE_ONE: &str =
        "Dhritarashtra said: assembled on the field of dharma, what did my sons do?";
    const VERSE_TWO: &str =
        "You have a right to perform your prescribed duty, but never to the fruits of action.";
    const VERSE_THREE: &str =
        "The soul is never born and never dies; it is unborn, eternal and primeval.";

    async fn build_chain(
        generator: Arc<dyn GenerationBackend>,
        similarity_floor: f32,
    ) -> (RagChain, tempfile::TempDir) {
        let dir = tempdir().expect("tempdir");
        let gita = dir.path().join("bhagavad_gita");
        fs::create_dir_all(&gita).expect("mkdir");
        fs::write(
            gita.join("verses.json"),
            serde_json::to_string(&serde_json::json!([
                {"chapter": 1, "text": VERSE_ONE},
                {"chapter": 2, "text": VERSE_TWO},
                {"chapter": 2, "text": VERSE_THREE},
            ]))
            .expect("json"),
        )
        .expect("write");

        let provider = Arc::new(EmbeddingProvider::new_hashed(64).expect("provider"));
        let cache_path = std::env::temp_dir()
            .join(format!("rag_e2e_{}", Uuid::new_v4()))
            .join("cache.json");
        let cache = EmbeddingCache::load(cache_path).await.expect("cache");
        let pipeline = IngestionPipeline::new(provider.clone(), cache, 8);

        let loader = CorpusLoader::new(dir.path());
        let units = loader.load_all().expect("load");
        assert_eq!(units.len(), 3);
        let index = pipeline.build_index(units).await.expect("build");

        let shared = SharedIndex::new();
        shared.publish(index).await;

        let chain = RagChain::new(
            provider,
            shared,
            generator,
            RetrievalConfig {
                top_k: 5,
                similarity_floor,
                context_budget_chars: 4000,
            },
        );
        (chain, dir)
    }

    #[tokio::test]
    async fn end_to_end_answer_grounds_on_the_matching_verse() {
        let generator = RecordingGenerator::new();
        let (chain, _corpus) = build_chain(generator.clone(), 0.3).await;

        let answer = chain.answer(VERSE_TWO, 1).await.expect("answer");

        assert_eq!(answer.sources.len(), 1);
        let top = &answer.sources[0];
        assert_eq!(top.text_unit.normalized_text, VERSE_TWO);
        assert!(
            top.score > 0.9,
            "near-exact match should score high, got {}",
            top.score
        );

        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        let context = generator
            .last_context
            .lock()
            .await
            .clone()
            .expect("context captured");
        assert!(
            context.contains(VERSE_TWO),
            "context must carry the verse text unmodified"
        );
        assert_eq!(answer.answer, "The scriptures teach steadiness in action.");
    }

    #[tokio::test]
    async fn unrelated_query_short_circuits_without_generation() {
        let generator = RecordingGenerator::new();
        // A single-token query caps the possible cosine score against any of
        // the multi-token verses well below this floor.
        let (chain, _corpus) = build_chain(generator.clone(), 0.75).await;

        let answer = chain
            .answer("chromodynamics", 3)
            .await
            .expect("answer");

        assert_eq!(answer.answer, crate::NO_GROUNDING_ANSWER);
        assert!(answer.sources.is_empty());
        assert_eq!(
            generator.calls.load(Ordering::SeqCst),
            0,
            "generator must not run without grounding"
        );
    }

    #[tokio::test]
    async fn collection_filter_restricts_sources() {
        let generator = RecordingGenerator::new();
        let (chain, _corpus) = build_chain(generator, 0.3).await;

        let answer = chain
            .answer_filtered(VERSE_TWO, 3, Some("mahabharata"))
            .await
            .expect("answer");
        assert!(
            answer.sources.is_empty(),
            "no unit belongs to the filtered collection"
        );
    }
}
