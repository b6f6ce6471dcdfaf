use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    str::FromStr,
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use async_openai::{types::CreateEmbeddingRequestArgs, Client};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, ModelTrait, TextEmbedding, TextInitOptions};
use tokio::sync::Mutex;

use crate::{
    error::AppError,
    utils::config::{AppConfig, EmbeddingBackendKind},
};

/// Capability interface for embedding backends: a batch of texts in, an
/// equal-length batch of fixed-dimension vectors out. A failed batch is a
/// hard error, never a partial result.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    fn model_id(&self) -> String;
    fn dimension(&self) -> usize;
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError>;
}

pub struct OpenAiEmbedding {
    client: Arc<Client<async_openai::config::OpenAIConfig>>,
    model: String,
    dimensions: u32,
}

#[async_trait]
impl EmbeddingBackend for OpenAiEmbedding {
    fn model_id(&self) -> String {
        self.model.clone()
    }

    fn dimension(&self) -> usize {
        self.dimensions as usize
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let expected = texts.len();

        let request = CreateEmbeddingRequestArgs::default()
            .model(self.model.clone())
            .input(texts)
            .dimensions(self.dimensions)
            .build()
            .map_err(|e| AppError::EmbeddingBackend(e.to_string()))?;

        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| AppError::EmbeddingBackend(e.to_string()))?;

        let embeddings: Vec<Vec<f32>> = response
            .data
            .into_iter()
            .map(|item| item.embedding)
            .collect();

        if embeddings.len() != expected {
            return Err(AppError::EmbeddingBackend(format!(
                "backend returned {} embeddings for {} inputs",
                embeddings.len(),
                expected
            )));
        }

        Ok(embeddings)
    }
}

pub struct FastEmbedEmbedding {
    model: Arc<Mutex<TextEmbedding>>,
    model_name: EmbeddingModel,
    dimension: usize,
}

#[async_trait]
impl EmbeddingBackend for FastEmbedEmbedding {
    fn model_id(&self) -> String {
        self.model_name.to_string()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut guard = self.model.lock().await;
        guard
            .embed(texts, None)
            .map_err(|e| AppError::EmbeddingBackend(format!("fastembed batch failed: {e}")))
    }
}

/// Deterministic token-bucket embedding. No model download, no network; the
/// offline backend used by tests and air-gapped runs.
pub struct HashedEmbedding {
    dimension: usize,
}

impl HashedEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

#[async_trait]
impl EmbeddingBackend for HashedEmbedding {
    fn model_id(&self) -> String {
        format!("hashed-{}", self.dimension)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError> {
        Ok(texts
            .into_iter()
            .map(|text| hashed_embedding(&text, self.dimension))
            .collect())
    }
}

#[derive(Clone)]
pub struct EmbeddingProvider {
    inner: Arc<dyn EmbeddingBackend>,
}

impl EmbeddingProvider {
    pub fn new(backend: Arc<dyn EmbeddingBackend>) -> Self {
        Self { inner: backend }
    }

    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        match config.embedding_backend {
            EmbeddingBackendKind::OpenAi => {
                let api_key = config.openai_api_key.clone().ok_or_else(|| {
                    anyhow!("openai_api_key is required for the openai embedding backend")
                })?;
                let client = Arc::new(Client::with_config(
                    async_openai::config::OpenAIConfig::new()
                        .with_api_key(api_key)
                        .with_api_base(&config.openai_base_url),
                ));
                Self::new_openai(
                    client,
                    config.embedding_model.clone(),
                    config.embedding_dimensions,
                )
            }
            EmbeddingBackendKind::FastEmbed => {
                Self::new_fastembed(config.fastembed_model.clone()).await
            }
            EmbeddingBackendKind::Hashed => {
                Self::new_hashed(config.embedding_dimensions as usize)
            }
        }
    }

    pub fn new_openai(
        client: Arc<Client<async_openai::config::OpenAIConfig>>,
        model: String,
        dimensions: u32,
    ) -> Result<Self> {
        Ok(Self::new(Arc::new(OpenAiEmbedding {
            client,
            model,
            dimensions,
        })))
    }

    pub async fn new_fastembed(model_override: Option<String>) -> Result<Self> {
        let model_name = if let Some(code) = model_override {
            EmbeddingModel::from_str(&code).map_err(|err| anyhow!(err))?
        } else {
            EmbeddingModel::default()
        };

        let options = TextInitOptions::new(model_name.clone()).with_show_download_progress(true);
        let model_name_for_task = model_name.clone();
        let model_name_code = model_name.to_string();

        let (model, dimension) = tokio::task::spawn_blocking(move || -> Result<_> {
            let model =
                TextEmbedding::try_new(options).context("initialising FastEmbed text model")?;
            let info = EmbeddingModel::get_model_info(&model_name_for_task)
                .ok_or_else(|| anyhow!("FastEmbed model metadata missing for {model_name_code}"))?;
            Ok((model, info.dim))
        })
        .await
        .context("joining FastEmbed initialisation task")??;

        Ok(Self::new(Arc::new(FastEmbedEmbedding {
            model: Arc::new(Mutex::new(model)),
            model_name,
            dimension,
        })))
    }

    pub fn new_hashed(dimension: usize) -> Result<Self> {
        Ok(Self::new(Arc::new(HashedEmbedding::new(dimension))))
    }

    /// Identifier of the active model; embeddings from different model ids
    /// never mix in one index or cache entry.
    pub fn model_id(&self) -> String {
        self.inner.model_id()
    }

    pub fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let mut batch = self.inner.embed_batch(vec![text.to_owned()]).await?;
        batch.pop().ok_or_else(|| {
            AppError::EmbeddingBackend("backend returned no embedding for input".into())
        })
    }

    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError> {
        self.inner.embed_batch(texts).await
    }
}

// Helper functions for hashed embeddings
fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let dim = dimension.max(1);
    let mut vector = vec![0.0f32; dim];
    if text.is_empty() {
        return vector;
    }

    let mut token_count = 0f32;
    for token in tokens(text) {
        token_count += 1.0;
        let idx = bucket(&token, dim);
        vector[idx] += 1.0;
    }

    if token_count == 0.0 {
        return vector;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }

    vector
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

fn bucket(token: &str, dimension: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    (hasher.finish() as usize) % dimension
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashed_embedding_is_deterministic() {
        let provider = EmbeddingProvider::new_hashed(64).expect("provider");
        let first = provider.embed("dharma is the path").await.expect("embed");
        let second = provider.embed("dharma is the path").await.expect("embed");
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[tokio::test]
    async fn hashed_embedding_is_unit_length() {
        let provider = EmbeddingProvider::new_hashed(32).expect("provider");
        let vector = provider.embed("karma yoga bhakti").await.expect("embed");
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "expected unit norm, got {norm}");
    }

    #[tokio::test]
    async fn hashed_embedding_of_empty_text_is_zero() {
        let provider = EmbeddingProvider::new_hashed(16).expect("provider");
        let vector = provider.embed("").await.expect("embed");
        assert!(vector.iter().all(|v| *v == 0.0));
    }

    #[tokio::test]
    async fn batch_results_match_single_calls() {
        let provider = EmbeddingProvider::new_hashed(48).expect("provider");
        let texts = vec![
            "the field of dharma".to_owned(),
            "the field of the kurus".to_owned(),
        ];
        let batch = provider.embed_batch(texts.clone()).await.expect("batch");
        for (text, expected) in texts.iter().zip(&batch) {
            let single = provider.embed(text).await.expect("single");
            assert_eq!(&single, expected);
        }
    }

    #[test]
    fn hashed_model_id_includes_dimension() {
        let provider = EmbeddingProvider::new_hashed(384).expect("provider");
        assert_eq!(provider.model_id(), "hashed-384");
    }
}
