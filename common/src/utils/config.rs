use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackendKind {
    OpenAi,
    FastEmbed,
    Hashed,
}

fn default_embedding_backend() -> EmbeddingBackendKind {
    EmbeddingBackendKind::FastEmbed
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_cache_path")]
    pub embedding_cache_path: String,
    #[serde(default = "default_index_path")]
    pub index_path: String,
    #[serde(default = "default_embedding_backend")]
    pub embedding_backend: EmbeddingBackendKind,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default)]
    pub fastembed_model: Option<String>,
    #[serde(default = "default_embedding_batch_size")]
    pub embedding_batch_size: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_similarity_floor")]
    pub similarity_floor: f32,
    #[serde(default = "default_context_budget_chars")]
    pub context_budget_chars: usize,
    #[serde(default = "default_query_model")]
    pub query_model: String,
    #[serde(default = "default_query_system_prompt")]
    pub query_system_prompt: String,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_data_dir() -> String {
    "./data/raw".to_string()
}

fn default_cache_path() -> String {
    "./models/embeddings/cache.json".to_string()
}

fn default_index_path() -> String {
    "./models/embeddings/index.json".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> u32 {
    1536
}

fn default_embedding_batch_size() -> usize {
    32
}

fn default_top_k() -> usize {
    5
}

fn default_similarity_floor() -> f32 {
    0.3
}

fn default_context_budget_chars() -> usize {
    4000
}

fn default_query_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_query_system_prompt() -> String {
    "You are a careful assistant answering questions about Hindu scriptures. \
     Ground every statement in the context passages you are given and name the \
     scripture each point comes from. If the context does not answer the \
     question, say so plainly."
        .to_string()
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_deserializes_lowercase() {
        let kind: EmbeddingBackendKind = serde_json::from_str("\"hashed\"").expect("parse");
        assert_eq!(kind, EmbeddingBackendKind::Hashed);
        let kind: EmbeddingBackendKind = serde_json::from_str("\"openai\"").expect("parse");
        assert_eq!(kind, EmbeddingBackendKind::OpenAi);
    }

    #[test]
    fn defaults_are_consistent() {
        let config: AppConfig = serde_json::from_str("{}").expect("defaults");
        assert!(config.openai_api_key.is_none());
        assert_eq!(config.embedding_batch_size, 32);
        assert_eq!(config.top_k, 5);
        assert!(config.similarity_floor > 0.0 && config.similarity_floor < 1.0);
    }
}
