use std::{path::PathBuf, process::ExitCode, sync::Arc};

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use common::{
    storage::{
        cache::EmbeddingCache,
        index::{SharedIndex, VectorIndex},
    },
    utils::{
        config::{get_config, AppConfig},
        embedding::EmbeddingProvider,
    },
};
use ingestion_pipeline::{validate_corpus, CorpusLoader, IngestionPipeline};
use retrieval_pipeline::{OpenAiGeneration, RagChain, RetrievalConfig};

#[derive(Parser)]
#[command(
    name = "granth",
    about = "Question answering grounded in Hindu scripture collections",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check every collection's source files and report malformed ones
    Validate {
        /// Corpus root; defaults to the configured data dir
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Embed the whole corpus ahead of serving and persist the index snapshot
    Embed {
        /// Units per embedding request; defaults to the configured batch size
        #[arg(long)]
        batch_size: Option<usize>,
        /// Recompute embeddings even when cached
        #[arg(long)]
        force: bool,
    },
    /// Ask a question grounded in the indexed corpus
    Ask {
        question: String,
        /// Passages to retrieve; defaults to the configured top-k
        #[arg(long)]
        top_k: Option<usize>,
        /// Restrict retrieval to one collection, e.g. "bhagavad_gita"
        #[arg(long)]
        collection: Option<String>,
    },
    /// Print corpus and index statistics
    Stats,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    match run().await {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = get_config()?;

    match cli.command {
        Command::Validate { data_dir } => run_validate(&config, data_dir),
        Command::Embed { batch_size, force } => run_embed(&config, batch_size, force).await,
        Command::Ask {
            question,
            top_k,
            collection,
        } => run_ask(&config, &question, top_k, collection.as_deref()).await,
        Command::Stats => run_stats(&config).await,
    }
}

fn run_validate(config: &AppConfig, data_dir: Option<PathBuf>) -> Result<ExitCode> {
    let data_dir = data_dir.unwrap_or_else(|| PathBuf::from(&config.data_dir));
    let report = validate_corpus(&data_dir)?;

    for (collection, details) in &report.collections {
        println!(
            "{collection}: {} valid files, {} units",
            details.valid_files, details.unit_count
        );
        for malformed in &details.malformed {
            println!("  malformed: {} ({})", malformed.path, malformed.reason);
        }
    }
    println!(
        "total: {} units across {} files, {} malformed",
        report.total_units(),
        report.valid_files(),
        report.malformed_files()
    );

    if report.malformed_files() > 0 {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_embed(
    config: &AppConfig,
    batch_size: Option<usize>,
    force: bool,
) -> Result<ExitCode> {
    if force {
        std::fs::remove_file(&config.embedding_cache_path).ok();
        info!("cleared embedding cache for forced recompute");
    }

    let provider = Arc::new(EmbeddingProvider::from_config(config).await?);
    let cache = EmbeddingCache::load(&config.embedding_cache_path).await?;
    let batch_size = batch_size.unwrap_or(config.embedding_batch_size);
    let pipeline = IngestionPipeline::new(provider.clone(), cache, batch_size);

    let loader = CorpusLoader::new(&config.data_dir);
    let units = loader.load_all()?;
    if units.is_empty() {
        bail!("no text units found under {}", config.data_dir);
    }
    info!(units = units.len(), batch_size, "embedding corpus");

    // Already-cached units make a retry cheap: only the failing tail is redone.
    let retry_strategy = ExponentialBackoff::from_millis(500).map(jitter).take(3);
    let records = Retry::spawn(retry_strategy, || pipeline.embed_units(&units)).await?;

    let index = VectorIndex::build(
        records,
        units,
        provider.model_id(),
        provider.dimension(),
    )?;
    index.save(&config.index_path).await?;

    println!(
        "indexed {} units with model '{}' ({} dims) -> {}",
        index.len(),
        index.model_id(),
        index.dimension(),
        config.index_path
    );
    Ok(ExitCode::SUCCESS)
}

async fn run_ask(
    config: &AppConfig,
    question: &str,
    top_k: Option<usize>,
    collection: Option<&str>,
) -> Result<ExitCode> {
    let index_path = PathBuf::from(&config.index_path);
    if !index_path.exists() {
        bail!(
            "no index snapshot at {}; run `granth embed` first",
            index_path.display()
        );
    }

    let provider = Arc::new(EmbeddingProvider::from_config(config).await?);
    let index = VectorIndex::load(&index_path).await?;
    let shared = SharedIndex::new();
    shared.publish(index).await;

    let api_key = config
        .openai_api_key
        .clone()
        .ok_or_else(|| anyhow!("openai_api_key is required to generate answers"))?;
    let client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(&config.openai_base_url),
    ));
    let generator = Arc::new(OpenAiGeneration::new(
        client,
        config.query_model.clone(),
        config.query_system_prompt.clone(),
    ));

    let chain = RagChain::new(
        provider,
        shared,
        generator,
        RetrievalConfig {
            top_k: config.top_k,
            similarity_floor: config.similarity_floor,
            context_budget_chars: config.context_budget_chars,
        },
    );

    let k = top_k.unwrap_or(config.top_k);
    let answer = chain.answer_filtered(question, k, collection).await?;

    println!("{}", answer.answer);
    if !answer.sources.is_empty() {
        println!("\nSources:");
        for source in &answer.sources {
            let preview: String = source.text_unit.normalized_text.chars().take(80).collect();
            println!("  {:.3}  {}  {preview}", source.score, source.unit_id);
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_stats(config: &AppConfig) -> Result<ExitCode> {
    let report = validate_corpus(&PathBuf::from(&config.data_dir))?;

    let mut collections = serde_json::Map::new();
    for (name, details) in &report.collections {
        collections.insert(
            name.clone(),
            serde_json::json!({
                "valid_files": details.valid_files,
                "units": details.unit_count,
                "malformed_files": details.malformed.len(),
            }),
        );
    }

    let index_path = PathBuf::from(&config.index_path);
    let index_stats = if index_path.exists() {
        let index = VectorIndex::load(&index_path).await?;
        serde_json::json!({
            "vectors": index.len(),
            "dimension": index.dimension(),
            "model": index.model_id(),
        })
    } else {
        serde_json::json!("not built")
    };

    let stats = serde_json::json!({
        "collections": collections,
        "total_units": report.total_units(),
        "index": index_stats,
    });
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(ExitCode::SUCCESS)
}
