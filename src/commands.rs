use anyhow::{Context, Result};
use console::style;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use crate::QaError;
use crate::completion::OpenAiChatClient;
use crate::config::{Config, get_config_dir, validate_collection_name};
use crate::database::{LanceIndex, VectorIndex};
use crate::embeddings::OpenAiEmbeddingClient;
use crate::inference::InferenceEngine;
use crate::ingest::{IngestOptions, IngestReport, IngestionPipeline};
use crate::server::{QueryServer, SubscriptionEvent, subscribe};
use crate::source::SourceFetcher;

/// Load configuration from `config_dir` (or the default directory) with environment overrides
#[inline]
pub fn load_config(config_dir: Option<PathBuf>) -> Result<Config> {
    let config_dir = match config_dir {
        Some(dir) => dir,
        None => get_config_dir()?,
    };
    Config::load_with_env(&config_dir)
        .with_context(|| format!("Failed to load configuration from {}", config_dir.display()))
}

/// Copy of `config` targeting `collection` when one is given
#[inline]
pub fn with_collection(config: &Config, collection: Option<String>) -> Result<Config> {
    let mut config = config.clone();
    if let Some(collection) = collection {
        validate_collection_name(&collection)?;
        config.index.collection = collection;
    }
    Ok(config)
}

/// Inference engine wired to the OpenAI clients and the on-disk index
#[inline]
pub async fn build_engine(config: &Config) -> Result<InferenceEngine> {
    let embedder = OpenAiEmbeddingClient::new(config)?;
    let completion = OpenAiChatClient::new(config)?;
    let index = LanceIndex::from_config(config).await?;

    Ok(InferenceEngine::from_config(
        config,
        Arc::new(embedder),
        Arc::new(index),
        Arc::new(completion),
    ))
}

/// Fetch the configured source and ingest it into the configured collection
#[inline]
pub async fn ingest_source(
    config: &Config,
    source: Option<String>,
    replace: bool,
) -> Result<IngestReport> {
    let locator = source
        .or_else(|| config.source.locator.clone())
        .ok_or_else(|| {
            QaError::InvalidConfiguration(
                "source locator is not set (use --source, CONTEXT_FILE_URL or CONTEXT_FILE_PATH)"
                    .to_string(),
            )
        })?;
    let collection = &config.index.collection;

    // Fail on configuration problems before downloading anything
    let embedder = OpenAiEmbeddingClient::new(config)?;
    let index = LanceIndex::from_config(config).await?;

    let text = SourceFetcher::new(config).fetch(&locator).await?;

    let pipeline = IngestionPipeline::new(
        Arc::new(embedder),
        Arc::new(index),
        config.chunking.clone(),
    )
    .with_progress(true);

    let report = pipeline
        .ingest(
            &text,
            collection,
            IngestOptions {
                replace_existing: replace,
            },
        )
        .await
        .inspect_err(|e| error!("Ingestion of {} into {} failed: {}", locator, collection, e))?;

    println!(
        "{} Stored {} chunks in collection {}",
        style("✓").green(),
        style(report.chunks).cyan(),
        style(&report.collection).cyan()
    );
    Ok(report)
}

/// Answer one question, printing fragments to stdout as they arrive. Ctrl-C cancels.
#[inline]
pub async fn ask_question(config: &Config, question: String) -> Result<()> {
    let engine = build_engine(config).await?;
    let mut subscription = subscribe(&engine, question);
    let mut stdout = std::io::stdout();

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, cancelling answer");
                subscription.cancel();
                writeln!(stdout)?;
                return Ok(());
            }
            event = subscription.recv() => event,
        };

        match event {
            Some(SubscriptionEvent::Fragment(text)) => {
                write!(stdout, "{}", text)?;
                stdout.flush()?;
            }
            Some(SubscriptionEvent::Complete) | None => {
                writeln!(stdout)?;
                return Ok(());
            }
            Some(SubscriptionEvent::Failed(e)) => {
                writeln!(stdout)?;
                return Err(e.into());
            }
        }
    }
}

/// Serve questions on stdio until stdin closes
#[inline]
pub async fn serve_queries(config: &Config) -> Result<()> {
    let engine = build_engine(config).await?;
    QueryServer::new(engine).serve_stdio().await
}

/// Print record counts for one collection, or for all of them
#[inline]
pub async fn show_status(config: &Config, collection: Option<String>) -> Result<()> {
    let index = LanceIndex::from_config(config).await?;

    println!("{}", style("📊 Context QA Status").bold().cyan());
    println!("   Vector data: {}", style(index.path().display()).dim());
    println!();

    let names = match collection {
        Some(name) => vec![name],
        None => index.list_collections().await?,
    };

    if names.is_empty() {
        println!("No collections have been ingested yet.");
        println!("Use 'context-qa ingest --source <locator>' to create one.");
        return Ok(());
    }

    for name in names {
        let marker = if name == config.index.collection {
            style("*").green()
        } else {
            style(" ").dim()
        };

        match index.get_collection(&name).await {
            Ok(handle) => {
                let count = index.count(&handle).await?;
                println!(
                    " {} {} - {} records ({} dimensions)",
                    marker,
                    style(&name).bold(),
                    style(count).cyan(),
                    handle.dimension()
                );
            }
            Err(QaError::CollectionNotFound(_)) => {
                println!(" {} {} - {}", marker, style(&name).bold(), style("not found").red());
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}

/// Delete a collection so it can be ingested again
#[inline]
pub async fn delete_collection(config: &Config, name: &str) -> Result<()> {
    let index = LanceIndex::from_config(config).await?;
    index.delete_collection(name).await?;
    println!("{} Deleted collection {}", style("✓").green(), style(name).cyan());
    Ok(())
}
