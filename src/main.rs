use clap::{Parser, Subcommand};
use context_qa::commands::{
    ask_question, delete_collection, ingest_source, load_config, serve_queries, show_status,
    with_collection,
};
use context_qa::config::show_config;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "context-qa")]
#[command(about = "Retrieval-augmented question answering over a text corpus")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml and the vector data
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the effective configuration
    Config,
    /// Fetch the source text and ingest it into a collection
    Ingest {
        /// Source locator: s3://bucket/key, an http(s) URL or a file path
        #[arg(long)]
        source: Option<String>,
        /// Collection to create
        #[arg(long)]
        collection: Option<String>,
        /// Delete the collection first if it already exists
        #[arg(long)]
        replace: bool,
    },
    /// Ask a question and stream the answer to stdout
    Ask {
        question: String,
        #[arg(long)]
        collection: Option<String>,
    },
    /// Answer questions as line-delimited JSON on stdio
    Serve {
        #[arg(long)]
        collection: Option<String>,
    },
    /// Show record counts of the ingested collections
    Status {
        #[arg(long)]
        collection: Option<String>,
    },
    /// Delete a collection
    Delete {
        /// Collection name
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries answers, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config_dir)?;

    match cli.command {
        Commands::Config => {
            show_config(&config)?;
        }
        Commands::Ingest {
            source,
            collection,
            replace,
        } => {
            let config = with_collection(&config, collection)?;
            ingest_source(&config, source, replace).await?;
        }
        Commands::Ask {
            question,
            collection,
        } => {
            let config = with_collection(&config, collection)?;
            ask_question(&config, question).await?;
        }
        Commands::Serve { collection } => {
            let config = with_collection(&config, collection)?;
            serve_queries(&config).await?;
        }
        Commands::Status { collection } => {
            show_status(&config, collection).await?;
        }
        Commands::Delete { name } => {
            delete_collection(&config, &name).await?;
        }
    }

    Ok(())
}
