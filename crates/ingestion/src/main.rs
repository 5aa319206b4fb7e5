//! SkinCare Ingestion CLI
//!
//! Batch-loads a directory of guideline PDFs and text files:
//! 1. Extracts text from each supported file
//! 2. Registers it as a document with a file:// asset
//! 3. Chunks and embeds it into the vector store
//!
//! Usage: `ingestion <dir> [--source NAME] [--chunk-size N] [--chunk-overlap N] [--model NAME]`

mod errors;
mod extract;
mod processor;

use clap::Parser;
use processor::{BatchOptions, IngestionProcessor};
use skincare_common::{config::AppConfig, db::DbPool, ingest::EmbedOptions, CancelToken, RagServices, VERSION};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "ingestion",
    version = VERSION,
    about = "Extract, chunk and embed a directory of skincare guideline files"
)]
struct IngestionCli {
    /// Directory of .pdf/.txt/.md files to ingest
    #[arg(env = "INGEST_DIR")]
    dir: PathBuf,

    /// Document source label, e.g. "guideline" or "faq"
    #[arg(long)]
    source: Option<String>,

    /// Target chunk size in characters
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Characters shared between neighbouring chunks
    #[arg(long)]
    chunk_overlap: Option<usize>,

    /// Embedding model override
    #[arg(long)]
    model: Option<String>,
}

impl IngestionCli {
    fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            source: self.source.clone(),
            embed: EmbedOptions {
                chunk_size: self.chunk_size,
                chunk_overlap: self.chunk_overlap,
                embedding_model: self.model.clone(),
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();
    let cli = IngestionCli::parse();

    let mut config = AppConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .json()
        .init();

    info!("Starting SkinCare Ingestion v{}", VERSION);

    config.validate()?;

    // Batch ingestion never generates routines
    config.llm.provider = "template".to_string();

    let db = if config.uses_database() {
        info!("Connecting to database...");
        let pool = DbPool::new(&config.database).await?;
        if config.database.run_migrations {
            pool.migrate().await?;
        }
        Some(pool)
    } else {
        warn!("No database configured; ingested documents will not outlive this process");
        None
    };

    let services = RagServices::from_config(config, db)?;
    let processor = IngestionProcessor::new(services, cli.batch_options());

    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, cancelling batch");
            on_signal.cancel();
        }
    });

    let report = processor.process_directory(&cli.dir, &cancel).await?;
    let chunks: usize = report.processed.iter().map(|f| f.chunk_count).sum();

    info!(
        documents = report.processed.len(),
        chunks,
        failed = report.failed.len(),
        skipped = report.skipped,
        "Ingestion complete"
    );

    if !report.failed.is_empty() {
        return Err(format!("{} file(s) failed to ingest", report.failed.len()).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_options() {
        let cli = IngestionCli::try_parse_from([
            "ingestion", "docs", "--source", "guideline", "--chunk-size", "800", "--model", "text-embedding-3-large",
        ])
        .unwrap();
        assert_eq!(cli.dir, PathBuf::from("docs"));

        let options = cli.batch_options();
        assert_eq!(options.source.as_deref(), Some("guideline"));
        assert_eq!(options.embed.chunk_size, Some(800));
        assert_eq!(options.embed.chunk_overlap, None);
        assert_eq!(options.embed.embedding_model.as_deref(), Some("text-embedding-3-large"));
    }

    #[test]
    fn test_cli_rejects_bad_input() {
        assert!(IngestionCli::try_parse_from(["ingestion", "docs", "--chunk-size", "big"]).is_err());
        assert!(IngestionCli::try_parse_from(["ingestion", "docs", "--source"]).is_err());
        assert!(IngestionCli::try_parse_from(["ingestion", "docs", "--verbose"]).is_err());
        assert!(IngestionCli::try_parse_from(["ingestion", "docs", "--chunk-overlap", "-5"]).is_err());
    }
}
