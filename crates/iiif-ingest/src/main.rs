//! IIIF Ingest - Presentation API relational loader

use anyhow::Result;
use clap::Parser;
use iiif_common::logging::{init_logging, LogConfig, LogLevel};
use iiif_ingest::config::LoaderConfig;
use iiif_ingest::db::{create_pool, PgExecutor};
use iiif_ingest::loader;
use iiif_ingest::rows::LabelRule;
use iiif_ingest::traverse::Traversal;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "iiif-ingest")]
#[command(author, version, about = "IIIF Presentation API relational loader")]
struct Cli {
    /// Document files to ingest (.json, optionally gzip-compressed)
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Database connection string (overrides DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,

    /// Regex prefix stripped from labels before storage; empty disables
    #[arg(long)]
    label_strip_prefix: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env()?;
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    init_logging(&log_config)?;

    let config = LoaderConfig::from_env_with(cli.database_url, cli.label_strip_prefix)?;
    let label_rule: LabelRule = config.label_rule()?;

    let pool = create_pool(&config.database).await?;
    let traversal = Traversal::new(Arc::new(PgExecutor::new(pool)), label_rule);

    let stats = loader::run(&traversal, &cli.files).await?;

    // The count report is the program's stdout contract; diagnostics go
    // through tracing.
    for line in stats.report_lines() {
        println!("{}", line);
    }

    info!("Ingestion complete");
    Ok(())
}
