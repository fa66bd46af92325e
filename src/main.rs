//! CLI entry point for the pdfextract tool.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use pdfextract_core::{
    ApiKey, PdfFileReader, Pipeline, PipelineConfig, aggregate, build_backend, resolve_api_key,
};
use tracing::{debug, info};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    // Aggregation alone needs no credential.
    let api_key = if args.aggregate_only {
        ApiKey::new("")
    } else {
        resolve_api_key(args.api_key.clone(), &args.target_dir)?
    };

    let mut config = PipelineConfig::new(&args.target_dir, args.provider, api_key)?;
    if let Some(prompt) = args.prompt {
        config.prompt_file = prompt;
    }
    config.rename_pdfs = !args.no_rename;
    config.force_retry = args.force_retry;
    config.max_documents = args.max_documents;
    config.concurrency = usize::from(args.concurrency);
    config.max_retries = u32::from(args.max_retries);

    if args.aggregate_only {
        std::fs::create_dir_all(&config.output_dir)?;
        let summary = aggregate::aggregate(&config.output_dir)?;
        info!(
            documents = summary.documents,
            rows = summary.rows,
            skipped = summary.skipped,
            "aggregation complete"
        );
        return Ok(());
    }

    info!(target = %config.target_dir.display(), provider = %config.provider, "pdfextract starting");

    let backend = build_backend(config.provider, &config.api_key)?;
    let config = Arc::new(config);
    let pipeline = Pipeline::new(
        Arc::clone(&config),
        Arc::from(backend),
        Arc::new(PdfFileReader::new()),
    );

    let report = pipeline.run().await?;

    // Per-document failures are isolated and already reported; a partial
    // success still exits 0.
    info!(
        extracted = report.stats.extracted,
        failed = report.stats.failed,
        skipped = report.stats.skipped,
        retried = report.stats.retried,
        dataset_documents = report.aggregate.documents,
        dataset_rows = report.aggregate.rows,
        "run complete"
    );

    Ok(())
}
