//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use pdfextract_core::{DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, Provider};

/// Extract structured data from a directory of PDFs.
///
/// Pdfextract submits each PDF to a structured-extraction service and
/// collects the results into per-document records plus a combined dataset.
/// Progress is checkpointed, so an interrupted run picks up where it left
/// off without resubmitting finished documents.
#[derive(Parser, Debug)]
#[command(name = "pdfextract")]
#[command(author, version, about)]
pub struct Args {
    /// Directory containing the PDFs to process (defaults to the current directory)
    #[arg(value_name = "TARGET_DIR", default_value = ".")]
    pub target_dir: PathBuf,

    /// API key for the extraction service (falls back to GEMINI_API_KEY, then api_key.txt)
    #[arg(short = 'k', long, value_name = "KEY")]
    pub api_key: Option<String>,

    /// Extraction service to use
    #[arg(short = 'p', long, value_enum, default_value_t = Provider::Gemini)]
    pub provider: Provider,

    /// Prompt file (defaults to extraction_prompt.txt in the target directory)
    #[arg(long, value_name = "FILE")]
    pub prompt: Option<PathBuf>,

    /// Process at most N documents this run
    #[arg(short = 'm', long = "max", value_name = "N")]
    pub max_documents: Option<usize>,

    /// Skip the metadata-based rename step
    #[arg(long)]
    pub no_rename: bool,

    /// Resubmit documents that failed in previous runs
    #[arg(long)]
    pub force_retry: bool,

    /// Maximum concurrent extraction calls (1-16)
    #[arg(short = 'c', long, default_value_t = DEFAULT_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..=16))]
    pub concurrency: u8,

    /// Maximum submission attempts for transient failures (1-10)
    #[arg(short = 'r', long, default_value_t = DEFAULT_MAX_RETRIES as u8, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub max_retries: u8,

    /// Only rebuild the combined dataset from existing records, without processing
    #[arg(long)]
    pub aggregate_only: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}
