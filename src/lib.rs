//! Pdfextract Core Library
//!
//! This library provides the core functionality for the pdfextract tool,
//! which turns a directory of PDFs into structured data: each document is
//! submitted to an LLM extraction service and the results are collected
//! into per-document records plus a combined dataset.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`checkpoint`] - Durable per-document progress, atomically persisted
//! - [`metadata`] - DOI/title reading and stable document identity
//! - [`rename`] - Canonical filename derivation and collision handling
//! - [`extract`] - Extraction service backends with retry classification
//! - [`processor`] - The per-document state machine
//! - [`pipeline`] - Batch orchestration over a target directory
//! - [`aggregate`] - Merging records into the combined dataset
//!
//! Every state transition is checkpointed before its effects become
//! observable, so an interrupted run resumes without resubmitting finished
//! documents or moving a source file twice.

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod aggregate;
pub mod checkpoint;
pub mod config;
pub mod extract;
pub mod metadata;
pub mod pipeline;
pub mod processor;
pub mod rename;

// Re-export commonly used types
pub use aggregate::{AggregateError, AggregateSummary, ExtractionRecord};
pub use checkpoint::{CheckpointError, CheckpointStore, DocStatus, DocumentRecord};
pub use config::{
    ApiKey, ConfigError, DEFAULT_CONCURRENCY, PipelineConfig, resolve_api_key,
};
pub use extract::{
    DEFAULT_MAX_RETRIES, ExtractError, ExtractionBackend, FailureType, GeminiBackend, Provider,
    RetryDecision, RetryPolicy, build_backend, classify_error,
};
pub use metadata::{MetadataError, MetadataReader, PdfFileReader, PdfMetadata};
pub use pipeline::{Pipeline, PipelineError, RunReport, RunStats};
pub use processor::{Outcome, Processor, SkipReason};
pub use rename::derive_canonical_name;
