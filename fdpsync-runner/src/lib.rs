//! fdpsync runner: configuration, the staged sync pipeline, and reporting.
//!
//! This crate builds on `fdpsync-core` to provide:
//! - TOML configuration with validation
//! - The pipeline state machine and orchestrator
//! - Raw response archiving
//! - The xlsx Report Writer with atomic replacement

pub mod archive;
pub mod config;
pub mod pipeline;
pub mod reporting;

pub use archive::{ArchiveError, ResponseArchive};
pub use config::{CatalogConfig, ConfigError, OutputConfig, RemoteConfig, SyncConfig};
pub use pipeline::{
    LogObserver, Pipeline, PipelineFailure, PipelineObserver, PipelineState, RunOutcome,
    SetupError, Stage, StageError,
};
pub use reporting::{write_report, ReportWriteError};
