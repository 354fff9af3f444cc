//! Ambient stack shared across the workspace: tracing setup and config
//! loading. Deliberately small — the full OTLP/Parquet telemetry pipeline
//! and project-wide YAML schema belong to the CLI/packaging layer that
//! this workspace does not implement (see SPEC_FULL.md §7).

pub mod config;
pub mod logging;
