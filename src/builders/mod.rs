//! Builders to construct pipeline components from configuration.

pub mod pipeline_builder;

pub use pipeline_builder::{build_gateway, build_job_store, build_workers, Pipeline, PipelineHandle};
