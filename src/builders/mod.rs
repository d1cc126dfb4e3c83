//! Builders to assemble jobs from configuration and named components.

pub mod job_builder;
pub mod registry;

pub use job_builder::JobBuilder;
pub use registry::{ExecutorRegistry, Factory, HookRegistry, Registry, SourceRegistry};
