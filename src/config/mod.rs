//! Configuration models for jobs, worker pools, endpoint pools and the
//! command file.

pub mod command;
pub mod endpoint;
pub mod job;
pub mod worker;

pub use command::{Command, CommandFile};
pub use endpoint::EndpointPoolConfig;
pub use job::{ConfigLayers, JobConfig};
pub use worker::WorkerPoolConfig;
