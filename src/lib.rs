//! # Prometheus Bulk Runner
//!
//! A job execution engine that pushes a large stream of identifiers through a
//! user-supplied operation, spread over a pool of remote endpoints.
//!
//! ## Core Problem Solved
//!
//! Bulk jobs (reprocessing millions of documents, reindexing, exports) need
//! more than a loop over identifiers:
//!
//! - **Endpoint health**: failing endpoints are quarantined and retried later,
//!   while work moves to healthy ones
//! - **Bounded memory**: identifiers are staged in a ring buffer, or spilled
//!   to disk when the source is larger than memory allows
//! - **Live control**: a running job can be paused, resumed, resized or
//!   stopped through a command file or a [`JobControl`](runtime::JobControl)
//!   handle
//! - **Visibility**: periodic throughput and ETA reports, and a final summary
//!   with the slowest units
//!
//! ## Key Components
//!
//! - [`EndpointPool`](core::EndpointPool): round-robin, random or least-loaded
//!   endpoint selection with quarantine
//! - [`PausableWorkerPool`](core::PausableWorkerPool): dedicated OS threads
//!   behind a pause gate, with blocking backpressure and live resizing
//! - [`SpilloverQueue`](infra::SpilloverQueue): FIFO staging queue that
//!   overflows into a temporary JSON-lines file
//! - [`JobController`](core::JobController): pulls, batches, submits and
//!   tallies, then reports
//! - [`Monitor`](core::Monitor): average and current rates with a smoothed ETA
//!
//! ## Example
//!
//! ```rust,ignore
//! use prometheus_bulk_runner::builders::JobBuilder;
//! use prometheus_bulk_runner::config::{ConfigLayers, JobConfig};
//! use prometheus_bulk_runner::core::Endpoint;
//! use prometheus_bulk_runner::infra::LineFileSource;
//!
//! prometheus_bulk_runner::util::init_tracing("info");
//! let config = JobConfig::resolve(&ConfigLayers::from_environment())?;
//! let controller = JobBuilder::new(config)
//!     .with_source(LineFileSource::new("uris.txt"))
//!     .with_executor(MyExecutor::default())
//!     .with_endpoints(["host-a:8000", "host-b:8000"].map(Endpoint::new))
//!     .build()?;
//!
//! let control = controller.control();
//! let report = controller.run()?;
//! println!("{} succeeded", report.snapshot.succeeded);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Job execution core: endpoint selection, worker pool, dispatch and control.
pub mod core;
/// Configuration models and layered resolution.
pub mod config;
/// Builders to assemble jobs from configuration and named components.
pub mod builders;
/// Infrastructure adapters for staging queues and identifier sources.
pub mod infra;
/// Live control, command file polling and background tickers.
pub mod runtime;
/// Shared utilities.
pub mod util;
