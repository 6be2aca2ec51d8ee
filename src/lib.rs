//! devicelab: instrumentation test orchestration for remote device labs.
//!
//! This crate drives a build's instrumentation test suites against a
//! remote, rate-limited device-testing service, one concurrent task per
//! build module.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Request**: resolve module configuration into an immutable run request
//! - **Throttle**: process-wide spacing between service invocations
//! - **Invoker**: one throttled attempt, streamed output, classified exit
//! - **Retry**: bounded attempt loop that only retries legitimate failures
//! - **Collect**: artifact retrieval from storage into the build layout
//! - **Orchestrator**: per-module composition and build pass/fail mapping
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use tokio_util::sync::CancellationToken;
//!
//! use devicelab::collect::{ArtifactCollector, GsutilStore};
//! use devicelab::invoker::GcloudInvoker;
//! use devicelab::orchestrator::Orchestrator;
//! use devicelab::report::ConsoleReporter;
//! use devicelab::throttle::Throttle;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = devicelab::load_config(std::path::Path::new("devicelab.toml"))?;
//!     let cancel = CancellationToken::new();
//!
//!     let throttle = Arc::new(Throttle::new(Duration::from_secs(
//!         config.lab.min_spacing_secs,
//!     )));
//!     let invoker = GcloudInvoker::new(&config.lab, throttle, cancel.clone());
//!     let collector = ArtifactCollector::new(&config.lab, GsutilStore::new(&config.lab));
//!
//!     let orchestrator = Orchestrator::new(config, invoker, collector, ConsoleReporter, cancel);
//!     let report = orchestrator.run().await;
//!     std::process::exit(report.exit_code());
//! }
//! ```

pub mod bundled;
pub mod collect;
pub mod config;
pub mod error;
pub mod invoker;
pub mod orchestrator;
pub mod report;
pub mod request;
pub mod retry;
pub mod throttle;

// Re-export commonly used types
pub use config::{Config, load_config};
pub use error::{LabError, LabResult};
pub use invoker::{GcloudInvoker, RunOutcome, TestLabInvoker};
pub use orchestrator::{BuildSignal, Orchestrator, RunReport};
pub use request::{RequestBuilder, TestRunRequest};
pub use retry::{RetryCoordinator, RetryOutcome, Verdict};
pub use throttle::Throttle;
