//! Per-module composition and build-signal mapping.
//!
//! One tokio task per module runs the full pipeline: resolve the request,
//! drive throttled attempts to a terminal verdict, then collect artifacts.
//! The only mutable state shared between module tasks is the invocation
//! throttle, owned by the injected invoker.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::collect::{ArtifactCollector, CollectedArtifacts, ObjectStore};
use crate::config::{Config, LabConfig, ModuleConfig};
use crate::error::LabError;
use crate::invoker::TestLabInvoker;
use crate::report::Reporter;
use crate::request::RequestBuilder;
use crate::retry::{RetryCoordinator, Verdict};

/// What a module's terminal state means for the enclosing build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildSignal {
    /// Tests passed; artifacts collected.
    Success,

    /// Tests failed after all retries, but the fail-on-error policy is
    /// disabled, so the build continues.
    Warning,

    /// Tests failed after all retries and the fail-on-error policy is
    /// enabled.
    Failure,

    /// The orchestration itself could not complete: configuration error,
    /// fatal service result, artifact loss, or cancellation. Always fails
    /// the build, regardless of policy.
    Abort,
}

/// Terminal report for one module.
#[derive(Debug, Clone)]
pub struct ModuleReport {
    pub module: String,
    pub signal: BuildSignal,
    /// Attempts performed; 0 when no remote call was ever made.
    pub attempts: u32,
    pub artifacts: Option<CollectedArtifacts>,
    pub detail: Option<String>,
}

/// Aggregated result of orchestrating every module.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub modules: Vec<ModuleReport>,
    pub duration: Duration,
}

impl RunReport {
    /// Whether the build should pass: warnings are tolerated, failures and
    /// aborts are not.
    pub fn success(&self) -> bool {
        self.modules
            .iter()
            .all(|m| matches!(m.signal, BuildSignal::Success | BuildSignal::Warning))
    }

    /// Process exit code for this run.
    pub fn exit_code(&self) -> i32 {
        if self.success() { 0 } else { 1 }
    }
}

/// Coordinates the per-module pipelines.
pub struct Orchestrator<I, S, R> {
    config: Config,
    invoker: Arc<I>,
    collector: Arc<ArtifactCollector<S>>,
    reporter: Arc<R>,
    cancel: CancellationToken,
}

impl<I, S, R> Orchestrator<I, S, R>
where
    I: TestLabInvoker + 'static,
    S: ObjectStore + 'static,
    R: Reporter + 'static,
{
    pub fn new(
        config: Config,
        invoker: I,
        collector: ArtifactCollector<S>,
        reporter: R,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            invoker: Arc::new(invoker),
            collector: Arc::new(collector),
            reporter: Arc::new(reporter),
            cancel,
        }
    }

    /// Run every configured module to its terminal state and report the
    /// aggregate.
    pub async fn run(&self) -> RunReport {
        let start = std::time::Instant::now();

        if self.config.modules.is_empty() {
            warn!("no modules configured");
        }

        let mut handles = Vec::new();
        for module in &self.config.modules {
            let lab = self.config.lab.clone();
            let module = module.clone();
            let invoker = self.invoker.clone();
            let collector = self.collector.clone();
            let reporter = self.reporter.clone();
            let cancel = self.cancel.clone();

            handles.push(tokio::spawn(async move {
                reporter.on_module_start(&module.name).await;
                let report = run_module(&lab, &module, invoker, collector, cancel).await;
                reporter.on_module_complete(&report).await;
                report
            }));
        }

        let mut modules = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(report) => modules.push(report),
                Err(e) => error!("module task failed: {e}"),
            }
        }

        let report = RunReport {
            modules,
            duration: start.elapsed(),
        };
        self.reporter.on_run_complete(&report).await;

        report
    }
}

async fn run_module<I, S>(
    lab: &LabConfig,
    module: &ModuleConfig,
    invoker: Arc<I>,
    collector: Arc<ArtifactCollector<S>>,
    cancel: CancellationToken,
) -> ModuleReport
where
    I: TestLabInvoker,
    S: ObjectStore,
{
    let abort = |attempts: u32, detail: String| ModuleReport {
        module: module.name.clone(),
        signal: BuildSignal::Abort,
        attempts,
        artifacts: None,
        detail: Some(detail),
    };

    let request = match RequestBuilder::new(lab).build(module) {
        Ok(request) => request,
        Err(e) => {
            error!(module = %module.name, "cannot resolve test run: {e}");
            return abort(0, e.to_string());
        }
    };

    let outcome = match RetryCoordinator::new(invoker).run(&request).await {
        Ok(outcome) => outcome,
        Err(e) => {
            match &e {
                LabError::Cancelled => warn!(module = %module.name, "run cancelled"),
                _ => error!(module = %module.name, "invocation failed: {e}"),
            }
            return abort(0, e.to_string());
        }
    };

    match outcome.verdict {
        // Nothing trustworthy exists in storage after a fatal result, so
        // there is nothing to collect.
        Verdict::Fatal(code) => {
            error!(module = %module.name, exit_code = code, "service failed");
            abort(outcome.attempts, format!("service failed with exit code {code}"))
        }
        Verdict::Passed | Verdict::FailedFinal => {
            if cancel.is_cancelled() {
                // Partially written remote results must not be trusted.
                return abort(outcome.attempts, "run cancelled".to_string());
            }

            let artifacts = match collector.collect(&request).await {
                Ok(artifacts) => artifacts,
                Err(e) => {
                    error!(module = %module.name, "artifact collection failed: {e}");
                    return abort(outcome.attempts, e.to_string());
                }
            };

            match outcome.verdict {
                Verdict::Passed => {
                    info!(module = %module.name, attempts = outcome.attempts, "module passed");
                    ModuleReport {
                        module: module.name.clone(),
                        signal: BuildSignal::Success,
                        attempts: outcome.attempts,
                        artifacts: Some(artifacts),
                        detail: None,
                    }
                }
                _ => {
                    let detail = format!("tests failed after {} attempts", outcome.attempts);
                    let signal = if lab.fail_on_error {
                        BuildSignal::Failure
                    } else {
                        BuildSignal::Warning
                    };
                    warn!(module = %module.name, "{detail}");
                    ModuleReport {
                        module: module.name.clone(),
                        signal,
                        attempts: outcome.attempts,
                        artifacts: Some(artifacts),
                        detail: Some(detail),
                    }
                }
            }
        }
    }
}
