//! Remote test-service invocation.
//!
//! One call to [`TestLabInvoker::invoke`] is exactly one attempt: pass the
//! throttle, build the argument list, launch the external tool, stream its
//! output into the build log, and classify the exit code. Retries never
//! happen here, so throttling and logging apply uniformly to every attempt
//! including retried ones.

use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout, Command};
use tokio_stream::wrappers::LinesStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::LabConfig;
use crate::error::{LabError, LabResult};
use crate::request::TestRunRequest;
use crate::throttle::Throttle;

/// Exit code the service returns when every test passed.
pub const EXIT_TESTS_PASSED: i32 = 0;

/// Exit code the service returns when one or more tests failed.
pub const EXIT_TESTS_FAILED: i32 = 10;

/// Classified result of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every test passed.
    Passed,

    /// One or more tests failed. Possibly a flake; eligible for retry.
    Failed,

    /// The service itself failed: quota, auth, malformed request. Carries
    /// the raw exit code for diagnosis. Never retried.
    Fatal(i32),
}

impl RunOutcome {
    /// Map a raw process exit code onto an outcome. Death by signal is
    /// reported as exit code -1 and lands in `Fatal` like any other
    /// unexpected code.
    pub fn classify(exit_code: i32) -> Self {
        match exit_code {
            EXIT_TESTS_PASSED => RunOutcome::Passed,
            EXIT_TESTS_FAILED => RunOutcome::Failed,
            other => RunOutcome::Fatal(other),
        }
    }
}

/// A line of output from a streaming external tool.
#[derive(Debug, Clone)]
pub enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// A boxed stream of output lines.
pub type OutputStream = Pin<Box<dyn Stream<Item = OutputLine> + Send>>;

/// Merge a child's stdout and stderr into one line stream.
///
/// Lines are forwarded as they arrive, so a long-running remote job is
/// never buffered whole in memory.
pub(crate) fn merged_output(stdout: ChildStdout, stderr: ChildStderr) -> OutputStream {
    let stdout_stream = LinesStream::new(BufReader::new(stdout).lines())
        .map(|line| OutputLine::Stdout(line.unwrap_or_default()));
    let stderr_stream = LinesStream::new(BufReader::new(stderr).lines())
        .map(|line| OutputLine::Stderr(line.unwrap_or_default()));

    Box::pin(stream::select(stdout_stream, stderr_stream))
}

/// Executes one attempt against the remote test service.
///
/// The trait seam exists so the retry coordinator and orchestrator can be
/// driven by a scripted fake in tests.
#[async_trait]
pub trait TestLabInvoker: Send + Sync {
    /// Execute one attempt and classify its outcome.
    async fn invoke(&self, request: &TestRunRequest, attempt: u32) -> LabResult<RunOutcome>;
}

#[async_trait]
impl<T: TestLabInvoker + ?Sized> TestLabInvoker for Arc<T> {
    async fn invoke(&self, request: &TestRunRequest, attempt: u32) -> LabResult<RunOutcome> {
        (**self).invoke(request, attempt).await
    }
}

#[async_trait]
impl<T: TestLabInvoker + ?Sized> TestLabInvoker for &T {
    async fn invoke(&self, request: &TestRunRequest, attempt: u32) -> LabResult<RunOutcome> {
        (**self).invoke(request, attempt).await
    }
}

/// The real invoker: runs `gcloud firebase test android run`.
pub struct GcloudInvoker {
    program: String,
    throttle: Arc<Throttle>,
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl GcloudInvoker {
    pub fn new(lab: &LabConfig, throttle: Arc<Throttle>, cancel: CancellationToken) -> Self {
        Self {
            program: lab.gcloud_bin.clone(),
            throttle,
            timeout: lab.invoke_timeout_secs.map(Duration::from_secs),
            cancel,
        }
    }

    /// Build the service argument list deterministically from the request.
    pub fn invocation_args(request: &TestRunRequest) -> Vec<String> {
        let mut args = vec![
            "firebase".to_string(),
            "test".to_string(),
            "android".to_string(),
            "run".to_string(),
            "--type=instrumentation".to_string(),
            format!("--results-dir={}", request.results_id),
            format!("--results-history-name={}", request.module),
        ];

        for device in &request.devices {
            args.push(format!("--device={device}"));
        }

        args.push(format!("--test={}", request.test_artifact.display()));
        args.push(format!("--app={}", request.effective_app().display()));

        if request.orchestrator {
            args.push("--use-orchestrator".to_string());
        }

        if let Some(env_file) = &request.coverage_config {
            args.push(format!("--environment-variables-file={}", env_file.display()));
        }

        args.extend(request.extra_args.iter().cloned());

        args
    }

    async fn run_attempt(&self, request: &TestRunRequest) -> LabResult<RunOutcome> {
        let args = Self::invocation_args(request);
        debug!(module = %request.module, ?args, "service invocation arguments");

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LabError::Spawn {
                program: self.program.clone(),
                source: e,
            })?;

        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");
        let mut output = merged_output(stdout, stderr);

        while let Some(line) = output.next().await {
            match line {
                OutputLine::Stdout(s) | OutputLine::Stderr(s) => {
                    info!(target: "devicelab::lab", module = %request.module, "{s}");
                }
            }
        }

        let status = child.wait().await?;
        let code = status.code().unwrap_or(-1);

        Ok(RunOutcome::classify(code))
    }
}

#[async_trait]
impl TestLabInvoker for GcloudInvoker {
    async fn invoke(&self, request: &TestRunRequest, attempt: u32) -> LabResult<RunOutcome> {
        self.throttle.acquire().await;

        info!(
            module = %request.module,
            attempt,
            budget = request.retry_budget,
            results_id = %request.results_id,
            "invoking device lab"
        );

        let bounded = async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, self.run_attempt(request))
                    .await
                    .unwrap_or(Err(LabError::Timeout(limit.as_secs()))),
                None => self.run_attempt(request).await,
            }
        };

        tokio::select! {
            // Dropping the in-flight attempt reaps the child process via
            // kill-on-drop; partially written remote results are discarded
            // by never collecting for cancelled attempts.
            _ = self.cancel.cancelled() => Err(LabError::Cancelled),
            outcome = bounded => outcome,
        }
    }
}
