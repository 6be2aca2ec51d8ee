//! Retry policy over repeated invocation attempts.
//!
//! A bounded loop over a small state machine: attempt, classify, decide.
//! Only a legitimate test failure is worth retrying, on the theory that it
//! may be a flake. A fatal service result cannot be fixed by trying again
//! and would only waste throttle capacity.

use tracing::{info, warn};

use crate::error::LabResult;
use crate::invoker::{RunOutcome, TestLabInvoker};
use crate::request::TestRunRequest;

/// Terminal state of a module's test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// An attempt passed.
    Passed,

    /// Every attempt in the budget failed.
    FailedFinal,

    /// The service failed with the given exit code; no further attempts
    /// were made.
    Fatal(i32),
}

/// Terminal verdict plus how many attempts it took to get there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOutcome {
    pub verdict: Verdict,
    pub attempts: u32,
}

/// Drives repeated invoker attempts for one request until a terminal state
/// is reached.
pub struct RetryCoordinator<I> {
    invoker: I,
}

impl<I: TestLabInvoker> RetryCoordinator<I> {
    pub fn new(invoker: I) -> Self {
        Self { invoker }
    }

    /// Run attempts until the request passes, exhausts its budget, or hits
    /// a fatal service result. The budget counts attempts, including the
    /// first; it is at least 1 by construction of the request.
    pub async fn run(&self, request: &TestRunRequest) -> LabResult<RetryOutcome> {
        let budget = request.retry_budget;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let outcome = self.invoker.invoke(request, attempt).await?;

            match outcome {
                RunOutcome::Passed => {
                    info!(module = %request.module, attempt, "tests passed");
                    return Ok(RetryOutcome {
                        verdict: Verdict::Passed,
                        attempts: attempt,
                    });
                }
                RunOutcome::Fatal(code) => {
                    warn!(
                        module = %request.module,
                        attempt,
                        exit_code = code,
                        "service failed; not retrying"
                    );
                    return Ok(RetryOutcome {
                        verdict: Verdict::Fatal(code),
                        attempts: attempt,
                    });
                }
                RunOutcome::Failed if attempt < budget => {
                    info!(
                        module = %request.module,
                        attempt,
                        budget,
                        "tests failed; retrying"
                    );
                }
                RunOutcome::Failed => {
                    info!(module = %request.module, attempts = attempt, "tests failed; budget exhausted");
                    return Ok(RetryOutcome {
                        verdict: Verdict::FailedFinal,
                        attempts: attempt,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use uuid::Uuid;

    use crate::error::LabError;

    /// Invoker that replays a fixed sequence of outcomes and counts calls.
    struct ScriptedInvoker {
        script: Mutex<Vec<RunOutcome>>,
        calls: AtomicU32,
    }

    impl ScriptedInvoker {
        fn new(script: Vec<RunOutcome>) -> Self {
            Self {
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TestLabInvoker for ScriptedInvoker {
        async fn invoke(&self, _request: &TestRunRequest, _attempt: u32) -> LabResult<RunOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                return Err(LabError::Configuration("script exhausted".to_string()));
            }
            Ok(script.remove(0))
        }
    }

    fn request(budget: u32) -> TestRunRequest {
        TestRunRequest {
            module: "sampleLib".to_string(),
            variant: "debug".to_string(),
            test_artifact: PathBuf::from("sampleLib/test.apk"),
            app_artifact: None,
            placeholder_artifact: Some(PathBuf::from("/cache/placeholder-app.apk")),
            devices: vec!["model=Pixel2,version=28".to_string()],
            results_id: Uuid::new_v4(),
            bucket: "ci-results".to_string(),
            coverage: false,
            coverage_config: None,
            orchestrator: false,
            retry_budget: budget,
            extra_args: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_always_failing_exhausts_exact_budget() {
        let invoker = ScriptedInvoker::new(vec![RunOutcome::Failed; 5]);
        let coordinator = RetryCoordinator::new(&invoker);

        let outcome = coordinator.run(&request(5)).await.unwrap();

        assert_eq!(outcome.verdict, Verdict::FailedFinal);
        assert_eq!(outcome.attempts, 5);
        assert_eq!(invoker.calls(), 5);
    }

    #[tokio::test]
    async fn test_fatal_stops_immediately_regardless_of_budget() {
        let invoker = ScriptedInvoker::new(vec![RunOutcome::Fatal(77), RunOutcome::Passed]);
        let coordinator = RetryCoordinator::new(&invoker);

        let outcome = coordinator.run(&request(5)).await.unwrap();

        assert_eq!(outcome.verdict, Verdict::Fatal(77));
        assert_eq!(outcome.attempts, 1);
        assert_eq!(invoker.calls(), 1);
    }

    #[tokio::test]
    async fn test_flake_passes_on_third_attempt() {
        let invoker = ScriptedInvoker::new(vec![
            RunOutcome::Failed,
            RunOutcome::Failed,
            RunOutcome::Passed,
        ]);
        let coordinator = RetryCoordinator::new(&invoker);

        let outcome = coordinator.run(&request(3)).await.unwrap();

        assert_eq!(outcome.verdict, Verdict::Passed);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(invoker.calls(), 3);
    }

    #[tokio::test]
    async fn test_single_attempt_budget_fails_final() {
        let invoker = ScriptedInvoker::new(vec![RunOutcome::Failed]);
        let coordinator = RetryCoordinator::new(&invoker);

        let outcome = coordinator.run(&request(1)).await.unwrap();

        assert_eq!(outcome.verdict, Verdict::FailedFinal);
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_fatal_mid_sequence_stops_retries() {
        let invoker = ScriptedInvoker::new(vec![
            RunOutcome::Failed,
            RunOutcome::Fatal(1),
            RunOutcome::Passed,
        ]);
        let coordinator = RetryCoordinator::new(&invoker);

        let outcome = coordinator.run(&request(5)).await.unwrap();

        assert_eq!(outcome.verdict, Verdict::Fatal(1));
        assert_eq!(outcome.attempts, 2);
        assert_eq!(invoker.calls(), 2);
    }

    #[tokio::test]
    async fn test_first_attempt_pass_needs_no_retry() {
        let invoker = ScriptedInvoker::new(vec![RunOutcome::Passed]);
        let coordinator = RetryCoordinator::new(&invoker);

        let outcome = coordinator.run(&request(3)).await.unwrap();

        assert_eq!(outcome.verdict, Verdict::Passed);
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_invoker_error_propagates() {
        let invoker = ScriptedInvoker::new(Vec::new());
        let coordinator = RetryCoordinator::new(&invoker);

        assert!(coordinator.run(&request(3)).await.is_err());
    }
}
