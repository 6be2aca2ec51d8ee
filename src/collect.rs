//! Post-run artifact retrieval from remote storage.
//!
//! The service writes result XML and coverage data into the configured
//! bucket under the run's results namespace. The storage backend is only
//! eventually consistent, so collection waits a propagation delay before
//! trusting listings, then bulk-copies each artifact class into the local
//! build output layout. Artifact loss is never silently ignored: a missing
//! coverage object when coverage was requested is a failure, because
//! downstream reporting depends on it.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::LabConfig;
use crate::error::{LabError, LabResult};
use crate::invoker::{OutputLine, merged_output};
use crate::request::TestRunRequest;

/// Local paths the run's artifacts were copied to.
#[derive(Debug, Clone)]
pub struct CollectedArtifacts {
    /// Destination of the result XML copy.
    pub results_xml: PathBuf,

    /// Destination of the coverage data copy, when coverage was requested.
    pub coverage: Option<PathBuf>,
}

/// Bulk-copy access to remote object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Copy every object matching `pattern` to the local `dest` path in one
    /// bulk operation.
    async fn copy_matching(&self, pattern: &str, dest: &Path) -> LabResult<()>;
}

#[async_trait]
impl<T: ObjectStore + ?Sized> ObjectStore for std::sync::Arc<T> {
    async fn copy_matching(&self, pattern: &str, dest: &Path) -> LabResult<()> {
        (**self).copy_matching(pattern, dest).await
    }
}

/// The real store: shells out to `gsutil -m cp`.
pub struct GsutilStore {
    program: String,
}

impl GsutilStore {
    pub fn new(lab: &LabConfig) -> Self {
        Self {
            program: lab.gsutil_bin.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for GsutilStore {
    async fn copy_matching(&self, pattern: &str, dest: &Path) -> LabResult<()> {
        debug!(pattern, dest = %dest.display(), "copying artifacts");

        let mut child = Command::new(&self.program)
            .arg("-m")
            .arg("cp")
            .arg(pattern)
            .arg(dest)
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
                    info!(target: "devicelab::storage", "{s}");
                }
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            // gsutil also exits non-zero when nothing matched the pattern,
            // which is exactly the missing-artifact case.
            return Err(LabError::ArtifactCopy(format!(
                "{} exited with {} copying {pattern}",
                self.program,
                status.code().unwrap_or(-1)
            )));
        }

        Ok(())
    }
}

/// Copies a finished run's artifacts into the local build output layout.
pub struct ArtifactCollector<S> {
    store: S,
    output_root: PathBuf,
    propagation_delay: Duration,
}

impl<S: ObjectStore> ArtifactCollector<S> {
    pub fn new(lab: &LabConfig, store: S) -> Self {
        Self {
            store,
            output_root: lab.output_root.clone(),
            propagation_delay: Duration::from_secs(lab.propagation_delay_secs),
        }
    }

    /// Fetch result XML and, when requested, coverage data for a run that
    /// reached a terminal test outcome.
    pub async fn collect(&self, request: &TestRunRequest) -> LabResult<CollectedArtifacts> {
        // Results may not be visible immediately after the service returns.
        tokio::time::sleep(self.propagation_delay).await;

        let results_dir = self
            .output_root
            .join(&request.module)
            .join("build/outputs/test-results");
        tokio::fs::create_dir_all(&results_dir).await?;

        let results_xml = results_dir.join(format!("{}-test-result.xml", request.results_id));
        let results_pattern = format!(
            "gs://{}/{}/**test_result_*.xml",
            request.bucket, request.results_id
        );
        self.store.copy_matching(&results_pattern, &results_xml).await?;

        let coverage = if request.coverage {
            let coverage_dir = self
                .output_root
                .join(&request.module)
                .join("build/outputs/coverage")
                .join(&request.variant);
            tokio::fs::create_dir_all(&coverage_dir).await?;

            let coverage_ec = coverage_dir.join(format!("{}-coverage.ec", request.results_id));
            let coverage_pattern = format!(
                "gs://{}/{}/**/artifacts/coverage.ec",
                request.bucket, request.results_id
            );
            self.store.copy_matching(&coverage_pattern, &coverage_ec).await?;

            Some(coverage_ec)
        } else {
            None
        };

        info!(
            module = %request.module,
            results = %results_xml.display(),
            "artifacts collected"
        );

        Ok(CollectedArtifacts {
            results_xml,
            coverage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use uuid::Uuid;

    use crate::config::load_config_str;

    /// Store that records copy calls and optionally fails on a pattern
    /// substring.
    struct RecordingStore {
        calls: Mutex<Vec<(String, PathBuf)>>,
        fail_on: Option<&'static str>,
    }

    impl RecordingStore {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_on: None,
            }
        }

        fn failing_on(substring: &'static str) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_on: Some(substring),
            }
        }

        fn calls(&self) -> Vec<(String, PathBuf)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ObjectStore for RecordingStore {
        async fn copy_matching(&self, pattern: &str, dest: &Path) -> LabResult<()> {
            self.calls
                .lock()
                .unwrap()
                .push((pattern.to_string(), dest.to_path_buf()));

            if let Some(marker) = self.fail_on
                && pattern.contains(marker)
            {
                return Err(LabError::ArtifactCopy(format!("no objects match {pattern}")));
            }

            Ok(())
        }
    }

    fn lab_config(root: &Path) -> crate::config::LabConfig {
        let mut config = load_config_str("[lab]\nbucket = \"ci-results\"\n").unwrap();
        config.lab.output_root = root.to_path_buf();
        config.lab
    }

    fn request(coverage: bool) -> TestRunRequest {
        TestRunRequest {
            module: "sampleLib".to_string(),
            variant: "debug".to_string(),
            test_artifact: PathBuf::from("sampleLib/test.apk"),
            app_artifact: None,
            placeholder_artifact: Some(PathBuf::from("/cache/placeholder-app.apk")),
            devices: vec!["model=Pixel2,version=28".to_string()],
            results_id: Uuid::nil(),
            bucket: "ci-results".to_string(),
            coverage,
            coverage_config: None,
            orchestrator: false,
            retry_budget: 1,
            extra_args: Vec::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_copied_into_module_layout() {
        let dir = tempfile::tempdir().unwrap();
        let collector = ArtifactCollector::new(&lab_config(dir.path()), RecordingStore::new());

        let artifacts = collector.collect(&request(false)).await.unwrap();

        let expected = dir
            .path()
            .join("sampleLib/build/outputs/test-results")
            .join(format!("{}-test-result.xml", Uuid::nil()));
        assert_eq!(artifacts.results_xml, expected);
        assert!(artifacts.coverage.is_none());
        assert!(expected.parent().unwrap().is_dir());

        let calls = collector.store.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].0,
            format!("gs://ci-results/{}/**test_result_*.xml", Uuid::nil())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_coverage_copied_under_variant() {
        let dir = tempfile::tempdir().unwrap();
        let collector = ArtifactCollector::new(&lab_config(dir.path()), RecordingStore::new());

        let artifacts = collector.collect(&request(true)).await.unwrap();

        let coverage = artifacts.coverage.unwrap();
        let expected = dir
            .path()
            .join("sampleLib/build/outputs/coverage/debug")
            .join(format!("{}-coverage.ec", Uuid::nil()));
        assert_eq!(coverage, expected);

        let calls = collector.store.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[1].0,
            format!("gs://ci-results/{}/**/artifacts/coverage.ec", Uuid::nil())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_coverage_object_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let collector =
            ArtifactCollector::new(&lab_config(dir.path()), RecordingStore::failing_on("coverage"));

        let result = collector.collect(&request(true)).await;

        match result {
            Err(LabError::ArtifactCopy(_)) => {}
            other => panic!("expected artifact copy error, got {other:?}"),
        }
        // The results copy still ran before the coverage failure surfaced.
        assert_eq!(collector.store.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_propagation_delay_elapses_before_copy() {
        let dir = tempfile::tempdir().unwrap();
        let collector = ArtifactCollector::new(&lab_config(dir.path()), RecordingStore::new());

        let start = tokio::time::Instant::now();
        collector.collect(&request(false)).await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(5));
    }
}
