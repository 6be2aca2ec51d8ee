//! Test run request construction.
//!
//! A [`TestRunRequest`] is the fully resolved, immutable description of one
//! module's test run: every path verified, every flag decided, the results
//! namespace allocated. Resolution is a pure mapping step; nothing here
//! touches the network.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::bundled;
use crate::config::{LabConfig, ModuleConfig, ModuleKind};
use crate::error::{LabError, LabResult};

/// A resolved request for one module's instrumentation test run.
///
/// Created once per module by [`RequestBuilder`] and shared unchanged by
/// every retry attempt of that run.
#[derive(Debug, Clone)]
pub struct TestRunRequest {
    /// Logical module name; keys the results history and local output paths.
    pub module: String,

    /// The build variant under test.
    pub variant: String,

    /// Path to the instrumentation test package. Verified to exist.
    pub test_artifact: PathBuf,

    /// Path to the application package under test; `None` for library
    /// modules.
    pub app_artifact: Option<PathBuf>,

    /// Extracted placeholder package, present exactly when `app_artifact`
    /// is absent.
    pub placeholder_artifact: Option<PathBuf>,

    /// Target device specs. Non-empty.
    pub devices: Vec<String>,

    /// Unique namespace for this run's remote results. Concurrent requests
    /// against the same bucket must never share one.
    pub results_id: Uuid,

    /// Remote storage bucket for results and coverage.
    pub bucket: String,

    /// Whether coverage instrumentation was requested.
    pub coverage: bool,

    /// Extracted coverage environment file, present exactly when
    /// `coverage` is set.
    pub coverage_config: Option<PathBuf>,

    /// Whether to run under the on-device test orchestrator.
    pub orchestrator: bool,

    /// Maximum attempts, including the first. Always at least 1.
    pub retry_budget: u32,

    /// Opaque passthrough arguments, already split with shell quoting rules.
    pub extra_args: Vec<String>,
}

impl TestRunRequest {
    /// The application package handed to the service: the module's own
    /// artifact, or the bundled placeholder for library modules.
    pub fn effective_app(&self) -> &Path {
        self.app_artifact
            .as_deref()
            .or(self.placeholder_artifact.as_deref())
            .expect("request resolved without an application package")
    }
}

/// Resolves module configuration into [`TestRunRequest`]s.
pub struct RequestBuilder<'a> {
    lab: &'a LabConfig,
}

impl<'a> RequestBuilder<'a> {
    pub fn new(lab: &'a LabConfig) -> Self {
        Self { lab }
    }

    /// Build a request for one module, failing fast on unresolvable
    /// configuration.
    pub fn build(&self, module: &ModuleConfig) -> LabResult<TestRunRequest> {
        if self.lab.bucket.is_empty() {
            return Err(LabError::Configuration("bucket is empty".to_string()));
        }

        if self.lab.retry_count < 1 {
            return Err(LabError::Configuration(
                "retry_count must be at least 1".to_string(),
            ));
        }

        if module.devices.is_empty() {
            return Err(LabError::Configuration(format!(
                "module '{}' configures no target devices",
                module.name
            )));
        }

        let test_artifact = expand_path(&module.test_artifact)?;
        if !test_artifact.is_file() {
            return Err(LabError::Configuration(format!(
                "test artifact for module '{}' not found: {}",
                module.name,
                test_artifact.display()
            )));
        }

        let (app_artifact, placeholder_artifact) = match module.kind {
            ModuleKind::Application => {
                let raw = module.app_artifact.as_deref().ok_or_else(|| {
                    LabError::Configuration(format!(
                        "application module '{}' configures no app_artifact",
                        module.name
                    ))
                })?;

                let app = expand_path(raw)?;
                if !app.is_file() {
                    return Err(LabError::Configuration(format!(
                        "application artifact for module '{}' not found: {}",
                        module.name,
                        app.display()
                    )));
                }

                // The test package is built against one specific variant of
                // the app; a mismatched pair runs, but tests the wrong code.
                let build_type = module.app_build_type.as_deref().ok_or_else(|| {
                    LabError::Configuration(format!(
                        "application module '{}' configures no app_build_type",
                        module.name
                    ))
                })?;
                if build_type != module.variant {
                    return Err(LabError::Configuration(format!(
                        "module '{}' pairs test variant '{}' with app build type '{}'",
                        module.name, module.variant, build_type
                    )));
                }

                (Some(app), None)
            }
            ModuleKind::Library => {
                if module.app_artifact.is_some() {
                    return Err(LabError::Configuration(format!(
                        "library module '{}' must not configure app_artifact",
                        module.name
                    )));
                }

                (None, Some(bundled::placeholder_app()?))
            }
        };

        let coverage_config = if module.coverage {
            Some(bundled::coverage_environment()?)
        } else {
            None
        };

        let extra_args = shell_words::split(&self.lab.extra_args).map_err(|e| {
            LabError::Configuration(format!("malformed extra_args: {e}"))
        })?;

        Ok(TestRunRequest {
            module: module.name.clone(),
            variant: module.variant.clone(),
            test_artifact,
            app_artifact,
            placeholder_artifact,
            devices: module.devices.clone(),
            results_id: Uuid::new_v4(),
            bucket: self.lab.bucket.clone(),
            coverage: module.coverage,
            coverage_config,
            orchestrator: module.orchestrator,
            retry_budget: self.lab.retry_count,
            extra_args,
        })
    }
}

fn expand_path(raw: &str) -> LabResult<PathBuf> {
    let expanded = shellexpand::full(raw)
        .map_err(|e| LabError::Configuration(format!("cannot expand path '{raw}': {e}")))?;
    Ok(PathBuf::from(expanded.as_ref()))
}
