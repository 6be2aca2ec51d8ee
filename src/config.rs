//! Configuration loading and schema definitions.
//!
//! All settings are loaded once from a TOML file before orchestration
//! begins: a global `[lab]` table and one `[[modules]]` entry per build
//! module whose instrumentation tests should run.
//!
//! # TOML Structure
//!
//! ```toml
//! [lab]
//! bucket = "ci-results"
//! retry_count = 3
//!
//! [[modules]]
//! name = "assertionLib"
//! kind = "library"
//! variant = "debug"
//! test_artifact = "assertionLib/build/outputs/apk/androidTest/debug/assertionLib-debug-androidTest.apk"
//! devices = ["model=Pixel2,version=28"]
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Global orchestration settings shared by every module.
    pub lab: LabConfig,

    /// The modules whose instrumentation tests should be run.
    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
}

/// Global orchestration settings.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `extra_args` | `""` |
/// | `retry_count` | 1 |
/// | `fail_on_error` | true |
/// | `min_spacing_secs` | 3 |
/// | `propagation_delay_secs` | 5 |
/// | `invoke_timeout_secs` | unset (run until the service returns) |
/// | `gcloud_bin` / `gsutil_bin` | `"gcloud"` / `"gsutil"` |
/// | `output_root` | `"."` |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LabConfig {
    /// Storage bucket the service writes results and coverage into.
    pub bucket: String,

    /// Extra arguments appended verbatim to every service invocation.
    ///
    /// Parsed with shell quoting rules, so quoted values survive intact.
    #[serde(default)]
    pub extra_args: String,

    /// Maximum attempts per module, including the first one.
    ///
    /// Only legitimate test failures are retried; infrastructure failures
    /// stop a module immediately. Must be at least 1.
    ///
    /// Default: 1
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Whether a module whose tests still fail after all retries fails the
    /// build. When disabled such modules are reported as warnings instead.
    ///
    /// Default: true
    #[serde(default = "default_true")]
    pub fail_on_error: bool,

    /// Minimum spacing in seconds between any two service invocations
    /// process-wide, across all concurrent modules.
    ///
    /// Default: 3
    #[serde(default = "default_min_spacing")]
    pub min_spacing_secs: u64,

    /// Seconds to wait after a run completes before fetching artifacts, to
    /// let the storage backend become consistent.
    ///
    /// Default: 5
    #[serde(default = "default_propagation_delay")]
    pub propagation_delay_secs: u64,

    /// Optional wall-time bound in seconds for a single attempt.
    ///
    /// Unset by default: device-farm queues can legitimately hold a run for
    /// a long time, so the attempt runs until the service returns.
    pub invoke_timeout_secs: Option<u64>,

    /// Binary used to invoke the test service.
    ///
    /// Default: `"gcloud"`
    #[serde(default = "default_gcloud_bin")]
    pub gcloud_bin: String,

    /// Binary used for bulk artifact copies from storage.
    ///
    /// Default: `"gsutil"`
    #[serde(default = "default_gsutil_bin")]
    pub gsutil_bin: String,

    /// Directory the per-module `build/outputs/...` layout is rooted at.
    ///
    /// Default: `"."`
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
}

fn default_retry_count() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_min_spacing() -> u64 {
    3
}

fn default_propagation_delay() -> u64 {
    5
}

fn default_gcloud_bin() -> String {
    "gcloud".to_string()
}

fn default_gsutil_bin() -> String {
    "gsutil".to_string()
}

fn default_output_root() -> PathBuf {
    PathBuf::from(".")
}

/// Whether a module builds a shippable application or only a library.
///
/// Library modules have no application package of their own, and the test
/// service requires one, so a bundled placeholder package is substituted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    Application,
    Library,
}

/// Per-module test configuration.
///
/// # Example
///
/// ```toml
/// [[modules]]
/// name = "conditionApp"
/// kind = "application"
/// variant = "debug"
/// test_artifact = "conditionApp/build/outputs/apk/androidTest/debug/app-debug-androidTest.apk"
/// app_artifact = "conditionApp/build/outputs/apk/debug/app-debug.apk"
/// app_build_type = "debug"
/// coverage = true
/// devices = ["model=Pixel2,version=28", "model=sailfish,version=26"]
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModuleConfig {
    /// Logical module name; also keys the results history and the local
    /// output directory.
    pub name: String,

    /// Whether the module produces an application or a library artifact.
    pub kind: ModuleKind,

    /// The build variant under test. Resolves coverage output paths, and
    /// for application modules must match `app_build_type`.
    pub variant: String,

    /// Path to the instrumentation test package. `~` and `$VAR` are
    /// expanded.
    pub test_artifact: String,

    /// Path to the application package under test. Application modules
    /// only.
    pub app_artifact: Option<String>,

    /// Build type the application artifact was built from. Must equal
    /// `variant`; pairing a test package with an app from a different build
    /// type produces useless runs.
    pub app_build_type: Option<String>,

    /// Whether to request coverage instrumentation for this module's runs.
    #[serde(default)]
    pub coverage: bool,

    /// Whether to run tests under the on-device test orchestrator.
    #[serde(default)]
    pub orchestrator: bool,

    /// Target device specs, e.g. `model=Pixel2,version=28`. At least one
    /// required.
    #[serde(default)]
    pub devices: Vec<String>,
}

/// Load configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Load configuration from a string.
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_defaults() {
        let config = load_config_str(
            r#"
            [lab]
            bucket = "ci-results"
            "#,
        )
        .unwrap();

        assert_eq!(config.lab.bucket, "ci-results");
        assert_eq!(config.lab.retry_count, 1);
        assert!(config.lab.fail_on_error);
        assert_eq!(config.lab.min_spacing_secs, 3);
        assert_eq!(config.lab.propagation_delay_secs, 5);
        assert_eq!(config.lab.invoke_timeout_secs, None);
        assert_eq!(config.lab.gcloud_bin, "gcloud");
        assert_eq!(config.lab.gsutil_bin, "gsutil");
        assert!(config.modules.is_empty());
    }

    #[test]
    fn test_full_module_config() {
        let config = load_config_str(
            r#"
            [lab]
            bucket = "ci-results"
            extra_args = "--timeout 30m"
            retry_count = 3
            fail_on_error = false
            invoke_timeout_secs = 5400

            [[modules]]
            name = "assertionLib"
            kind = "library"
            variant = "debug"
            test_artifact = "assertionLib/test.apk"
            coverage = true
            orchestrator = true
            devices = ["model=Pixel2,version=28"]

            [[modules]]
            name = "conditionApp"
            kind = "application"
            variant = "debug"
            test_artifact = "conditionApp/test.apk"
            app_artifact = "conditionApp/app.apk"
            app_build_type = "debug"
            devices = ["model=Pixel2,version=28"]
            "#,
        )
        .unwrap();

        assert_eq!(config.lab.retry_count, 3);
        assert!(!config.lab.fail_on_error);
        assert_eq!(config.lab.invoke_timeout_secs, Some(5400));
        assert_eq!(config.modules.len(), 2);

        let lib = &config.modules[0];
        assert_eq!(lib.kind, ModuleKind::Library);
        assert!(lib.coverage);
        assert!(lib.orchestrator);
        assert!(lib.app_artifact.is_none());

        let app = &config.modules[1];
        assert_eq!(app.kind, ModuleKind::Application);
        assert_eq!(app.app_build_type.as_deref(), Some("debug"));
        assert!(!app.coverage);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let result = load_config_str(
            r#"
            [lab]
            bucket = "b"

            [[modules]]
            name = "m"
            kind = "plugin"
            variant = "debug"
            test_artifact = "t.apk"
            "#,
        );

        assert!(result.is_err());
    }

    #[test]
    fn test_missing_bucket_rejected() {
        assert!(load_config_str("[lab]\n").is_err());
    }
}
