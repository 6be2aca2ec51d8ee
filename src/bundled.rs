//! Bundled resources for device-lab runs.
//!
//! Two files ship inside the binary: the placeholder application package
//! substituted when testing a library module (the service refuses a run
//! without an app package), and the environment file that turns on coverage
//! instrumentation. Both are extracted on demand to a cache directory, at
//! most once per process, and reused by every module that needs them.

use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use include_dir::{Dir, include_dir};

/// Embedded resources directory.
static RESOURCES_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/resources");

/// Lazily initialized cache of extracted resources.
static RESOURCES_CACHE: OnceLock<Result<PathBuf, BundledError>> = OnceLock::new();

/// File name of the stand-in application package for library modules.
pub const PLACEHOLDER_APP: &str = "placeholder-app.apk";

/// File name of the coverage environment file handed to the service.
pub const COVERAGE_ENVIRONMENT: &str = "coverage-environment.yml";

/// Result type for bundled resource operations.
pub type BundledResult<T> = Result<T, BundledError>;

/// Errors that can occur while extracting bundled resources.
#[derive(Debug, thiserror::Error)]
pub enum BundledError {
    /// Failed to create the cache directory.
    #[error("failed to create resource cache directory: {0}")]
    CacheCreationFailed(std::io::Error),

    /// Failed to extract a bundled resource.
    #[error("failed to extract resource '{name}': {source}")]
    ExtractionFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Requested resource is not bundled.
    #[error("resource not bundled: {0}")]
    NotBundled(String),
}

/// Returns the cache directory for extracted resources.
///
/// Uses platform-appropriate cache locations:
/// - macOS: `~/Library/Caches/devicelab/resources`
/// - Linux: `$XDG_CACHE_HOME/devicelab/resources` or `~/.cache/devicelab/resources`
/// - Windows: `%LOCALAPPDATA%/devicelab/resources`
/// - Fallback: `/tmp/devicelab/resources`
fn cache_dir() -> BundledResult<PathBuf> {
    let base_cache = if cfg!(target_os = "macos") {
        env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Caches"))
    } else if cfg!(target_os = "windows") {
        env::var("LOCALAPPDATA").ok().map(PathBuf::from)
    } else {
        env::var("XDG_CACHE_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".cache"))
            })
    };

    let cache_dir = base_cache
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("devicelab")
        .join("resources");

    fs::create_dir_all(&cache_dir).map_err(BundledError::CacheCreationFailed)?;

    Ok(cache_dir)
}

/// Extracts all bundled resources to the cache directory (once).
fn ensure_extracted() -> BundledResult<PathBuf> {
    let result = RESOURCES_CACHE.get_or_init(|| {
        let cache_dir = cache_dir()?;

        for file in RESOURCES_DIR.files() {
            let target_path = cache_dir.join(file.path());

            // Skip if the file already exists with identical content, so a
            // previous process's extraction is reused.
            if target_path.exists()
                && let Ok(existing) = fs::read(&target_path)
                && existing == file.contents()
            {
                continue;
            }

            fs::write(&target_path, file.contents()).map_err(|e| {
                BundledError::ExtractionFailed {
                    name: file.path().display().to_string(),
                    source: e,
                }
            })?;
        }

        Ok(cache_dir)
    });

    match result {
        Ok(path) => Ok(path.clone()),
        Err(e) => Err(BundledError::ExtractionFailed {
            name: "cache initialization".to_string(),
            source: std::io::Error::other(e.to_string()),
        }),
    }
}

/// Returns the extracted path of a bundled resource by file name.
pub fn resource_path(name: &str) -> BundledResult<PathBuf> {
    if RESOURCES_DIR.get_file(name).is_none() {
        return Err(BundledError::NotBundled(name.to_string()));
    }

    let cache_dir = ensure_extracted()?;
    Ok(cache_dir.join(name))
}

/// Path of the placeholder application package, extracting it if needed.
pub fn placeholder_app() -> BundledResult<PathBuf> {
    resource_path(PLACEHOLDER_APP)
}

/// Path of the coverage environment file, extracting it if needed.
pub fn coverage_environment() -> BundledResult<PathBuf> {
    resource_path(COVERAGE_ENVIRONMENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_app_extracted() -> Result<(), Box<dyn std::error::Error>> {
        let path = placeholder_app()?;

        assert!(path.exists());
        assert!(path.ends_with(PLACEHOLDER_APP));
        assert!(!fs::read(&path)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_extraction_is_stable_across_calls() -> Result<(), Box<dyn std::error::Error>> {
        let first = placeholder_app()?;
        let second = placeholder_app()?;

        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn test_coverage_environment_extracted() -> Result<(), Box<dyn std::error::Error>> {
        let path = coverage_environment()?;

        assert!(path.exists());
        let content = fs::read_to_string(&path)?;
        assert!(content.contains("coverage"));
        Ok(())
    }

    #[test]
    fn test_unknown_resource_rejected() {
        let result = resource_path("nonexistent.bin");

        match result {
            Err(BundledError::NotBundled(name)) => assert_eq!(name, "nonexistent.bin"),
            _ => panic!("Expected NotBundled error"),
        }
    }

    #[test]
    fn test_concurrent_extraction_converges() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| placeholder_app().unwrap()))
            .collect();

        let mut paths: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        paths.dedup();

        assert_eq!(paths.len(), 1);
        assert!(paths[0].exists());
    }
}
