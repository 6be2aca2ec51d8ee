//! Crate-wide error taxonomy.
//!
//! Test failures are deliberately *not* errors: a failing test run is data
//! ([`RunOutcome::Failed`](crate::invoker::RunOutcome)) consumed by the retry
//! policy. Errors here cover the cases where the orchestration itself could
//! not complete.

/// Result type for orchestration operations.
pub type LabResult<T> = Result<T, LabError>;

/// Errors that can occur while orchestrating a test run.
#[derive(Debug, thiserror::Error)]
pub enum LabError {
    /// Unresolvable module configuration: missing artifacts, empty device
    /// list, mismatched variant pairing. Fails fast, before any remote call.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An external tool could not be launched at all.
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// An artifact transfer failed or the expected object was missing.
    #[error("artifact copy failed: {0}")]
    ArtifactCopy(String),

    /// A single attempt exceeded the configured wall-time bound.
    #[error("attempt exceeded the {0}s time limit")]
    Timeout(u64),

    /// The enclosing build was interrupted; in-flight work was terminated.
    #[error("run cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<crate::bundled::BundledError> for LabError {
    /// A missing or unextractable bundled resource means the run cannot be
    /// configured, not that the pipeline broke mid-flight.
    fn from(e: crate::bundled::BundledError) -> Self {
        LabError::Configuration(e.to_string())
    }
}

impl LabError {
    /// Whether this error indicates the test pipeline malfunctioned, as
    /// opposed to a bad configuration or a deliberate interruption.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::Spawn { .. } | Self::ArtifactCopy(_) | Self::Timeout(_) | Self::Io(_)
        )
    }
}
