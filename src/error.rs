use thiserror::Error;

/// Fatal failures with a fixed meaning for the CLI. Everything else travels
/// as `anyhow::Error` context chains.
#[derive(Debug, Error)]
pub enum DiffError {
    /// The old archive does not contain the designated bundle payload.
    #[error("bundle file not found in {archive}: expected one of {expected:?}; use the default bundle file name and path")]
    PayloadMissing {
        archive: String,
        expected: Vec<String>,
    },

    /// The requested delta algorithm was not compiled into this build.
    #[error("delta algorithm '{0}' is not available in this build (rebuild with the '{0}' feature enabled)")]
    AlgorithmUnavailable(&'static str),
}
