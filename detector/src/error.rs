use std::path::PathBuf;
use thiserror::Error;

/// Construction-time failures of the detection engine.
///
/// Nothing in the per-block hot path is fatal (publication errors are logged
/// and swallowed); only building the engine can fail.
#[derive(Error, Debug)]
pub enum DetectorError {
    /// Configuration validation failure.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The FF staging directory could not be created.
    #[error("failed to create staging directory {}: {source}", path.display())]
    Staging {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The worker thread could not be spawned.
    #[error("failed to spawn detection worker: {0}")]
    Spawn(std::io::Error),
}
