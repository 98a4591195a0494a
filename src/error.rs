use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the benchmark harness
#[derive(Error, Debug)]
pub enum BenchError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0} env must be set")]
    MissingCredential(String),

    // Catalog errors
    #[error("Failed to read benchmark catalog {}: {source}", path.display())]
    Catalog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed benchmark catalog: {0}")]
    CatalogFormat(#[from] serde_json::Error),

    #[error("duplicate benchmark {0:?} in catalog")]
    DuplicateBenchmark(String),

    // Request errors
    #[error("unknown benchmark {0:?}")]
    UnknownBenchmark(String),

    #[error("benchmark {0:?} requested more than once")]
    RepeatedBenchmark(String),

    #[error("no benchmarks requested")]
    EmptyBenchmarkList,

    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    // Process errors
    #[error("Failed to launch agent {name}: {source}")]
    Launch {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[cfg(unix)]
    #[error("Failed to signal process group {pid}: {source}")]
    Signal {
        pid: i32,
        #[source]
        source: nix::Error,
    },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BenchError {
    /// Errors raised before any subprocess could have been spawned
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            BenchError::Config(_)
                | BenchError::InvalidConfig(_)
                | BenchError::MissingCredential(_)
                | BenchError::Catalog { .. }
                | BenchError::CatalogFormat(_)
                | BenchError::DuplicateBenchmark(_)
                | BenchError::UnknownBenchmark(_)
                | BenchError::RepeatedBenchmark(_)
                | BenchError::EmptyBenchmarkList
                | BenchError::InvalidDuration(_)
        )
    }
}

/// Result type alias for BenchError
pub type Result<T> = std::result::Result<T, BenchError>;
