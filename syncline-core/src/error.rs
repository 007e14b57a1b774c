//! Error surface of the event engine.

use std::path::PathBuf;

use thiserror::Error;

/// All errors the engine and its configuration loader can produce.
///
/// Configuration problems are fatal at init; everything the engine cannot
/// control (kernel, filesystem, children) is recovered locally with logging
/// and never surfaces here.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Underlying I/O failure while reading configuration.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load, with the offending file.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Top-level configuration problem.
    #[error("config: {0}")]
    InvalidConfig(String),

    /// A sync declaration that cannot be honored.
    #[error("invalid sync for {path}: {reason}")]
    InvalidSync { path: PathBuf, reason: String },

    /// The declared source directory does not exist.
    #[error("source directory not found: {path}")]
    SourceMissing { path: PathBuf },

    /// A template placeholder with no value in the current context.
    #[error("cannot expand {{{placeholder}}} for this event")]
    Placeholder { placeholder: String },

    /// The kernel event queue overflowed; the observed state is no longer
    /// trustworthy.
    #[error("kernel event queue overflowed")]
    Overflow,

    /// A startup command exited nonzero.
    #[error("startup command for {path} exited with code {code}")]
    StartupFailed { path: PathBuf, code: i32 },
}
