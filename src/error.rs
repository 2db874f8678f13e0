//! Error types shared by the loader, the read pipeline and the binary.

use thiserror::Error;

/// Rejected configuration, reported before any work starts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// k outside 1..=31 (or 1..=62 with big-k emulation).
    #[error("k must be between 1 and {max}, got {k}")]
    InvalidK { k: usize, max: usize },
    /// A mutation distance outside its allowed range.
    #[error("{name} must be between 0 and {max}, got {value}")]
    InvalidDistance {
        name: &'static str,
        value: usize,
        max: usize,
    },
    #[error("speed must be between 0 and 15, got {0}")]
    InvalidSpeed(u64),
    #[error("short kmers require a trim or mask mode")]
    ShortKmersWithoutTrim,
    #[error("best-match filtering requires k <= 31")]
    BestMatchBigK,
    #[error("entropy window must be within 1..=65535, k within 1..=15 and cutoff at most 1")]
    InvalidEntropy,
    #[error("invalid mask symbol {0:?}")]
    InvalidMaskSymbol(char),
    #[error("minimum length fraction must be within [0, 1], got {0}")]
    InvalidLengthFraction(String),
}

/// Top-level library error.
#[derive(Debug, Error)]
pub enum DukError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed sequence input.
    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },
    /// A read's barcode is not in the allowed set and the run is configured to fail.
    #[error("invalid barcode in read {0}")]
    InvalidBarcode(String),
    /// One or more output sinks failed during processing.
    #[error("output error: {0}")]
    Output(String),
}

impl DukError {
    pub(crate) fn parse(path: impl Into<String>, e: impl std::fmt::Display) -> Self {
        DukError::Parse {
            path: path.into(),
            message: e.to_string(),
        }
    }
}
