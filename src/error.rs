use thiserror::Error;

/// The closed set of failure conditions the pipeline can report. Each variant
/// carries enough context to print the single-line diagnostic the CLI prints
/// to stderr before exiting 1.
#[derive(Debug, Error)]
pub enum HlsError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unsupported combination: {0}")]
    UnsupportedCombination(String),

    #[error("io failure: {0}")]
    IoFailure(#[from] std::io::Error),

    #[error("cipher failure: {0}")]
    CipherFailure(String),

    #[error("decoder config parse failure: {0}")]
    DecoderConfigParseFailure(String),
}

pub type Result<T> = std::result::Result<T, HlsError>;
