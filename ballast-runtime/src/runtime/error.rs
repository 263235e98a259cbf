use thiserror::Error;

/// Top level runtime error.
#[derive(Error, Debug)]
pub enum Error {
    /// The configuration failed to validate.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Everything else.
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}
