use std::io;
use thiserror::Error;

/// Errors surfaced by the spill map and its bucket files
#[derive(Error, Debug)]
pub enum Error {
    /// Key not found in the map
    #[error("Key not found")]
    KeyNotFound,

    /// IO errors when reading/writing bucket log files
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Encoding errors when serializing a key or value to bytes
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Decoding errors when reading a record back from disk
    #[error("Decoding error: {0}")]
    Decoding(String),

    /// Internal bookkeeping desynchronized; indicates a defect, not user error
    #[error("Corrupt map state: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Error::Corrupt(msg.into())
    }
}
