use thiserror::Error;

/// Errors from the byte-stream source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The input was opened in bzip2 mode but does not start with the
    /// bzip2 magic.
    #[error("not a bzip2 stream (bad magic)")]
    BadMagic,

    /// The compressed stream ended mid-block.
    #[error("truncated compressed stream")]
    Truncated,

    #[error("decoder error: {0}")]
    Decoder(String),
}

/// Errors from the tar reader.
#[derive(Debug, Error)]
pub enum TarError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid header checksum")]
    Checksum,

    #[error("unexpected end of archive")]
    Truncated,
}

/// Errors from the import pipeline as a whole.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("archive error: {0}")]
    Tar(#[from] TarError),

    #[error("catalog error: {0}")]
    Catalog(#[from] spindle_core::Error),
}

pub type Result<T> = std::result::Result<T, ImportError>;
