use thiserror::Error;

/// Library error type for photo-picker operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The source probe reported a zero-sized image; the identifier is
    /// unloadable and the caller should not retry.
    #[error("source reported invalid dimensions {0}x{1}")]
    InvalidSourceDimensions(u32, u32),

    /// The underlying decode failed or produced no image. Recoverable: the
    /// caller shows a placeholder instead.
    #[error("decode error: {0}")]
    Decode(anyhow::Error),

    /// Underlying IO error while opening, reading, or writing.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The identifier does not match any scheme this pipeline understands.
    /// A programming error in the caller, not a runtime condition.
    #[error("unsupported identifier: {0}")]
    UnsupportedIdentifier(String),
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Decode(err.into())
    }
}

impl Error {
    /// Precondition violations propagate to the caller; decode and IO
    /// failures are swallowed at the pipeline boundary instead.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::InvalidSourceDimensions(..) | Error::UnsupportedIdentifier(..)
        )
    }
}
