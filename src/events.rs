use std::path::PathBuf;

use crate::source::ImageId;

/// Emitted once per successfully generated thumbnail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailReady {
    pub id: ImageId,
    pub location: PathBuf,
}

/// Emitted when generation produced no thumbnail for the identifier; the
/// consumer shows a placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailFailed(pub ImageId);
