use std::fs::{self, File};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::decode::DecodedImage;
use crate::error::Error;
use crate::loader::{ImageLoader, LoadRequest};
use crate::source::ImageId;

/// Zero-byte sentinel suppressing media-library indexing of the cache
/// directory. Harmless on platforms without such indexing.
const NO_MEDIA_MARKER: &str = ".nomedia";

/// Persists generated thumbnails so repeat runs skip decoder work entirely.
///
/// Files are keyed by the identifier's trailing path segment and considered
/// fresh for the configured TTL; a stale file is regenerated and overwritten
/// in place, never deleted up front. Staleness is about drift, not
/// correctness: the source is not watched for changes.
pub struct ThumbnailStore {
    loader: Arc<ImageLoader>,
    root: PathBuf,
    ttl: Duration,
    quality: u8,
}

impl ThumbnailStore {
    pub fn new(
        loader: Arc<ImageLoader>,
        root: PathBuf,
        ttl: Duration,
        quality: u8,
    ) -> Result<Self, Error> {
        let store = Self {
            loader,
            root,
            ttl,
            quality,
        };
        store.ensure_root()?;
        Ok(store)
    }

    fn ensure_root(&self) -> Result<(), Error> {
        fs::create_dir_all(&self.root)?;
        let marker = self.root.join(NO_MEDIA_MARKER);
        if !marker.exists() {
            File::create(&marker)?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path the thumbnail for `id` is stored at.
    pub fn location(&self, id: &ImageId) -> PathBuf {
        self.root.join(format!("{}.jpg", id.fragment()))
    }

    fn is_fresh(&self, file: &Path) -> bool {
        let Ok(metadata) = fs::metadata(file) else {
            return false;
        };
        let Ok(modified) = metadata.modified() else {
            return false;
        };
        match modified.elapsed() {
            Ok(age) => age < self.ttl,
            // A timestamp in the future counts as fresh.
            Err(_) => true,
        }
    }

    /// Return the on-disk thumbnail for `id`, generating it first when
    /// missing or stale. `Ok(None)` means no thumbnail could be produced;
    /// the caller shows a placeholder.
    #[instrument(skip(self, cancel), fields(id = %id))]
    pub fn get_or_create(
        &self,
        id: &ImageId,
        size: u32,
        cancel: Option<CancellationToken>,
    ) -> Result<Option<PathBuf>, Error> {
        let file = self.location(id);
        if self.is_fresh(&file) {
            debug!(path = %file.display(), "thumbnail fresh; reusing");
            return Ok(Some(file));
        }

        let request = LoadRequest {
            cancel,
            ..LoadRequest::bounded(size, size)
        };
        let Some(image) = self.loader.load_with(id, request)? else {
            return Ok(None);
        };

        match self.write_jpeg(&file, &image) {
            Ok(()) => {
                debug!(path = %file.display(), "thumbnail written");
                Ok(Some(file))
            }
            Err(err) => {
                warn!(id = %id, error = %err, "thumbnail write failed; serving no thumbnail");
                Ok(None)
            }
        }
    }

    // Encode in memory, write a sibling temp file, then rename over the
    // destination: a reader never observes a partial thumbnail.
    fn write_jpeg(&self, file: &Path, image: &DecodedImage) -> Result<(), Error> {
        let rgb = image::DynamicImage::ImageRgba8(image.pixels().clone()).to_rgb8();
        let mut encoded = Vec::new();
        let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut encoded), self.quality);
        rgb.write_with_encoder(encoder)?;

        let tmp = file.with_extension("jpg.tmp");
        let mut out = File::create(&tmp)?;
        out.write_all(&encoded)?;
        out.sync_all()?;
        drop(out);
        fs::rename(&tmp, file)?;
        Ok(())
    }

    /// Remove every generated thumbnail and re-initialize the cache root.
    pub fn clear(&self) -> Result<(), Error> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        self.ensure_root()
    }
}
