use std::io::{Cursor, Read};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::CacheService;
use crate::decode::{self, ColorDepth, DecodedImage};
use crate::error::Error;
use crate::scale;
use crate::source::{ImageId, ImageSource, PatientReader};

/// Options for a single load. The plain `ImageLoader::load` covers the
/// common case; this struct carries the long tail.
#[derive(Debug, Clone)]
pub struct LoadRequest {
    /// Maximum width of the result; the image is scaled down, ratio
    /// preserved, to fit both bounds. Absent bounds fall back to the
    /// loader's default box.
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Overrides the loader's default color depth.
    pub depth: Option<ColorDepth>,
    /// Skip storing the result. Callers expecting a very large bitmap opt
    /// out so a single oversized entry does not sit in the cache.
    pub cache_result: bool,
    /// Checked between the planning and decoding stages; a cancelled
    /// request yields no image.
    pub cancel: Option<CancellationToken>,
}

impl Default for LoadRequest {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            depth: None,
            cache_result: true,
            cancel: None,
        }
    }
}

impl LoadRequest {
    pub fn bounded(width: u32, height: u32) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            ..Self::default()
        }
    }
}

/// Two-pass scaled-image loader.
///
/// The first pass resolves the source's true dimensions (dimension cache,
/// else a bounds-only probe) and plans the output size; the second pass
/// decodes only when no cached image covers the plan. Loads of the same
/// identifier are serialized so a stale smaller decode can never overwrite
/// a fresher larger one.
pub struct ImageLoader {
    source: Arc<dyn ImageSource>,
    caches: Arc<CacheService>,
    default_bounds: (u32, u32),
    depth: ColorDepth,
}

impl ImageLoader {
    pub fn new(
        source: Arc<dyn ImageSource>,
        caches: Arc<CacheService>,
        default_bounds: (u32, u32),
        depth: ColorDepth,
    ) -> Self {
        Self {
            source,
            caches,
            default_bounds,
            depth,
        }
    }

    pub fn caches(&self) -> &CacheService {
        &self.caches
    }

    /// Load the image named by `id`, scaled down to fit the given bounds.
    ///
    /// Returns `Ok(None)` when no image could be produced (unreadable
    /// source, failed decode, cancellation); the caller shows a placeholder.
    /// Precondition violations (unsupported identifier, invalid source
    /// dimensions) propagate as errors.
    pub fn load(
        &self,
        id: &ImageId,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Result<Option<Arc<DecodedImage>>, Error> {
        self.load_with(
            id,
            LoadRequest {
                width,
                height,
                ..LoadRequest::default()
            },
        )
    }

    pub fn load_with(
        &self,
        id: &ImageId,
        request: LoadRequest,
    ) -> Result<Option<Arc<DecodedImage>>, Error> {
        let lock = self.caches.key_lock(id);
        let result = {
            let _guard = lock.lock().expect("image load lock poisoned");
            self.run_pipeline(id, &request)
        };
        drop(lock);
        self.caches.release_key(id);

        match result {
            Ok(image) => Ok(image),
            Err(err) if err.is_precondition() => Err(err),
            Err(err) => {
                warn!(id = %id, error = %err, "image load failed; serving no image");
                Ok(None)
            }
        }
    }

    fn run_pipeline(
        &self,
        id: &ImageId,
        request: &LoadRequest,
    ) -> Result<Option<Arc<DecodedImage>>, Error> {
        let mut bytes: Option<Vec<u8>> = None;
        let dimensions = match self.caches.dimensions().get(id) {
            Some(dimensions) => dimensions,
            None => {
                let data = self.read_source(id)?;
                let dimensions = decode::probe_dimensions(&data)?;
                debug!(id = %id, width = dimensions.0, height = dimensions.1, "probed source dimensions");
                bytes = Some(data);
                dimensions
            }
        };
        // Refresh on every load so a bounded dimension cache keeps hot entries.
        self.caches.dimensions().put(id.clone(), dimensions);

        let plan = scale::plan(
            request.width,
            request.height,
            dimensions.0,
            dimensions.1,
            self.default_bounds,
        )?;
        debug!(id = %id, ?plan, "planned scaled load");

        if let Some(cancel) = &request.cancel {
            if cancel.is_cancelled() {
                debug!(id = %id, "load cancelled before decode");
                return Ok(None);
            }
        }

        let depth = request.depth.unwrap_or(self.depth);
        let reusable = self
            .caches
            .bitmaps()
            .get(id)
            .filter(|cached| cached.covers(&plan));
        let cache_hit = reusable.is_some();
        if cache_hit {
            debug!(id = %id, "reusing cached image");
        }

        let image = if cache_hit {
            decode::second_pass(None, &plan, depth, reusable)?
        } else {
            let data = match bytes.take() {
                Some(data) => data,
                None => self.read_source(id)?,
            };
            decode::second_pass(Some(Box::new(Cursor::new(data))), &plan, depth, None)?
        };

        // A valid cache hit keeps the larger cached instance; only fresh
        // decodes replace the entry.
        if request.cache_result && !cache_hit {
            self.caches.bitmaps().put(id.clone(), Arc::clone(&image));
        }
        Ok(Some(image))
    }

    fn read_source(&self, id: &ImageId) -> Result<Vec<u8>, Error> {
        let stream = self.source.open(id)?;
        let mut bytes = Vec::new();
        PatientReader::new(stream).read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}
