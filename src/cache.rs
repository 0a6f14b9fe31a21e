use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;

use crate::decode::DecodedImage;
use crate::source::ImageId;

/// Default number of decoded images kept in memory.
pub const DEFAULT_BITMAP_CAPACITY: usize = 500;

/// Bounded LRU cache of the most recently produced decoded images. A `get`
/// promotes the entry; inserting past capacity evicts the least recently
/// touched one.
pub struct BitmapCache {
    entries: Mutex<LruCache<ImageId, Arc<DecodedImage>>>,
}

impl BitmapCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(
            NonZeroUsize::new(DEFAULT_BITMAP_CAPACITY).expect("default capacity is non-zero"),
        );
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, id: &ImageId) -> Option<Arc<DecodedImage>> {
        self.entries
            .lock()
            .expect("bitmap cache poisoned")
            .get(id)
            .cloned()
    }

    /// Insert or replace; either way the entry becomes most recently used.
    pub fn put(&self, id: ImageId, image: Arc<DecodedImage>) {
        self.entries
            .lock()
            .expect("bitmap cache poisoned")
            .put(id, image);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("bitmap cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().expect("bitmap cache poisoned").clear();
    }
}

/// Remembers the true pixel size of every probed source so repeat loads skip
/// the bounds pass. Unbounded by default (entries are two integers); a bound
/// turns it into the same LRU policy as the bitmap cache.
pub struct DimensionCache {
    entries: Mutex<LruCache<ImageId, (u32, u32)>>,
}

impl DimensionCache {
    pub fn new(capacity: Option<usize>) -> Self {
        let entries = match capacity.and_then(NonZeroUsize::new) {
            Some(capacity) => LruCache::new(capacity),
            None => LruCache::unbounded(),
        };
        Self {
            entries: Mutex::new(entries),
        }
    }

    pub fn get(&self, id: &ImageId) -> Option<(u32, u32)> {
        self.entries
            .lock()
            .expect("dimension cache poisoned")
            .get(id)
            .copied()
    }

    pub fn put(&self, id: ImageId, dimensions: (u32, u32)) {
        self.entries
            .lock()
            .expect("dimension cache poisoned")
            .put(id, dimensions);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("dimension cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().expect("dimension cache poisoned").clear();
    }
}

/// Process-wide cache handle, constructed once at startup and passed to every
/// component that needs it. Also owns the per-identifier locks that keep two
/// decodes for one identifier from racing on the bitmap cache.
pub struct CacheService {
    bitmaps: BitmapCache,
    dimensions: DimensionCache,
    in_flight: Mutex<HashMap<ImageId, Arc<Mutex<()>>>>,
}

impl CacheService {
    pub fn new(bitmap_capacity: usize, dimension_capacity: Option<usize>) -> Self {
        Self {
            bitmaps: BitmapCache::new(bitmap_capacity),
            dimensions: DimensionCache::new(dimension_capacity),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_BITMAP_CAPACITY, None)
    }

    pub fn bitmaps(&self) -> &BitmapCache {
        &self.bitmaps
    }

    pub fn dimensions(&self) -> &DimensionCache {
        &self.dimensions
    }

    /// Per-identifier guard. Holding the lock serializes the whole
    /// probe-plan-decode-store pipeline for that identifier.
    pub fn key_lock(&self, id: &ImageId) -> Arc<Mutex<()>> {
        let mut locks = self.in_flight.lock().expect("in-flight map poisoned");
        Arc::clone(locks.entry(id.clone()).or_default())
    }

    /// Prune the guard for `id` if nobody holds it anymore.
    pub fn release_key(&self, id: &ImageId) {
        let mut locks = self.in_flight.lock().expect("in-flight map poisoned");
        if let Some(lock) = locks.get(id) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(id);
            }
        }
    }

    pub fn clear(&self) {
        self.bitmaps.clear();
        self.dimensions.clear();
    }
}
