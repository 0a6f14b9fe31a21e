use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, ensure};
use serde::Deserialize;

use crate::decode::ColorDepth;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Configuration {
    /// Target box when a load request carries no dimensions, e.g. the
    /// display size of the embedding application.
    pub default_bounds: [u32; 2],
    /// Number of decoded images kept in the in-memory LRU cache.
    pub bitmap_cache_capacity: usize,
    /// Optional bound for the dimension cache. Absent means unbounded;
    /// entries are tiny, but long-lived processes over huge collections may
    /// want a cap.
    pub dimension_cache_capacity: Option<usize>,
    /// Color depth of decoded images.
    pub color_depth: ColorDepth,
    /// Edge length of generated thumbnails, in pixels.
    pub thumbnail_size: u32,
    /// JPEG quality for persisted thumbnails.
    pub thumbnail_quality: u8,
    /// Age beyond which a persisted thumbnail is regenerated.
    #[serde(with = "humantime_serde")]
    pub thumbnail_ttl: Duration,
    /// Root directory for persisted thumbnails.
    pub thumbnail_cache_path: PathBuf,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            self.default_bounds.iter().all(|dim| *dim > 0),
            "default-bounds must be positive"
        );
        ensure!(
            self.bitmap_cache_capacity > 0,
            "bitmap-cache-capacity must be greater than zero"
        );
        if let Some(capacity) = self.dimension_cache_capacity {
            ensure!(
                capacity > 0,
                "dimension-cache-capacity must be greater than zero when set"
            );
        }
        ensure!(
            self.thumbnail_size > 0,
            "thumbnail-size must be greater than zero"
        );
        ensure!(
            (1..=100).contains(&self.thumbnail_quality),
            "thumbnail-quality must be within 1..=100"
        );
        ensure!(
            self.thumbnail_ttl > Duration::ZERO,
            "thumbnail-ttl must be positive"
        );
        Ok(self)
    }

    pub fn default_bounds(&self) -> (u32, u32) {
        (self.default_bounds[0], self.default_bounds[1])
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            default_bounds: [1280, 800],
            bitmap_cache_capacity: 500,
            dimension_cache_capacity: None,
            color_depth: ColorDepth::Rgb565,
            thumbnail_size: 128,
            thumbnail_quality: 70,
            thumbnail_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            thumbnail_cache_path: PathBuf::from("thumbnails"),
        }
    }
}
