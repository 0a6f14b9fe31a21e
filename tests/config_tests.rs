use std::time::Duration;

use rust_photo_picker::config::Configuration;
use rust_photo_picker::decode::ColorDepth;
use tempfile::tempdir;

#[test]
fn default_configuration_is_valid() {
    let cfg = Configuration::default().validated().unwrap();
    assert_eq!(cfg.default_bounds(), (1280, 800));
    assert_eq!(cfg.bitmap_cache_capacity, 500);
    assert_eq!(cfg.dimension_cache_capacity, None);
    assert_eq!(cfg.color_depth, ColorDepth::Rgb565);
    assert_eq!(cfg.thumbnail_size, 128);
    assert_eq!(cfg.thumbnail_quality, 70);
    assert_eq!(cfg.thumbnail_ttl, Duration::from_secs(7 * 24 * 60 * 60));
}

#[test]
fn yaml_overrides_are_applied() {
    let yaml = r#"
default-bounds: [640, 480]
bitmap-cache-capacity: 32
dimension-cache-capacity: 1000
color-depth: rgba8888
thumbnail-size: 256
thumbnail-quality: 90
thumbnail-ttl: 2days
thumbnail-cache-path: /tmp/picker-cache
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    let cfg = cfg.validated().unwrap();
    assert_eq!(cfg.default_bounds(), (640, 480));
    assert_eq!(cfg.bitmap_cache_capacity, 32);
    assert_eq!(cfg.dimension_cache_capacity, Some(1000));
    assert_eq!(cfg.color_depth, ColorDepth::Rgba8888);
    assert_eq!(cfg.thumbnail_size, 256);
    assert_eq!(cfg.thumbnail_quality, 90);
    assert_eq!(cfg.thumbnail_ttl, Duration::from_secs(2 * 24 * 60 * 60));
    assert_eq!(
        cfg.thumbnail_cache_path,
        std::path::PathBuf::from("/tmp/picker-cache")
    );
}

#[test]
fn partial_yaml_falls_back_to_defaults() {
    let cfg: Configuration = serde_yaml::from_str("thumbnail-size: 96\n").unwrap();
    assert_eq!(cfg.thumbnail_size, 96);
    assert_eq!(cfg.bitmap_cache_capacity, 500);
    assert_eq!(cfg.thumbnail_quality, 70);
}

#[test]
fn from_yaml_file_round_trips() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("picker.yaml");
    std::fs::write(&path, "thumbnail-quality: 80\nthumbnail-ttl: 12hours\n").unwrap();
    let cfg = Configuration::from_yaml_file(&path).unwrap().validated().unwrap();
    assert_eq!(cfg.thumbnail_quality, 80);
    assert_eq!(cfg.thumbnail_ttl, Duration::from_secs(12 * 60 * 60));
}

#[test]
fn invalid_values_fail_validation() {
    let zero_capacity = Configuration {
        bitmap_cache_capacity: 0,
        ..Configuration::default()
    };
    assert!(zero_capacity.validated().is_err());

    let silly_quality = Configuration {
        thumbnail_quality: 0,
        ..Configuration::default()
    };
    assert!(silly_quality.validated().is_err());

    let zero_ttl = Configuration {
        thumbnail_ttl: Duration::ZERO,
        ..Configuration::default()
    };
    assert!(zero_ttl.validated().is_err());

    let flat_bounds = Configuration {
        default_bounds: [0, 800],
        ..Configuration::default()
    };
    assert!(flat_bounds.validated().is_err());

    let zero_dimension_bound = Configuration {
        dimension_cache_capacity: Some(0),
        ..Configuration::default()
    };
    assert!(zero_dimension_bound.validated().is_err());
}
