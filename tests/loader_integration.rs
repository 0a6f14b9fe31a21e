use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rust_photo_picker::cache::CacheService;
use rust_photo_picker::decode::ColorDepth;
use rust_photo_picker::error::Error;
use rust_photo_picker::loader::{ImageLoader, LoadRequest};
use rust_photo_picker::source::{FileImageSource, ImageId, ImageSource};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

/// Counts how often the pipeline goes back to the byte source; cache hits
/// must not show up here.
struct CountingSource {
    opens: Arc<AtomicUsize>,
}

impl ImageSource for CountingSource {
    fn open(&self, id: &ImageId) -> Result<Box<dyn Read + Send>, Error> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        FileImageSource.open(id)
    }
}

fn write_png(path: &Path, width: u32, height: u32) {
    let img = image::RgbaImage::from_fn(width, height, |x, y| {
        image::Rgba([(x % 256) as u8, (y % 256) as u8, 0, 255])
    });
    img.save(path).unwrap();
}

fn loader_for(caches: Arc<CacheService>) -> (ImageLoader, Arc<AtomicUsize>) {
    let opens = Arc::new(AtomicUsize::new(0));
    let source = CountingSource {
        opens: Arc::clone(&opens),
    };
    let loader = ImageLoader::new(Arc::new(source), caches, (1280, 800), ColorDepth::Rgba8888);
    (loader, opens)
}

#[test]
fn shrinking_requests_reuse_the_cached_image() {
    let tmp = tempdir().unwrap();
    let photo = tmp.path().join("photo.png");
    write_png(&photo, 300, 200);
    let id = ImageId::new(photo.to_string_lossy().to_string());

    let caches = Arc::new(CacheService::with_defaults());
    let (loader, opens) = loader_for(Arc::clone(&caches));

    let first = loader.load(&id, Some(100), Some(100)).unwrap().unwrap();
    assert_eq!((first.width(), first.height()), (100, 66));
    // One source read serves both the bounds probe and the decode.
    assert_eq!(opens.load(Ordering::SeqCst), 1);

    let second = loader.load(&id, Some(50), Some(50)).unwrap().unwrap();
    assert_eq!((second.width(), second.height()), (50, 33));
    // Served from the bitmap cache; the source was not touched again.
    assert_eq!(opens.load(Ordering::SeqCst), 1);

    // The cache keeps the larger instance, not the shrunk copy.
    let cached = caches.bitmaps().get(&id).unwrap();
    assert_eq!((cached.width(), cached.height()), (100, 66));
}

#[test]
fn growing_requests_trigger_a_fresh_decode() {
    let tmp = tempdir().unwrap();
    let photo = tmp.path().join("photo.png");
    write_png(&photo, 300, 200);
    let id = ImageId::new(photo.to_string_lossy().to_string());

    let caches = Arc::new(CacheService::with_defaults());
    let (loader, opens) = loader_for(Arc::clone(&caches));

    loader.load(&id, Some(100), Some(100)).unwrap().unwrap();
    assert_eq!(opens.load(Ordering::SeqCst), 1);

    let larger = loader.load(&id, Some(200), Some(200)).unwrap().unwrap();
    assert_eq!((larger.width(), larger.height()), (200, 133));
    // The cached 100x66 image is too small, so the source is read again —
    // but the dimension cache spares the bounds probe (still one new open).
    assert_eq!(opens.load(Ordering::SeqCst), 2);

    let cached = caches.bitmaps().get(&id).unwrap();
    assert_eq!((cached.width(), cached.height()), (200, 133));
}

#[test]
fn concurrent_loads_of_one_identifier_decode_once() {
    let tmp = tempdir().unwrap();
    let photo = tmp.path().join("photo.png");
    write_png(&photo, 300, 200);
    let id = ImageId::new(photo.to_string_lossy().to_string());

    let caches = Arc::new(CacheService::with_defaults());
    let (loader, opens) = loader_for(caches);
    let loader = Arc::new(loader);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let loader = Arc::clone(&loader);
        let id = id.clone();
        handles.push(std::thread::spawn(move || {
            loader.load(&id, Some(100), Some(100)).unwrap().unwrap()
        }));
    }
    for handle in handles {
        let img = handle.join().unwrap();
        assert_eq!((img.width(), img.height()), (100, 66));
    }
    assert_eq!(opens.load(Ordering::SeqCst), 1);
}

#[test]
fn unreadable_source_yields_no_image() {
    let caches = Arc::new(CacheService::with_defaults());
    let (loader, _) = loader_for(caches);
    let id = ImageId::new("/definitely/not/there.png");
    assert!(loader.load(&id, Some(64), Some(64)).unwrap().is_none());
}

#[test]
fn unsupported_scheme_propagates() {
    let caches = Arc::new(CacheService::with_defaults());
    let (loader, _) = loader_for(caches);
    let id = ImageId::new("content://media/external/images/17");
    let err = loader.load(&id, Some(64), Some(64)).unwrap_err();
    assert!(matches!(err, Error::UnsupportedIdentifier(_)));
}

#[test]
fn invalid_cached_dimensions_propagate() {
    let caches = Arc::new(CacheService::with_defaults());
    let (loader, _) = loader_for(Arc::clone(&caches));
    let id = ImageId::new("/anything.png");
    caches.dimensions().put(id.clone(), (100, 0));
    let err = loader.load(&id, Some(64), Some(64)).unwrap_err();
    assert!(matches!(err, Error::InvalidSourceDimensions(100, 0)));
}

#[test]
fn cancelled_request_skips_the_decode() {
    let caches = Arc::new(CacheService::with_defaults());
    let (loader, opens) = loader_for(Arc::clone(&caches));
    let id = ImageId::new("/never/read.png");
    caches.dimensions().put(id.clone(), (300, 200));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let request = LoadRequest {
        width: Some(100),
        height: Some(100),
        cancel: Some(cancel),
        ..LoadRequest::default()
    };
    assert!(loader.load_with(&id, request).unwrap().is_none());
    assert_eq!(opens.load(Ordering::SeqCst), 0);
}
