use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::error::Error;

/// Opaque, stable identifier for a source image. Used as the cache key
/// everywhere; must stay stable across process restarts for the dimension
/// cache to remain valid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(String);

impl ImageId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Trailing path segment, used to name persisted thumbnails. Identifiers
    /// from different namespaces can share a fragment, so collisions are
    /// possible; callers that mix namespaces should use separate cache roots.
    pub fn fragment(&self) -> &str {
        let trimmed = self.0.trim_end_matches('/');
        trimmed.rsplit('/').next().unwrap_or(trimmed)
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ImageId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for ImageId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// Byte-stream provider keyed by identifier. Supplied by the embedding
/// application's content-access layer; the pipeline only ever asks it to
/// open a fresh stream.
pub trait ImageSource: Send + Sync {
    fn open(&self, id: &ImageId) -> Result<Box<dyn Read + Send>, Error>;
}

/// Filesystem-backed source. Accepts `file://` identifiers and bare paths;
/// any other scheme fails fast with `UnsupportedIdentifier`.
#[derive(Debug, Default)]
pub struct FileImageSource;

impl FileImageSource {
    fn resolve<'a>(&self, id: &'a ImageId) -> Result<&'a Path, Error> {
        let raw = id.as_str();
        if let Some(stripped) = raw.strip_prefix("file://") {
            return Ok(Path::new(stripped));
        }
        if raw.contains("://") {
            return Err(Error::UnsupportedIdentifier(raw.to_owned()));
        }
        Ok(Path::new(raw))
    }
}

impl ImageSource for FileImageSource {
    fn open(&self, id: &ImageId) -> Result<Box<dyn Read + Send>, Error> {
        let path = self.resolve(id)?;
        Ok(Box::new(File::open(path)?))
    }
}

/// EOF is only accepted after this many consecutive zero-length reads; a
/// single one is treated as a hiccup and retried.
const ZERO_READ_TOLERANCE: u32 = 1;

/// `Read` adapter that shields decoders from streams with spurious empty
/// reads: `Interrupted` errors are retried, and a single zero-length read is
/// not end-of-stream.
pub struct PatientReader<R> {
    inner: R,
    zero_reads: u32,
}

impl<R: Read> PatientReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            zero_reads: 0,
        }
    }
}

impl<R: Read> Read for PatientReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            match self.inner.read(buf) {
                Ok(0) => {
                    self.zero_reads += 1;
                    if self.zero_reads > ZERO_READ_TOLERANCE {
                        return Ok(0);
                    }
                }
                Ok(n) => {
                    self.zero_reads = 0;
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}
