use std::fmt;
use std::io::{Cursor, Read};
use std::sync::Arc;

use anyhow::anyhow;
use fast_image_resize as fir;
use image::{ImageFormat, ImageReader, RgbaImage};
use jpeg_decoder::{Decoder as JpegDecoder, PixelFormat};
use serde::Deserialize;
use tracing::debug;

use crate::error::Error;
use crate::scale::ScalePlan;
use crate::source::PatientReader;

/// Color configuration for decoded images. Screen-depth output keeps memory
/// and encode sizes down at the cost of color depth; quantization is dithered
/// so gradients survive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColorDepth {
    /// Full 32-bit color.
    Rgba8888,
    /// Display depth: channels quantized to 5/6/5 levels with ordered dithering.
    #[default]
    Rgb565,
}

/// A decoded, scaled image. Shared behind `Arc` and never mutated: the same
/// instance may serve a later lower-resolution request for the identifier.
pub struct DecodedImage {
    pixels: RgbaImage,
    depth: ColorDepth,
}

impl DecodedImage {
    pub fn new(pixels: RgbaImage, depth: ColorDepth) -> Self {
        Self { pixels, depth }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn depth(&self) -> ColorDepth {
        self.depth
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Whether this image can stand in for a load aiming at `plan`. Both
    /// dimensions must reach the target within a one-pixel tolerance;
    /// anything smaller is stale and must be re-decoded.
    pub fn covers(&self, plan: &ScalePlan) -> bool {
        self.width() + 1 >= plan.target_width && self.height() + 1 >= plan.target_height
    }
}

impl fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedImage")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("depth", &self.depth)
            .finish()
    }
}

/// First pass over raw bytes: image dimensions without decoding any pixels.
pub fn probe_dimensions(bytes: &[u8]) -> Result<(u32, u32), Error> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    Ok(reader.into_dimensions()?)
}

/// Second pass: produce the pixel buffer for `plan`.
///
/// A reusable image short-circuits the stream entirely: it is scaled down if
/// larger than the plan, otherwise returned unchanged. A stream decode honors
/// the plan's sample factor, then resizes precisely to the target if the raw
/// decode still exceeds it. No upscaling ever happens.
pub fn second_pass(
    stream: Option<Box<dyn Read + Send>>,
    plan: &ScalePlan,
    depth: ColorDepth,
    reusable: Option<Arc<DecodedImage>>,
) -> Result<Arc<DecodedImage>, Error> {
    if let Some(cached) = reusable {
        if cached.width() > plan.target_width || cached.height() > plan.target_height {
            let resized = resize_exact(cached.pixels(), plan.target_width, plan.target_height)?;
            return Ok(Arc::new(DecodedImage::new(resized, cached.depth())));
        }
        return Ok(cached);
    }

    let Some(stream) = stream else {
        return Err(Error::Decode(anyhow!(
            "no byte stream and no reusable image"
        )));
    };
    let mut bytes = Vec::new();
    PatientReader::new(stream).read_to_end(&mut bytes)?;
    decode_bytes(&bytes, plan, depth)
}

fn decode_bytes(bytes: &[u8], plan: &ScalePlan, depth: ColorDepth) -> Result<Arc<DecodedImage>, Error> {
    let format = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .format();

    let mut rgba = match format {
        Some(ImageFormat::Jpeg) => match decode_jpeg_scaled(bytes, plan) {
            Ok(img) => img,
            Err(err) => {
                debug!("scaled JPEG decode failed: {err:#}; falling back to full decode");
                full_decode(bytes)?
            }
        },
        _ => {
            let img = full_decode(bytes)?;
            if plan.sample_factor > 1 {
                subsample(&img, plan.sample_factor)
            } else {
                img
            }
        }
    };

    if rgba.width() > plan.target_width || rgba.height() > plan.target_height {
        rgba = resize_exact(&rgba, plan.target_width, plan.target_height)?;
    }
    if depth == ColorDepth::Rgb565 {
        quantize_rgb565(&mut rgba);
    }
    Ok(Arc::new(DecodedImage::new(rgba, depth)))
}

fn full_decode(bytes: &[u8]) -> Result<RgbaImage, Error> {
    Ok(image::load_from_memory(bytes)?.to_rgba8())
}

/// JPEGs decode directly at reduced resolution, so the full-size pixel buffer
/// is never allocated. Any unsupported stream falls back to a full decode.
fn decode_jpeg_scaled(bytes: &[u8], plan: &ScalePlan) -> anyhow::Result<RgbaImage> {
    use jpeg_decoder::Error as JpegError;

    let mut decoder = JpegDecoder::new(Cursor::new(bytes));
    let request_w = plan.target_width.clamp(1, u16::MAX as u32) as u16;
    let request_h = plan.target_height.clamp(1, u16::MAX as u32) as u16;
    decoder.scale(request_w, request_h).map_err(|err| match err {
        JpegError::Unsupported(feature) => anyhow!("unsupported JPEG feature: {feature:?}"),
        other => anyhow!(other),
    })?;
    let pixels = decoder.decode().map_err(|err| match err {
        JpegError::Unsupported(feature) => anyhow!("unsupported JPEG feature: {feature:?}"),
        other => anyhow!(other),
    })?;
    let info = decoder
        .info()
        .ok_or_else(|| anyhow!("missing image info after JPEG decode"))?;
    let width = u32::from(info.width);
    let height = u32::from(info.height);

    let rgba = match info.pixel_format {
        PixelFormat::RGB24 => {
            let mut rgba = Vec::with_capacity(pixels.len() / 3 * 4);
            for chunk in pixels.chunks_exact(3) {
                rgba.extend_from_slice(&[chunk[0], chunk[1], chunk[2], 255]);
            }
            rgba
        }
        PixelFormat::L8 => {
            let mut rgba = Vec::with_capacity(pixels.len() * 4);
            for &v in &pixels {
                rgba.extend_from_slice(&[v, v, v, 255]);
            }
            rgba
        }
        other => {
            anyhow::bail!("pixel format {other:?} is not handled by the scaled decoder");
        }
    };

    RgbaImage::from_raw(width, height, rgba)
        .ok_or_else(|| anyhow!("JPEG decode produced a malformed buffer"))
}

/// Cheap nearest-pixel downsample: keeps every `factor`-th pixel. Applied
/// before the precise resize so the retained intermediate stays small.
fn subsample(img: &RgbaImage, factor: u32) -> RgbaImage {
    let width = (img.width() / factor).max(1);
    let height = (img.height() / factor).max(1);
    RgbaImage::from_fn(width, height, |x, y| *img.get_pixel(x * factor, y * factor))
}

fn resize_exact(source: &RgbaImage, target_w: u32, target_h: u32) -> Result<RgbaImage, Error> {
    if source.width() == target_w && source.height() == target_h {
        return Ok(source.clone());
    }

    let src_view = fir::images::ImageRef::new(
        source.width(),
        source.height(),
        source.as_raw(),
        fir::PixelType::U8x4,
    )
    .map_err(|err| Error::Decode(err.into()))?;
    let mut dst_image = fir::images::Image::new(target_w, target_h, fir::PixelType::U8x4);
    let options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::CatmullRom));
    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&src_view, &mut dst_image, Some(&options))
        .map_err(|err| Error::Decode(err.into()))?;
    let buffer = dst_image.into_vec();
    RgbaImage::from_raw(target_w, target_h, buffer)
        .ok_or_else(|| Error::Decode(anyhow!("failed to construct resized RGBA image")))
}

const DITHER_MATRIX: [[u8; 4]; 4] = [[0, 8, 2, 10], [12, 4, 14, 6], [3, 11, 1, 9], [15, 7, 13, 5]];

/// Quantize channels to 5/6/5 levels in place, with an ordered threshold so
/// smooth gradients do not band.
fn quantize_rgb565(img: &mut RgbaImage) {
    for (x, y, pixel) in img.enumerate_pixels_mut() {
        let threshold =
            f32::from(DITHER_MATRIX[(y % 4) as usize][(x % 4) as usize]) / 16.0 - 0.5;
        pixel[0] = quantize_channel(pixel[0], 31, threshold);
        pixel[1] = quantize_channel(pixel[1], 63, threshold);
        pixel[2] = quantize_channel(pixel[2], 31, threshold);
    }
}

fn quantize_channel(value: u8, levels: u8, threshold: f32) -> u8 {
    let scaled = f32::from(value) / 255.0 * f32::from(levels) + threshold;
    let level = scaled.round().clamp(0.0, f32::from(levels));
    (level * 255.0 / f32::from(levels)).round() as u8
}
