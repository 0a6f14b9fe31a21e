use crate::error::Error;

/// First-pass result: the output size fitting the requested bounds with the
/// source aspect ratio preserved, plus the downsampling factor for the
/// second pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalePlan {
    pub target_width: u32,
    pub target_height: u32,
    /// Decode-time hint; 1 means full-resolution decode. Conservative: the
    /// decode may come out slightly larger than the target, never smaller.
    pub sample_factor: u32,
}

/// Compute the final dimensions and sample factor for a load request.
///
/// With no requested bounds the caller-supplied default box is used. A single
/// requested dimension derives the other from the source aspect ratio. When
/// the source and the requested box disagree on landscape-vs-portrait the box
/// is swapped, so a later orientation change can reuse the decoded image at
/// full quality.
pub fn plan(
    requested_width: Option<u32>,
    requested_height: Option<u32>,
    source_width: u32,
    source_height: u32,
    default_bounds: (u32, u32),
) -> Result<ScalePlan, Error> {
    if source_width == 0 || source_height == 0 {
        return Err(Error::InvalidSourceDimensions(source_width, source_height));
    }
    let source_ratio = source_width as f32 / source_height as f32;

    let (mut target_width, mut target_height) = match (requested_width, requested_height) {
        (None, None) => default_bounds,
        (Some(width), None) => (width, (width as f32 / source_ratio) as u32),
        (None, Some(height)) => ((height as f32 * source_ratio) as u32, height),
        (Some(width), Some(height)) => (width, height),
    };
    target_width = target_width.max(1);
    target_height = target_height.max(1);

    let mut requested_ratio = target_width as f32 / target_height as f32;
    if (source_ratio > 1.0 && requested_ratio < 1.0)
        || (source_ratio < 1.0 && requested_ratio > 1.0)
    {
        std::mem::swap(&mut target_width, &mut target_height);
        requested_ratio = 1.0 / requested_ratio;
    }

    // Fit entirely inside the (possibly swapped) box, ratio preserved.
    if requested_ratio <= source_ratio {
        target_height = ((target_width as f32 / source_ratio) as u32).max(1);
    } else {
        target_width = ((target_height as f32 * source_ratio) as u32).max(1);
    }

    let sample_factor = if source_width > target_width {
        source_width / target_width
    } else {
        1
    };

    Ok(ScalePlan {
        target_width,
        target_height,
        sample_factor,
    })
}
