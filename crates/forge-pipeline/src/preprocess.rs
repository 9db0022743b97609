//! Image preprocessing before reconstruction.
//!
//! The reconstruction model expects one object, centered, filling most of a
//! square white frame. [`preprocess`] gets any photo or preview there:
//!
//! 1. optional background removal (the image gains an alpha channel)
//! 2. tight crop around the content, padded and centered on a square canvas
//! 3. optional tiled contrast equalization of the luminance
//! 4. Lanczos3 resize to the target edge
//! 5. flatten onto white

use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::oracle::BackgroundRemover;

/// Alpha above which a pixel counts as content.
pub const ALPHA_THRESHOLD: u8 = 10;

/// Luminance below which an opaque pixel counts as content.
pub const LUMINANCE_THRESHOLD: u8 = 250;

/// Histogram clip limit of the contrast equalization.
pub const CLAHE_CLIP_LIMIT: f32 = 2.0;

/// Tiles per side of the contrast equalization grid.
pub const CLAHE_GRID: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessParams {
    pub remove_background: bool,
    pub normalize_lighting: bool,
    /// Output edge in pixels.
    pub target_size: u32,
    /// Margin around the content, as a fraction of its larger side.
    pub padding: f32,
}

impl Default for PreprocessParams {
    fn default() -> Self {
        Self {
            remove_background: true,
            normalize_lighting: true,
            target_size: 512,
            padding: 0.1,
        }
    }
}

impl PreprocessParams {
    pub fn new(remove_background: bool, target_size: u32) -> Self {
        Self {
            remove_background,
            target_size,
            ..Self::default()
        }
    }
}

/// Pixel rectangle, `x..x + width` by `y..y + height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentBounds {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Run the full preprocessing chain; the result is `target_size` square RGB.
pub fn preprocess(
    image: &DynamicImage,
    params: &PreprocessParams,
    remover: Option<&dyn BackgroundRemover>,
) -> PipelineResult<RgbImage> {
    if params.target_size == 0 {
        return Err(PipelineError::image("target size must be positive"));
    }
    let span = tracing::info_span!(
        "preprocess",
        width = image.width(),
        height = image.height(),
        target = params.target_size
    );
    let _entered = span.enter();

    let rgb = image.to_rgb8();
    let (working, transparent) = match (params.remove_background, remover) {
        (true, Some(remover)) => {
            let cutout = remover.remove_background(&rgb)?;
            if cutout.dimensions() != rgb.dimensions() {
                return Err(PipelineError::image(format!(
                    "background removal returned {}x{}, expected {}x{}",
                    cutout.width(),
                    cutout.height(),
                    rgb.width(),
                    rgb.height()
                )));
            }
            (cutout, true)
        }
        (true, None) => {
            warn!("No background remover configured, keeping the background");
            (DynamicImage::ImageRgb8(rgb).into_rgba8(), false)
        }
        (false, _) => (DynamicImage::ImageRgb8(rgb).into_rgba8(), false),
    };

    let mut framed = match find_content_bounds(&working, transparent) {
        Some(bounds) => {
            debug!(?bounds, "Content found");
            center_on_square(&working, bounds, params.padding, transparent)
        }
        None => {
            debug!("No content found, keeping the full frame");
            working
        }
    };

    if params.normalize_lighting {
        equalize_luminance(&mut framed, CLAHE_CLIP_LIMIT, CLAHE_GRID);
    }

    let resized = imageops::resize(
        &framed,
        params.target_size,
        params.target_size,
        FilterType::Lanczos3,
    );
    info!(size = params.target_size, "Image preprocessed");
    Ok(flatten_on_white(&resized))
}

/// Rec. 601 luma, rounded.
pub(crate) fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32 + 500) / 1000) as u8
}

/// Tight box around the content: alpha above [`ALPHA_THRESHOLD`] for cutouts,
/// luminance below [`LUMINANCE_THRESHOLD`] for opaque images on white.
pub fn find_content_bounds(image: &RgbaImage, transparent: bool) -> Option<ContentBounds> {
    let is_content = |p: &Rgba<u8>| {
        if transparent {
            p[3] > ALPHA_THRESHOLD
        } else {
            luma(p[0], p[1], p[2]) < LUMINANCE_THRESHOLD
        }
    };

    let mut min = (u32::MAX, u32::MAX);
    let mut max = (0u32, 0u32);
    let mut found = false;
    for (x, y, p) in image.enumerate_pixels() {
        if is_content(p) {
            found = true;
            min = (min.0.min(x), min.1.min(y));
            max = (max.0.max(x), max.1.max(y));
        }
    }

    found.then(|| ContentBounds {
        x: min.0,
        y: min.1,
        width: max.0 - min.0 + 1,
        height: max.1 - min.1 + 1,
    })
}

/// Crop `bounds` plus padding and center it on a square canvas.
///
/// The canvas is transparent for cutouts and white otherwise. Padding is
/// clamped to the source image.
pub fn center_on_square(
    image: &RgbaImage,
    bounds: ContentBounds,
    padding: f32,
    transparent: bool,
) -> RgbaImage {
    let pad = (bounds.width.max(bounds.height) as f32 * padding.max(0.0)) as u32;
    let x0 = bounds.x.saturating_sub(pad);
    let y0 = bounds.y.saturating_sub(pad);
    let x1 = (bounds.x + bounds.width + pad).min(image.width());
    let y1 = (bounds.y + bounds.height + pad).min(image.height());
    let (crop_w, crop_h) = (x1 - x0, y1 - y0);

    let side = crop_w.max(crop_h);
    let background = if transparent {
        Rgba([0, 0, 0, 0])
    } else {
        Rgba([255, 255, 255, 255])
    };
    let mut canvas = RgbaImage::from_pixel(side, side, background);
    let cropped = imageops::crop_imm(image, x0, y0, crop_w, crop_h).to_image();
    let offset_x = (side - crop_w) / 2;
    let offset_y = (side - crop_h) / 2;
    imageops::replace(&mut canvas, &cropped, offset_x as i64, offset_y as i64);
    canvas
}

/// Contrast-limited adaptive histogram equalization of the luminance.
///
/// Each pixel's color channels move by the same amount, so chroma and alpha
/// are unchanged apart from clamping at the ends of the range.
pub fn equalize_luminance(image: &mut RgbaImage, clip_limit: f32, grid: u32) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let tiles_x = grid.clamp(1, width) as usize;
    let tiles_y = grid.clamp(1, height) as usize;
    let tile_w = width as f32 / tiles_x as f32;
    let tile_h = height as f32 / tiles_y as f32;

    let luminance: Vec<u8> = image.pixels().map(|p| luma(p[0], p[1], p[2])).collect();
    let tile_of =
        |coord: u32, size: f32, count: usize| ((coord as f32 / size) as usize).min(count - 1);

    let mut histograms = vec![[0u32; 256]; tiles_x * tiles_y];
    for y in 0..height {
        let ty = tile_of(y, tile_h, tiles_y);
        for x in 0..width {
            let tx = tile_of(x, tile_w, tiles_x);
            let l = luminance[(y * width + x) as usize];
            histograms[ty * tiles_x + tx][l as usize] += 1;
        }
    }

    let luts: Vec<[u8; 256]> = histograms
        .iter_mut()
        .map(|hist| clipped_lut(hist, clip_limit))
        .collect();

    for y in 0..height {
        let (ty0, ty1, wy) = interpolation_cell(y, tile_h, tiles_y);
        for x in 0..width {
            let (tx0, tx1, wx) = interpolation_cell(x, tile_w, tiles_x);
            let l = luminance[(y * width + x) as usize] as usize;
            let sample = |tx: usize, ty: usize| luts[ty * tiles_x + tx][l] as f32;
            let top = sample(tx0, ty0) * (1.0 - wx) + sample(tx1, ty0) * wx;
            let bottom = sample(tx0, ty1) * (1.0 - wx) + sample(tx1, ty1) * wx;
            let mapped = top * (1.0 - wy) + bottom * wy;

            let delta = mapped.round() as i32 - l as i32;
            let pixel = image.get_pixel_mut(x, y);
            for c in 0..3 {
                pixel[c] = (pixel[c] as i32 + delta).clamp(0, 255) as u8;
            }
        }
    }
}

/// Clip a tile histogram, spread the excess evenly and build the mapping.
fn clipped_lut(hist: &mut [u32; 256], clip_limit: f32) -> [u8; 256] {
    let total: u32 = hist.iter().sum();
    let mut lut = [0u8; 256];
    if total == 0 {
        for (i, v) in lut.iter_mut().enumerate() {
            *v = i as u8;
        }
        return lut;
    }

    let limit = ((clip_limit * total as f32 / 256.0) as u32).max(1);
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }

    let share = excess / 256;
    let mut residual = excess % 256;
    for bin in hist.iter_mut() {
        *bin += share;
    }
    if residual > 0 {
        let step = (256 / residual as usize).max(1);
        for bin in hist.iter_mut().step_by(step) {
            if residual == 0 {
                break;
            }
            *bin += 1;
            residual -= 1;
        }
    }

    let scale = 255.0 / total as f32;
    let mut cumulative = 0u32;
    for (i, bin) in hist.iter().enumerate() {
        cumulative += bin;
        lut[i] = (cumulative as f32 * scale).round().min(255.0) as u8;
    }
    lut
}

/// Neighbouring tile centers around `coord` and the weight of the second.
fn interpolation_cell(coord: u32, size: f32, count: usize) -> (usize, usize, f32) {
    let position = (coord as f32 + 0.5) / size - 0.5;
    if position <= 0.0 {
        return (0, 0, 0.0);
    }
    let lower = position.floor() as usize;
    if lower >= count - 1 {
        return (count - 1, count - 1, 0.0);
    }
    (lower, lower + 1, position - lower as f32)
}

/// Composite onto white by alpha.
pub fn flatten_on_white(image: &RgbaImage) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let p = image.get_pixel(x, y);
        let alpha = p[3] as u32;
        let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        Rgb([blend(p[0]), blend(p[1]), blend(p[2])])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OracleError;

    fn white_with_square(size: u32, x0: u32, y0: u32, side: u32) -> RgbImage {
        RgbImage::from_fn(size, size, |x, y| {
            if (x0..x0 + side).contains(&x) && (y0..y0 + side).contains(&y) {
                Rgb([40, 60, 200])
            } else {
                Rgb([255, 255, 255])
            }
        })
    }

    struct WhiteIsBackground;

    impl BackgroundRemover for WhiteIsBackground {
        fn remove_background(&self, image: &RgbImage) -> Result<RgbaImage, OracleError> {
            Ok(RgbaImage::from_fn(image.width(), image.height(), |x, y| {
                let p = image.get_pixel(x, y);
                let alpha = if luma(p[0], p[1], p[2]) >= 250 { 0 } else { 255 };
                Rgba([p[0], p[1], p[2], alpha])
            }))
        }
    }

    struct Broken;

    impl BackgroundRemover for Broken {
        fn remove_background(&self, _image: &RgbImage) -> Result<RgbaImage, OracleError> {
            Err(OracleError::new("background-removal", "segmentation model crashed"))
        }
    }

    #[test]
    fn test_bounds_opaque_and_transparent() {
        let rgb = white_with_square(40, 10, 12, 6);
        let opaque = DynamicImage::ImageRgb8(rgb.clone()).into_rgba8();
        assert_eq!(
            find_content_bounds(&opaque, false),
            Some(ContentBounds {
                x: 10,
                y: 12,
                width: 6,
                height: 6
            })
        );

        let mut cutout = RgbaImage::from_pixel(20, 20, Rgba([255, 255, 255, 0]));
        cutout.put_pixel(3, 4, Rgba([255, 255, 255, 11]));
        cutout.put_pixel(8, 9, Rgba([0, 0, 0, 10]));
        assert_eq!(
            find_content_bounds(&cutout, true),
            Some(ContentBounds {
                x: 3,
                y: 4,
                width: 1,
                height: 1
            })
        );
    }

    #[test]
    fn test_no_content() {
        let blank = RgbaImage::from_pixel(16, 16, Rgba([255, 255, 255, 255]));
        assert_eq!(find_content_bounds(&blank, false), None);
        assert_eq!(find_content_bounds(&blank, true).map(|b| b.width), Some(16));
    }

    #[test]
    fn test_center_on_square_pads_and_centers() {
        let image = RgbaImage::from_fn(100, 60, |x, y| {
            if (20..40).contains(&x) && (10..50).contains(&y) {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([255, 255, 255, 255])
            }
        });
        let bounds = find_content_bounds(&image, false).unwrap();
        let framed = center_on_square(&image, bounds, 0.1, false);

        // 20x40 content, 4 px padding: 28x48 crop on a 48 px canvas.
        assert_eq!(framed.dimensions(), (48, 48));
        let content = find_content_bounds(&framed, false).unwrap();
        assert_eq!((content.width, content.height), (20, 40));
        assert_eq!(content.x, 14);
        assert_eq!(content.y, 4);
    }

    #[test]
    fn test_transparent_canvas_for_cutouts() {
        let mut image = RgbaImage::from_pixel(30, 10, Rgba([0, 0, 0, 0]));
        for x in 0..30 {
            image.put_pixel(x, 5, Rgba([9, 9, 9, 255]));
        }
        let bounds = find_content_bounds(&image, true).unwrap();
        let framed = center_on_square(&image, bounds, 0.0, true);
        assert_eq!(framed.dimensions(), (30, 30));
        assert_eq!(framed.get_pixel(0, 0)[3], 0);
    }

    #[test]
    fn test_equalization_keeps_alpha_and_uniformity() {
        let mut image = RgbaImage::from_pixel(64, 64, Rgba([128, 128, 128, 77]));
        equalize_luminance(&mut image, CLAHE_CLIP_LIMIT, CLAHE_GRID);
        let first = *image.get_pixel(0, 0);
        assert_eq!(first[3], 77);
        assert!(image.pixels().all(|p| *p == first));
    }

    #[test]
    fn test_equalization_preserves_chroma() {
        let mut image = RgbaImage::from_fn(64, 64, |x, _| {
            let base = 90 + (x as u8 / 2);
            Rgba([base + 20, base, base - 10, 255])
        });
        equalize_luminance(&mut image, CLAHE_CLIP_LIMIT, CLAHE_GRID);
        for p in image.pixels() {
            if p[0] < 255 && p[2] > 0 {
                assert_eq!(p[0] as i32 - p[1] as i32, 20);
                assert_eq!(p[1] as i32 - p[2] as i32, 10);
            }
        }
    }

    #[test]
    fn test_flatten_on_white() {
        let mut image = RgbaImage::from_pixel(2, 1, Rgba([0, 0, 0, 0]));
        image.put_pixel(1, 0, Rgba([10, 20, 30, 255]));
        let flat = flatten_on_white(&image);
        assert_eq!(flat.get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert_eq!(flat.get_pixel(1, 0), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_preprocess_output_size() {
        let photo = DynamicImage::ImageRgb8(white_with_square(120, 30, 30, 60));
        let params = PreprocessParams::new(true, 64);
        let out = preprocess(&photo, &params, Some(&WhiteIsBackground)).unwrap();
        assert_eq!(out.dimensions(), (64, 64));
        // 60 px content with 6 px margins: the corners stay background.
        assert_eq!(out.get_pixel(0, 0), &Rgb([255, 255, 255]));
        let Rgb([r, g, b]) = *out.get_pixel(32, 32);
        assert!(luma(r, g, b) < 250);
    }

    #[test]
    fn test_preprocess_blank_image() {
        let blank = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 30, Rgb([255, 255, 255])));
        let params = PreprocessParams {
            remove_background: false,
            ..PreprocessParams::new(false, 32)
        };
        let out = preprocess(&blank, &params, None).unwrap();
        assert_eq!(out.dimensions(), (32, 32));
        assert!(out.pixels().all(|p| p == &Rgb([255, 255, 255])));
    }

    #[test]
    fn test_preprocess_remover_failure_is_verbatim() {
        let photo = DynamicImage::ImageRgb8(white_with_square(16, 4, 4, 4));
        let err = preprocess(&photo, &PreprocessParams::default(), Some(&Broken)).unwrap_err();
        assert_eq!(err.to_string(), "segmentation model crashed");
    }

    #[test]
    fn test_zero_target_rejected() {
        let photo = DynamicImage::ImageRgb8(white_with_square(16, 4, 4, 4));
        let params = PreprocessParams::new(false, 0);
        assert!(preprocess(&photo, &params, None).is_err());
    }
}
