//! Texture atlas compositing and the procedural texture fallback.
//!
//! The atlas currently takes the single view closest to the front (0 degrees)
//! as its baseline. Blending several views into one atlas is not supported.

use std::fmt;

use image::{Rgba, RgbaImage};
use tracing::{debug, warn};

/// Camera angles, in degrees around the vertical axis, at which views are rendered.
pub const RENDER_VIEW_ANGLES: [f64; 6] = [0.0, 60.0, 120.0, 180.0, 240.0, 300.0];

/// Edge length of generated textures.
pub const DEFAULT_TEXTURE_SIZE: u32 = 1024;

/// Fill color of the atlas when no view is available.
pub const NEUTRAL_GRAY: Rgba<u8> = Rgba([200, 200, 200, 255]);

const NOISE_POINTS: usize = 5000;
const NOISE_AMPLITUDE: i32 = 30;

/// A rendered or synthesized view of a mesh.
#[derive(Debug, Clone)]
pub struct TextureView {
    pub image: RgbaImage,
    /// Camera angle in degrees.
    pub angle: f64,
}

impl TextureView {
    pub fn new(image: RgbaImage, angle: f64) -> Self {
        Self { image, angle }
    }
}

/// Wrap an angle in degrees into `[-180, 180)`.
pub fn wrap_angle(degrees: f64) -> f64 {
    (degrees + 180.0).rem_euclid(360.0) - 180.0
}

/// Pick the view facing the front as the texture atlas.
///
/// The view with the smallest wrapped angle magnitude wins, the earlier view
/// on ties. With no views the atlas is a neutral gray square of
/// [`DEFAULT_TEXTURE_SIZE`].
pub fn composite_atlas(views: &[TextureView]) -> RgbaImage {
    let best = views.iter().enumerate().fold(
        None,
        |best: Option<(usize, f64)>, (i, view)| {
            let distance = wrap_angle(view.angle).abs();
            match best {
                Some((_, d)) if d <= distance => best,
                _ => Some((i, distance)),
            }
        },
    );

    match best {
        Some((i, distance)) => {
            debug!(views = views.len(), chosen = i, distance, "Atlas baseline selected");
            views[i].image.clone()
        }
        None => {
            debug!("No views available, using neutral atlas");
            RgbaImage::from_pixel(DEFAULT_TEXTURE_SIZE, DEFAULT_TEXTURE_SIZE, NEUTRAL_GRAY)
        }
    }
}

/// Look of a procedural texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum TextureStyle {
    Realistic,
    Stylized,
    Pbr,
    HandPainted,
    #[default]
    Default,
}

impl TextureStyle {
    /// Base fill color of the style.
    pub fn base_color(self) -> [u8; 3] {
        match self {
            TextureStyle::Realistic => [180, 160, 140],
            TextureStyle::Stylized => [100, 180, 220],
            TextureStyle::Pbr => [150, 150, 150],
            TextureStyle::HandPainted => [200, 180, 160],
            TextureStyle::Default => [200, 200, 200],
        }
    }

    /// Parse a style name; unknown names fall back to [`TextureStyle::Default`].
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "realistic" => TextureStyle::Realistic,
            "stylized" => TextureStyle::Stylized,
            "pbr" => TextureStyle::Pbr,
            "hand-painted" | "hand_painted" => TextureStyle::HandPainted,
            _ => TextureStyle::Default,
        }
    }
}

impl fmt::Display for TextureStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TextureStyle::Realistic => "realistic",
            TextureStyle::Stylized => "stylized",
            TextureStyle::Pbr => "pbr",
            TextureStyle::HandPainted => "hand-painted",
            TextureStyle::Default => "default",
        };
        f.write_str(name)
    }
}

/// Where a mesh texture came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "pipeline-config", derive(serde::Serialize))]
#[cfg_attr(feature = "pipeline-config", serde(rename_all = "lowercase"))]
pub enum TextureSource {
    Synthesized,
    Procedural,
}

/// Solid style color sprinkled with seeded single-pixel noise.
///
/// The same `(style, size, seed)` always yields the same image.
pub fn procedural_texture(style: TextureStyle, size: u32, seed: u64) -> RgbaImage {
    let [r, g, b] = style.base_color();
    let mut texture = RgbaImage::from_pixel(size, size, Rgba([r, g, b, 255]));
    if size == 0 {
        return texture;
    }

    let mut rng = SplitMix64::new(seed);
    let span = (2 * NOISE_AMPLITUDE) as u64;
    for _ in 0..NOISE_POINTS {
        let x = rng.below(size as u64) as u32;
        let y = rng.below(size as u64) as u32;
        let variation = rng.below(span) as i32 - NOISE_AMPLITUDE;
        let shift = |c: u8| (c as i32 + variation).clamp(0, 255) as u8;
        texture.put_pixel(x, y, Rgba([shift(r), shift(g), shift(b), 255]));
    }
    texture
}

/// Use the synthesized texture when there is one, otherwise a procedural texture.
pub fn texture_or_fallback<E: fmt::Display>(
    synthesized: Result<RgbaImage, E>,
    style: TextureStyle,
    size: u32,
    seed: u64,
) -> (RgbaImage, TextureSource) {
    match synthesized {
        Ok(image) => (image, TextureSource::Synthesized),
        Err(err) => {
            warn!(error = %err, %style, "Texture synthesis failed, using procedural texture");
            (procedural_texture(style, size, seed), TextureSource::Procedural)
        }
    }
}

/// Small deterministic generator for texture noise.
struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }

    /// Uniform-ish value in `0..bound`; `bound` must be non-zero.
    fn below(&mut self, bound: u64) -> u64 {
        self.next_u64() % bound
    }
}
