//! Procedural stand-ins for the external models.
//!
//! Everything here is deterministic and runs in milliseconds, which makes it
//! the backend for offline runs of the CLI and for pipeline tests. The
//! outputs have the same shape as the real models': the synthesizer paints
//! one object on white, the reconstructor returns an unwelded triangle soup.

use forge_mesh::{Mesh, SubdivideParams, TextureView, composite_atlas, subdivide_mesh};
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};
use nalgebra::{Point3, Vector3};
use tracing::debug;

use crate::error::OracleError;
use crate::oracle::{
    BackgroundRemover, ImageSynthesizer, MeshReconstructor, ModelLoader, SynthesisRequest,
    TextureSynthesizer, ViewRenderer,
};
use crate::preprocess::{LUMINANCE_THRESHOLD, find_content_bounds, luma};
use crate::resource::ModelKind;

/// 64-bit FNV-1a.
fn fnv1a(text: &str) -> u64 {
    text.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

/// Paints a shaded ellipse whose color and proportions follow the prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProceduralSynthesizer;

impl ImageSynthesizer for ProceduralSynthesizer {
    fn synthesize(&self, request: &SynthesisRequest) -> Result<RgbImage, OracleError> {
        if request.width == 0 || request.height == 0 {
            return Err(OracleError::new(
                "image-synthesis",
                format!("invalid output size {}x{}", request.width, request.height),
            ));
        }
        let hash = fnv1a(&request.prompt) ^ request.seed.unwrap_or(0);
        let channel = |shift: u32| 40.0 + ((hash >> shift) & 0x7f) as f64;
        let color = [channel(0), channel(8), channel(16)];

        let (w, h) = (request.width as f64, request.height as f64);
        let rx = w * (0.2 + ((hash >> 24) & 0xff) as f64 / 255.0 * 0.15);
        let ry = h * (0.2 + ((hash >> 32) & 0xff) as f64 / 255.0 * 0.15);
        let (cx, cy) = (w / 2.0, h / 2.0);

        Ok(RgbImage::from_fn(request.width, request.height, |x, y| {
            let dx = (x as f64 + 0.5 - cx) / rx;
            let dy = (y as f64 + 0.5 - cy) / ry;
            let d2 = dx * dx + dy * dy;
            if d2 > 1.0 {
                return Rgb([255, 255, 255]);
            }
            let shade = 0.75 + 0.25 * (1.0 - d2);
            Rgb(color.map(|c| (c * shade) as u8))
        }))
    }
}

/// Treats near-white pixels as background.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProceduralBackgroundRemover;

impl BackgroundRemover for ProceduralBackgroundRemover {
    fn remove_background(&self, image: &RgbImage) -> Result<RgbaImage, OracleError> {
        Ok(RgbaImage::from_fn(image.width(), image.height(), |x, y| {
            let Rgb([r, g, b]) = *image.get_pixel(x, y);
            let alpha = if luma(r, g, b) >= LUMINANCE_THRESHOLD { 0 } else { 255 };
            Rgba([r, g, b, alpha])
        }))
    }
}

/// Fits an ellipsoid to the object's silhouette.
///
/// The tessellation is a subdivided octahedron; higher resolutions subdivide
/// more, up to 8192 faces.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProceduralReconstructor;

impl ProceduralReconstructor {
    /// Subdivision levels for a grid resolution.
    pub fn levels(resolution: u32) -> usize {
        (resolution / 64).clamp(1, 5) as usize
    }
}

fn octahedron() -> Mesh {
    Mesh::from_raw(
        &[
            [1.0, 0.0, 0.0],
            [-1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, -1.0, 0.0],
            [0.0, 0.0, 1.0],
            [0.0, 0.0, -1.0],
        ],
        &[
            [4, 0, 2],
            [4, 2, 1],
            [4, 1, 3],
            [4, 3, 0],
            [5, 2, 0],
            [5, 1, 2],
            [5, 3, 1],
            [5, 0, 3],
        ],
    )
}

impl MeshReconstructor for ProceduralReconstructor {
    fn reconstruct(
        &self,
        image: &RgbImage,
        resolution: u32,
        chunk_size: u32,
    ) -> Result<Mesh, OracleError> {
        if resolution == 0 {
            return Err(OracleError::new("image-to-mesh", "resolution must be positive"));
        }
        let rgba = DynamicImage::ImageRgb8(image.clone()).into_rgba8();
        let bounds = find_content_bounds(&rgba, false).ok_or_else(|| {
            OracleError::new("image-to-mesh", "no object found in the input image")
        })?;

        let sx = bounds.width as f64 / image.width() as f64;
        let sy = bounds.height as f64 / image.height() as f64;
        let radii = Vector3::new(sx, sy, (sx + sy) / 2.0) * 0.5;

        let levels = Self::levels(resolution);
        let params = SubdivideParams {
            iterations: levels,
            ..SubdivideParams::midpoint()
        };
        let sphere = subdivide_mesh(&octahedron(), &params).mesh;
        debug!(
            resolution,
            chunks = (resolution as u64).pow(3).div_ceil(chunk_size.max(1) as u64),
            faces = sphere.face_count(),
            "Procedural reconstruction"
        );

        let placed: Vec<Point3<f64>> = sphere
            .vertices
            .iter()
            .map(|v| Point3::from(v.position.coords.normalize().component_mul(&radii)))
            .collect();

        // Raw model output: every face owns its three corners.
        let mut positions = Vec::with_capacity(sphere.face_count() * 3);
        let mut faces = Vec::with_capacity(sphere.face_count());
        for face in &sphere.faces {
            let base = positions.len() as u32;
            for &v in face {
                let p = placed[v as usize];
                positions.push([p.x, p.y, p.z]);
            }
            faces.push([base, base + 1, base + 2]);
        }
        Ok(Mesh::from_raw(&positions, &faces))
    }
}

/// Flat-shaded views, brightest when facing the camera.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProceduralRenderer;

impl ViewRenderer for ProceduralRenderer {
    fn render_views(
        &self,
        mesh: &Mesh,
        angles: &[f64],
        resolution: u32,
    ) -> Result<Vec<TextureView>, OracleError> {
        if mesh.faces.is_empty() {
            return Err(OracleError::new("view-renderer", "mesh has no faces to render"));
        }
        Ok(angles
            .iter()
            .map(|&angle| {
                let facing = angle.to_radians().cos().abs();
                let shade = (120.0 + 100.0 * facing) as u8;
                let color = Rgba([shade, shade, shade, 255]);
                TextureView::new(RgbaImage::from_pixel(resolution, resolution, color), angle)
            })
            .collect())
    }
}

/// Picks the front view and tints it by prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProceduralTexturer;

impl TextureSynthesizer for ProceduralTexturer {
    fn synthesize_texture(
        &self,
        prompt: &str,
        views: &[TextureView],
        resolution: u32,
    ) -> Result<RgbaImage, OracleError> {
        if views.is_empty() {
            return Err(OracleError::new("texture-synthesis", "no views to texture from"));
        }
        let atlas = composite_atlas(views);
        let mut texture = imageops::resize(&atlas, resolution, resolution, FilterType::Triangle);
        let hash = fnv1a(prompt);
        let tint = [0, 8, 16].map(|shift| ((hash >> shift) & 0x1f) as u8);
        for pixel in texture.pixels_mut() {
            for c in 0..3 {
                pixel[c] = pixel[c].saturating_sub(tint[c]);
            }
        }
        Ok(texture)
    }
}

/// Nothing to load.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProceduralLoader;

impl ModelLoader for ProceduralLoader {
    fn load(&self, kind: ModelKind) -> Result<(), OracleError> {
        debug!(%kind, "Procedural model ready");
        Ok(())
    }

    fn unload(&self, kind: ModelKind) {
        debug!(%kind, "Procedural model released");
    }
}
