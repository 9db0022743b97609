//! Seams to the external models.
//!
//! The pipeline never talks to a model directly. Each model sits behind one
//! of these traits so a deployment can plug in real inference and tests can
//! plug in fakes. Implementations report failures as [`OracleError`], whose
//! message ends up verbatim on the failed job.

use std::fmt;
use std::sync::Arc;

use forge_mesh::{Mesh, TextureView};
use image::{RgbImage, RgbaImage};

use crate::error::OracleError;
use crate::procedural::{
    ProceduralBackgroundRemover, ProceduralLoader, ProceduralReconstructor, ProceduralRenderer,
    ProceduralSynthesizer, ProceduralTexturer,
};
use crate::resource::ModelKind;

/// Parameters of one text-to-image call.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub guidance: f32,
    pub seed: Option<u64>,
}

/// Text-to-image model.
pub trait ImageSynthesizer: Send + Sync {
    fn synthesize(&self, request: &SynthesisRequest) -> Result<RgbImage, OracleError>;
}

/// Image-to-mesh model. Output is raw: unwelded, possibly with slivers.
pub trait MeshReconstructor: Send + Sync {
    fn reconstruct(
        &self,
        image: &RgbImage,
        resolution: u32,
        chunk_size: u32,
    ) -> Result<Mesh, OracleError>;
}

/// Foreground segmentation; the result has the input's dimensions.
pub trait BackgroundRemover: Send + Sync {
    fn remove_background(&self, image: &RgbImage) -> Result<RgbaImage, OracleError>;
}

/// Renders a mesh from the given yaw angles in degrees.
pub trait ViewRenderer: Send + Sync {
    fn render_views(
        &self,
        mesh: &Mesh,
        angles: &[f64],
        resolution: u32,
    ) -> Result<Vec<TextureView>, OracleError>;
}

/// Multi-view texture model.
pub trait TextureSynthesizer: Send + Sync {
    fn synthesize_texture(
        &self,
        prompt: &str,
        views: &[TextureView],
        resolution: u32,
    ) -> Result<RgbaImage, OracleError>;
}

/// Moves model weights in and out of memory.
pub trait ModelLoader: Send + Sync {
    fn load(&self, kind: ModelKind) -> Result<(), OracleError>;

    fn unload(&self, kind: ModelKind);
}

/// All models a pipeline uses. Optional members turn their stage off.
#[derive(Clone)]
pub struct OracleSet {
    pub synthesizer: Arc<dyn ImageSynthesizer>,
    pub reconstructor: Arc<dyn MeshReconstructor>,
    pub background: Option<Arc<dyn BackgroundRemover>>,
    pub renderer: Option<Arc<dyn ViewRenderer>>,
    pub texturer: Option<Arc<dyn TextureSynthesizer>>,
    pub loader: Arc<dyn ModelLoader>,
}

impl OracleSet {
    /// Deterministic offline backend, for demos and tests.
    pub fn procedural() -> Self {
        Self {
            synthesizer: Arc::new(ProceduralSynthesizer),
            reconstructor: Arc::new(ProceduralReconstructor),
            background: Some(Arc::new(ProceduralBackgroundRemover)),
            renderer: Some(Arc::new(ProceduralRenderer)),
            texturer: Some(Arc::new(ProceduralTexturer)),
            loader: Arc::new(ProceduralLoader),
        }
    }

    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn ImageSynthesizer>) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    pub fn with_reconstructor(mut self, reconstructor: Arc<dyn MeshReconstructor>) -> Self {
        self.reconstructor = reconstructor;
        self
    }

    pub fn with_texturer(mut self, texturer: Option<Arc<dyn TextureSynthesizer>>) -> Self {
        self.texturer = texturer;
        self
    }

    pub fn with_loader(mut self, loader: Arc<dyn ModelLoader>) -> Self {
        self.loader = loader;
        self
    }
}

impl fmt::Debug for OracleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OracleSet")
            .field("background", &self.background.is_some())
            .field("renderer", &self.renderer.is_some())
            .field("texturer", &self.texturer.is_some())
            .finish_non_exhaustive()
    }
}
