//! Job pipeline of the forge text/photo to 3D service.
//!
//! A job turns a text prompt or an uploaded photo into a textured GLB mesh:
//! synthesize an image from the prompt, isolate and normalize the object,
//! reconstruct a raw mesh, then repair and finish it with [`forge_mesh`].
//!
//! # Parts
//!
//! - [`Orchestrator`]: validates requests, runs jobs stage by stage and keeps
//!   their records
//! - [`ResourceManager`]: keeps the loaded models within a memory budget,
//!   evicting idle ones least recently used first
//! - [`OptimizationTier`]: per-stage settings chosen once from the budget
//! - [`preprocess`]: background removal, centering, lighting equalization
//! - [`oracle`]: traits for the external models, with a deterministic
//!   procedural backend in [`procedural`]
//!
//! # Quick Start
//!
//! ```no_run
//! use forge_pipeline::{GenerationMode, OracleSet, Orchestrator, ServiceConfig};
//!
//! let config = ServiceConfig::with_root("data");
//! let orchestrator = Orchestrator::new(config, OracleSet::procedural()).unwrap();
//! let id = orchestrator
//!     .submit_text_job("a ceramic teapot", GenerationMode::Fast)
//!     .unwrap();
//! let job = orchestrator.get_job(id).unwrap();
//! println!("{} {:?}", job.status, job.mesh_path);
//! ```

mod error;

pub mod artifacts;
pub mod config;
pub mod job;
pub mod oracle;
pub mod orchestrator;
pub mod preprocess;
pub mod procedural;
pub mod resource;
pub mod tier;
pub mod validation;

pub use error::{ErrorCode, OracleError, PipelineError, PipelineResult, ValidationError};

pub use artifacts::ArtifactStore;
pub use config::{ModelCosts, RequestLimits, ServiceConfig, TextureSettings};
pub use job::{JobId, JobKind, JobRecord, JobRegistry, JobStatus, Stage};
pub use oracle::{
    BackgroundRemover, ImageSynthesizer, MeshReconstructor, ModelLoader, OracleSet,
    SynthesisRequest, TextureSynthesizer, ViewRenderer,
};
pub use orchestrator::Orchestrator;
pub use preprocess::{ContentBounds, PreprocessParams, preprocess};
pub use resource::{ModelKind, ModelLease, ModelStatus, Residency, ResourceManager};
pub use tier::{GIB, GenerationMode, OptimizationTier, Precision, SynthesisSettings, TierLevel};
pub use validation::{enhance_prompt, validate_prompt, validate_upload};
