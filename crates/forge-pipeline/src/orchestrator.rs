//! Drives jobs through the generation stages.
//!
//! ```text
//! queued -> textToImage -> preprocessing -> imageToMesh -> postprocessing -> completed
//!                                       (any stage) -> failed | cancelled
//! ```
//!
//! Each stage holds at most one model lease and drops it before the next
//! stage starts, so two jobs running on different threads can never wait on
//! each other's models. Cancellation is honored between stages.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use forge_mesh::{
    Mesh, PostprocessParams, RENDER_VIEW_ANGLES, TextureSource, ensure_uvs, postprocess,
    texture_or_fallback,
};
use image::{DynamicImage, RgbImage, RgbaImage};
use tracing::{debug, info, info_span, warn};

use crate::artifacts::ArtifactStore;
use crate::config::ServiceConfig;
use crate::error::{OracleError, PipelineError, PipelineResult};
use crate::job::{JobId, JobKind, JobRecord, JobRegistry, JobStatus, Stage};
use crate::oracle::{OracleSet, SynthesisRequest};
use crate::preprocess::preprocess;
use crate::resource::{ModelKind, ResourceManager};
use crate::tier::{GenerationMode, OptimizationTier};
use crate::validation::{NEGATIVE_PROMPT, enhance_prompt, validate_prompt, validate_upload};

/// Owns the models, the artifact directories and the job registry.
#[derive(Debug)]
pub struct Orchestrator {
    config: ServiceConfig,
    tier: OptimizationTier,
    oracles: OracleSet,
    resources: ResourceManager,
    store: ArtifactStore,
    jobs: Arc<JobRegistry>,
}

impl Orchestrator {
    /// Build an orchestrator with the tier implied by the configured budget.
    pub fn new(config: ServiceConfig, oracles: OracleSet) -> PipelineResult<Self> {
        let tier = config.tier();
        Self::with_tier(config, tier, oracles)
    }

    pub fn with_tier(
        config: ServiceConfig,
        tier: OptimizationTier,
        oracles: OracleSet,
    ) -> PipelineResult<Self> {
        let store = ArtifactStore::new(&config.output_dir, &config.upload_dir);
        store.ensure_dirs()?;

        let resources = ResourceManager::new(
            config.residency_budget(),
            config.model_costs.for_tier(&tier),
            Arc::clone(&oracles.loader),
        )
        .with_acquire_timeout(config.acquire_timeout());

        info!(
            tier = %tier.level,
            budget = resources.budget(),
            output_dir = %store.output_dir().display(),
            "Orchestrator ready"
        );

        Ok(Self {
            config,
            tier,
            oracles,
            resources,
            store,
            jobs: Arc::new(JobRegistry::new()),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn tier(&self) -> &OptimizationTier {
        &self.tier
    }

    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Shared handle on the registry, for status readers on other threads.
    pub fn jobs(&self) -> Arc<JobRegistry> {
        Arc::clone(&self.jobs)
    }

    /// Validate a prompt and queue a text job. Invalid prompts create no job.
    pub fn enqueue_text_job(&self, prompt: &str, mode: GenerationMode) -> PipelineResult<JobId> {
        let prompt = validate_prompt(Some(prompt), &self.config.limits)?;
        let id = self
            .jobs
            .insert(JobRecord::new(JobKind::Text, mode, Some(prompt)));
        info!(%id, %mode, "Text job queued");
        Ok(id)
    }

    /// Validate and store an upload, then queue an image job.
    pub fn enqueue_image_job(
        &self,
        bytes: &[u8],
        filename: &str,
        mode: GenerationMode,
    ) -> PipelineResult<JobId> {
        let extension = validate_upload(filename, bytes.len(), &self.config.limits)?;
        let mut record = JobRecord::new(JobKind::Image, mode, None);
        record.upload_path = Some(self.store.save_upload(record.id, &extension, bytes)?);
        let id = self.jobs.insert(record);
        info!(%id, %mode, filename, "Image job queued");
        Ok(id)
    }

    /// Queue a text job and run it to the end on the calling thread.
    ///
    /// A job that fails still returns its id; the failure is on the record.
    pub fn submit_text_job(&self, prompt: &str, mode: GenerationMode) -> PipelineResult<JobId> {
        let id = self.enqueue_text_job(prompt, mode)?;
        self.run_job(id)?;
        Ok(id)
    }

    pub fn submit_image_job(
        &self,
        bytes: &[u8],
        filename: &str,
        mode: GenerationMode,
    ) -> PipelineResult<JobId> {
        let id = self.enqueue_image_job(bytes, filename, mode)?;
        self.run_job(id)?;
        Ok(id)
    }

    pub fn get_job(&self, id: JobId) -> PipelineResult<JobRecord> {
        self.jobs.get(id)
    }

    pub fn list_jobs(&self) -> Vec<JobRecord> {
        self.jobs.list()
    }

    /// See [`JobRegistry::request_cancel`].
    pub fn cancel_job(&self, id: JobId) -> PipelineResult<JobStatus> {
        let status = self.jobs.request_cancel(id)?;
        info!(%id, %status, "Cancellation requested");
        Ok(status)
    }

    /// Run a queued job through every stage and return its final record.
    ///
    /// Stage failures are recorded on the job rather than returned. The
    /// error path is for jobs that cannot start: unknown, or already run.
    pub fn run_job(&self, id: JobId) -> PipelineResult<JobRecord> {
        match self.jobs.begin(id) {
            Ok(()) => {}
            Err(PipelineError::Cancelled { .. }) => {
                info!(%id, "Job cancelled before it started");
                return self.jobs.get(id);
            }
            Err(err) => return Err(err),
        }

        let record = self.jobs.get(id)?;
        let span = info_span!("job", %id, kind = ?record.kind, mode = %record.mode);
        let _entered = span.enter();
        let started = Instant::now();

        match self.execute(&record) {
            Ok(()) => {
                info!(elapsed_ms = started.elapsed().as_millis() as u64, "Job completed");
            }
            Err(PipelineError::Cancelled { .. }) => {
                self.jobs.mark_cancelled(id)?;
                info!(elapsed_ms = started.elapsed().as_millis() as u64, "Job cancelled");
            }
            Err(err) => {
                let stage = self.jobs.get(id)?.stage;
                warn!(%stage, code = %err.code(), error = %err, "Job failed");
                self.jobs.fail(id, &err)?;
            }
        }
        self.jobs.get(id)
    }

    fn execute(&self, record: &JobRecord) -> PipelineResult<()> {
        let id = record.id;
        let prompt = record.prompt.as_deref().unwrap_or_default();

        let source = match record.kind {
            JobKind::Text => {
                self.enter(id, Stage::TextToImage)?;
                let preview = self.text_to_image(prompt, record.mode)?;
                let path = self.store.preview_path(id);
                self.store.save_png(&preview, &path)?;
                self.jobs.update(id, |r| r.preview_path = Some(path))?;
                self.enter(id, Stage::Preprocessing)?;
                DynamicImage::ImageRgb8(preview)
            }
            JobKind::Image => {
                self.enter(id, Stage::Preprocessing)?;
                let path = match &record.upload_path {
                    Some(path) => path.clone(),
                    None => self.store.find_upload(id)?,
                };
                decode_upload(&path)?
            }
        };

        let prepared = preprocess(
            &source,
            &self.config.preprocess,
            self.oracles.background.as_deref(),
        )?;
        self.store
            .save_png(&prepared, &self.store.preprocessed_path(id))?;

        self.enter(id, Stage::ImageToMesh)?;
        let raw = self.image_to_mesh(&prepared, record.mode)?;
        let raw_path = self.store.raw_mesh_path(id);
        self.store.save_mesh(&raw, &raw_path)?;

        self.enter(id, Stage::Postprocessing)?;
        let (mesh, texture_source) = self.finish_mesh(&raw, prompt)?;
        self.check_cancelled(id)?;

        let mesh_path = self.store.mesh_path(id);
        self.store.save_mesh(&mesh, &mesh_path)?;
        if !self.config.keep_raw_artifacts {
            self.store.remove(&raw_path)?;
        }

        let face_count = mesh.face_count();
        self.jobs.update(id, |r| {
            r.status = JobStatus::Completed;
            r.stage = Stage::Completed;
            r.progress = Stage::Completed.progress();
            r.stage_started_at = Some(Utc::now());
            r.completed_at = r.stage_started_at;
            r.mesh_path = Some(mesh_path);
            r.face_count = Some(face_count);
            r.texture_source = texture_source;
        })
    }

    fn check_cancelled(&self, id: JobId) -> PipelineResult<()> {
        if self.jobs.is_cancel_requested(id) {
            return Err(PipelineError::Cancelled { id: id.to_string() });
        }
        Ok(())
    }

    fn enter(&self, id: JobId, stage: Stage) -> PipelineResult<()> {
        self.check_cancelled(id)?;
        self.jobs.advance(id, stage)?;
        info!(%stage, progress = stage.progress(), "Stage started");
        Ok(())
    }

    fn text_to_image(&self, prompt: &str, mode: GenerationMode) -> PipelineResult<RgbImage> {
        let settings = mode.synthesis(&self.tier);
        let request = SynthesisRequest {
            prompt: enhance_prompt(prompt),
            negative_prompt: NEGATIVE_PROMPT.to_string(),
            width: settings.resolution,
            height: settings.resolution,
            steps: settings.steps,
            guidance: settings.guidance,
            seed: self.config.synthesis_seed,
        };
        let _lease = self.resources.acquire(mode.text_model())?;
        debug!(steps = request.steps, size = request.width, "Synthesizing image");
        Ok(self.oracles.synthesizer.synthesize(&request)?)
    }

    fn image_to_mesh(&self, image: &RgbImage, mode: GenerationMode) -> PipelineResult<Mesh> {
        let resolution = mode.reconstruction_resolution(&self.tier);
        let _lease = self.resources.acquire(ModelKind::Reconstructor)?;
        let mesh = self.oracles.reconstructor.reconstruct(
            image,
            resolution,
            self.tier.reconstruction_chunk_size,
        )?;
        debug!(
            resolution,
            vertices = mesh.vertex_count(),
            faces = mesh.face_count(),
            "Reconstructed"
        );
        Ok(mesh)
    }

    /// Repair, smooth, decimate and normalize, then attach UVs and a texture.
    fn finish_mesh(
        &self,
        raw: &Mesh,
        prompt: &str,
    ) -> PipelineResult<(Mesh, Option<TextureSource>)> {
        let params = PostprocessParams {
            smoothing_iterations: self.tier.smoothing_iterations,
            target_faces: self.tier.target_faces,
            unit_size: self.config.unit_size,
        };
        let mut mesh = postprocess(raw, &params)?.mesh;
        ensure_uvs(&mut mesh);

        if !self.config.texture.enabled {
            return Ok((mesh, None));
        }
        let settings = &self.config.texture;
        let size = self.tier.texture_resolution;
        let synthesized = self.synthesize_texture(&mesh, prompt, size);
        let (texture, source) = texture_or_fallback(synthesized, settings.style, size, settings.seed);
        mesh.texture = Some(texture);
        Ok((mesh, Some(source)))
    }

    fn synthesize_texture(&self, mesh: &Mesh, prompt: &str, size: u32) -> PipelineResult<RgbaImage> {
        let (Some(renderer), Some(texturer)) = (&self.oracles.renderer, &self.oracles.texturer)
        else {
            return Err(OracleError::new("texture-synthesis", "no texture model configured").into());
        };
        let views = self.tier.texture_views.clamp(1, RENDER_VIEW_ANGLES.len());
        let views = renderer.render_views(mesh, &RENDER_VIEW_ANGLES[..views], size)?;
        let _lease = self.resources.acquire(ModelKind::Texturer)?;
        Ok(texturer.synthesize_texture(prompt, &views, size)?)
    }
}

fn decode_upload(path: &Path) -> PipelineResult<DynamicImage> {
    let image = image::open(path)?;
    debug!(
        path = %path.display(),
        width = image.width(),
        height = image.height(),
        "Decoded upload"
    );
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelCosts;
    use crate::tier::TierLevel;

    fn orchestrator(root: &Path) -> Orchestrator {
        let mut config = ServiceConfig::with_root(root);
        config.model_costs = ModelCosts::uniform(1);
        Orchestrator::with_tier(
            config,
            OptimizationTier::for_level(TierLevel::Constrained),
            OracleSet::procedural(),
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_prompt_creates_no_job() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path());
        let err = orch.submit_text_job("   ", GenerationMode::Fast).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(err.to_string(), "Prompt cannot be empty");
        assert!(orch.list_jobs().is_empty());
    }

    #[test]
    fn test_text_job_completes() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path());
        let id = orch
            .submit_text_job("a small wooden stool", GenerationMode::Fast)
            .unwrap();

        let record = orch.get_job(id).unwrap();
        assert_eq!(record.status, JobStatus::Completed, "{:?}", record.error);
        assert_eq!(record.stage, Stage::Completed);
        assert_eq!(record.progress, 100);
        assert!(record.completed_at.is_some());
        assert!(record.face_count.unwrap() > 0);
        assert_eq!(record.texture_source, Some(TextureSource::Synthesized));

        assert!(orch.store().preview_path(id).exists());
        assert!(orch.store().preprocessed_path(id).exists());
        assert!(orch.store().mesh_path(id).exists());
        assert!(!orch.store().raw_mesh_path(id).exists());
    }

    #[test]
    fn test_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path());
        let id = orch.enqueue_text_job("a cup", GenerationMode::Fast).unwrap();
        assert_eq!(orch.cancel_job(id).unwrap(), JobStatus::Cancelled);

        let record = orch.run_job(id).unwrap();
        assert_eq!(record.status, JobStatus::Cancelled);
        assert_eq!(record.progress, 0);
        assert!(!orch.store().preview_path(id).exists());
    }

    #[test]
    fn test_job_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path());
        let id = orch.submit_text_job("a cup", GenerationMode::Fast).unwrap();
        assert!(matches!(
            orch.run_job(id),
            Err(PipelineError::JobState { .. })
        ));
        assert!(matches!(
            orch.run_job(JobId::new()),
            Err(PipelineError::JobNotFound { .. })
        ));
    }
}
