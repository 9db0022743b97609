//! On-disk layout of job artifacts.
//!
//! ```text
//! outputs/{id}_preview.png        text jobs: synthesized image
//! outputs/{id}_preprocessed.png   input to reconstruction
//! outputs/{id}_raw.glb            reconstruction, removed once the job succeeds
//! outputs/{id}.glb                final mesh
//! uploads/{id}_original.{ext}     image jobs: the uploaded file
//! ```

use std::path::{Path, PathBuf};

use forge_mesh::{Mesh, load_glb, save_glb};
use image::{ImageFormat, RgbImage};
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::job::JobId;

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    output_dir: PathBuf,
    upload_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(output_dir: impl Into<PathBuf>, upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            upload_dir: upload_dir.into(),
        }
    }

    /// Create both directories if they are missing.
    pub fn ensure_dirs(&self) -> PipelineResult<()> {
        for dir in [&self.output_dir, &self.upload_dir] {
            std::fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
        }
        Ok(())
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn preview_path(&self, id: JobId) -> PathBuf {
        self.output_dir.join(format!("{id}_preview.png"))
    }

    pub fn preprocessed_path(&self, id: JobId) -> PathBuf {
        self.output_dir.join(format!("{id}_preprocessed.png"))
    }

    pub fn raw_mesh_path(&self, id: JobId) -> PathBuf {
        self.output_dir.join(format!("{id}_raw.glb"))
    }

    pub fn mesh_path(&self, id: JobId) -> PathBuf {
        self.output_dir.join(format!("{id}.glb"))
    }

    pub fn upload_path(&self, id: JobId, extension: &str) -> PathBuf {
        self.upload_dir.join(format!("{id}_original.{extension}"))
    }

    pub fn save_png(&self, image: &RgbImage, path: &Path) -> PipelineResult<()> {
        image.save_with_format(path, ImageFormat::Png)?;
        debug!(path = %path.display(), "Saved image");
        Ok(())
    }

    pub fn save_upload(
        &self,
        id: JobId,
        extension: &str,
        bytes: &[u8],
    ) -> PipelineResult<PathBuf> {
        let path = self.upload_path(id, extension);
        std::fs::write(&path, bytes).map_err(|e| PipelineError::io(&path, e))?;
        debug!(path = %path.display(), bytes = bytes.len(), "Saved upload");
        Ok(path)
    }

    /// Find the stored upload of a job, whatever its extension.
    pub fn find_upload(&self, id: JobId) -> PipelineResult<PathBuf> {
        let prefix = format!("{id}_original.");
        let entries = std::fs::read_dir(&self.upload_dir)
            .map_err(|e| PipelineError::io(&self.upload_dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| PipelineError::io(&self.upload_dir, e))?;
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                return Ok(entry.path());
            }
        }
        Err(PipelineError::io(
            self.upload_dir.join(format!("{prefix}*")),
            std::io::Error::new(std::io::ErrorKind::NotFound, "upload not found"),
        ))
    }

    pub fn save_mesh(&self, mesh: &Mesh, path: &Path) -> PipelineResult<()> {
        save_glb(mesh, path)?;
        debug!(path = %path.display(), faces = mesh.face_count(), "Saved mesh");
        Ok(())
    }

    pub fn load_mesh(&self, path: &Path) -> PipelineResult<Mesh> {
        Ok(load_glb(path)?)
    }

    /// Delete a file if it exists.
    pub fn remove(&self, path: &Path) -> PipelineResult<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PipelineError::io(path, e)),
        }
    }
}
