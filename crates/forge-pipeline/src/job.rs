//! Job records and the in-memory registry.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use forge_mesh::TextureSource;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};
use crate::tier::GenerationMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(JobId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Text,
    Image,
}

/// Pipeline stage; each has a fixed progress value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Queued,
    TextToImage,
    Preprocessing,
    ImageToMesh,
    Postprocessing,
    Completed,
}

impl Stage {
    pub fn progress(self) -> u8 {
        match self {
            Stage::Queued => 0,
            Stage::TextToImage => 10,
            Stage::Preprocessing => 40,
            Stage::ImageToMesh => 60,
            Stage::Postprocessing => 85,
            Stage::Completed => 100,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Queued => "queued",
            Stage::TextToImage => "textToImage",
            Stage::Preprocessing => "preprocessing",
            Stage::ImageToMesh => "imageToMesh",
            Stage::Postprocessing => "postprocessing",
            Stage::Completed => "completed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Everything known about one job.
///
/// On failure `stage` stays at the stage that failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub kind: JobKind,
    pub mode: GenerationMode,
    pub prompt: Option<String>,
    pub status: JobStatus,
    pub stage: Stage,
    pub progress: u8,
    pub error: Option<String>,
    pub error_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub stage_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub preview_path: Option<PathBuf>,
    pub upload_path: Option<PathBuf>,
    pub mesh_path: Option<PathBuf>,
    pub face_count: Option<usize>,
    pub texture_source: Option<TextureSource>,
    #[serde(skip)]
    pub(crate) cancel_requested: bool,
}

impl JobRecord {
    pub fn new(kind: JobKind, mode: GenerationMode, prompt: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            kind,
            mode,
            prompt,
            status: JobStatus::Queued,
            stage: Stage::Queued,
            progress: Stage::Queued.progress(),
            error: None,
            error_code: None,
            created_at: now,
            updated_at: now,
            stage_started_at: None,
            completed_at: None,
            preview_path: None,
            upload_path: None,
            mesh_path: None,
            face_count: None,
            texture_source: None,
            cancel_requested: false,
        }
    }
}

/// Thread-safe store of job records.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, JobRecord>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<JobId, JobRecord>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<JobId, JobRecord>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, record: JobRecord) -> JobId {
        let id = record.id;
        self.write().insert(id, record);
        id
    }

    pub fn get(&self, id: JobId) -> PipelineResult<JobRecord> {
        self.read().get(&id).cloned().ok_or_else(|| not_found(id))
    }

    /// All jobs, oldest first.
    pub fn list(&self) -> Vec<JobRecord> {
        let mut jobs: Vec<JobRecord> = self.read().values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        jobs
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub(crate) fn update<T>(
        &self,
        id: JobId,
        f: impl FnOnce(&mut JobRecord) -> T,
    ) -> PipelineResult<T> {
        let mut jobs = self.write();
        let record = jobs.get_mut(&id).ok_or_else(|| not_found(id))?;
        let out = f(record);
        record.updated_at = Utc::now();
        Ok(out)
    }

    /// Move a queued job to running. Fails if it was cancelled or already ran.
    pub(crate) fn begin(&self, id: JobId) -> PipelineResult<()> {
        self.update(id, |record| match record.status {
            JobStatus::Queued if !record.cancel_requested => {
                record.status = JobStatus::Running;
                Ok(())
            }
            JobStatus::Queued | JobStatus::Cancelled => Err(PipelineError::Cancelled {
                id: id.to_string(),
            }),
            status => Err(PipelineError::JobState {
                id: id.to_string(),
                status: status.to_string(),
            }),
        })?
    }

    /// Enter a stage. Progress never goes down.
    pub(crate) fn advance(&self, id: JobId, stage: Stage) -> PipelineResult<()> {
        self.update(id, |record| {
            if record.stage != stage {
                record.stage_started_at = Some(Utc::now());
            }
            record.stage = stage;
            record.progress = record.progress.max(stage.progress());
        })
    }

    pub(crate) fn fail(&self, id: JobId, error: &PipelineError) -> PipelineResult<()> {
        self.update(id, |record| {
            record.status = JobStatus::Failed;
            record.error = Some(error.to_string());
            record.error_code = Some(error.code().to_string());
            record.completed_at = Some(Utc::now());
        })
    }

    pub(crate) fn mark_cancelled(&self, id: JobId) -> PipelineResult<()> {
        self.update(id, |record| {
            record.status = JobStatus::Cancelled;
            record.completed_at = Some(Utc::now());
        })
    }

    pub(crate) fn is_cancel_requested(&self, id: JobId) -> bool {
        self.read()
            .get(&id)
            .is_some_and(|record| record.cancel_requested)
    }

    /// Ask a job to stop at its next stage boundary.
    ///
    /// A queued job is cancelled at once; a finished job is left alone.
    /// Returns the status after the request.
    pub fn request_cancel(&self, id: JobId) -> PipelineResult<JobStatus> {
        self.update(id, |record| {
            match record.status {
                JobStatus::Queued => {
                    record.cancel_requested = true;
                    record.status = JobStatus::Cancelled;
                    record.completed_at = Some(Utc::now());
                }
                JobStatus::Running => record.cancel_requested = true,
                JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => {}
            }
            record.status
        })
    }
}

fn not_found(id: JobId) -> PipelineError {
    PipelineError::JobNotFound { id: id.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(registry: &JobRegistry) -> JobId {
        registry.insert(JobRecord::new(
            JobKind::Text,
            GenerationMode::Fast,
            Some("a lamp".into()),
        ))
    }

    #[test]
    fn test_job_id_parse_and_display() {
        let id = JobId::new();
        assert_eq!(id.to_string().parse::<JobId>().unwrap(), id);
        assert!("not-a-uuid".parse::<JobId>().is_err());
    }

    #[test]
    fn test_stage_progress_is_monotonic() {
        let stages = [
            Stage::Queued,
            Stage::TextToImage,
            Stage::Preprocessing,
            Stage::ImageToMesh,
            Stage::Postprocessing,
            Stage::Completed,
        ];
        let progress: Vec<u8> = stages.iter().map(|s| s.progress()).collect();
        assert_eq!(progress, vec![0, 10, 40, 60, 85, 100]);
        assert_eq!(Stage::TextToImage.to_string(), "textToImage");
    }

    #[test]
    fn test_unknown_job_is_not_found() {
        let registry = JobRegistry::new();
        let err = registry.get(JobId::new()).unwrap_err();
        assert_eq!(err.to_string(), "Job not found");
    }

    #[test]
    fn test_advance_never_lowers_progress() {
        let registry = JobRegistry::new();
        let id = queued(&registry);
        registry.begin(id).unwrap();
        registry.advance(id, Stage::ImageToMesh).unwrap();
        registry.advance(id, Stage::Preprocessing).unwrap();
        let record = registry.get(id).unwrap();
        assert_eq!(record.progress, 60);
        assert_eq!(record.status, JobStatus::Running);
    }

    #[test]
    fn test_failure_keeps_stage() {
        let registry = JobRegistry::new();
        let id = queued(&registry);
        registry.begin(id).unwrap();
        registry.advance(id, Stage::Preprocessing).unwrap();
        let err = PipelineError::Image {
            details: "truncated".into(),
        };
        registry.fail(id, &err).unwrap();

        let record = registry.get(id).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.stage, Stage::Preprocessing);
        assert_eq!(record.error.as_deref(), Some("image error: truncated"));
        assert_eq!(record.error_code.as_deref(), Some("FORGE-5002"));
        assert!(record.completed_at.is_some());
    }

    #[test]
    fn test_cancel_queued_and_running() {
        let registry = JobRegistry::new();
        let waiting = queued(&registry);
        assert_eq!(registry.request_cancel(waiting).unwrap(), JobStatus::Cancelled);
        assert!(matches!(
            registry.begin(waiting),
            Err(PipelineError::Cancelled { .. })
        ));

        let running = queued(&registry);
        registry.begin(running).unwrap();
        assert_eq!(registry.request_cancel(running).unwrap(), JobStatus::Running);
        assert!(registry.is_cancel_requested(running));
    }

    #[test]
    fn test_list_is_oldest_first() {
        let registry = JobRegistry::new();
        let first = queued(&registry);
        let second = queued(&registry);
        let listed: Vec<JobId> = registry.list().iter().map(|r| r.id).collect();
        assert_eq!(listed.len(), 2);
        if registry.get(first).unwrap().created_at < registry.get(second).unwrap().created_at {
            assert_eq!(listed, vec![first, second]);
        }
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = JobRecord::new(JobKind::Image, GenerationMode::Quality, None);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "queued");
        assert_eq!(json["stage"], "queued");
        assert_eq!(json["mode"], "quality");
        assert!(json.get("createdAt").is_some());
        assert!(json.get("cancelRequested").is_none());
    }
}
