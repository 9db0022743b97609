//! Error types for the generation pipeline.
//!
//! Each error has a unique code in the format `FORGE-XXXX`:
//! - `FORGE-1xxx`: Request validation (surfaced before a job exists)
//! - `FORGE-2xxx`: Model residency and memory budget
//! - `FORGE-3xxx`: External model calls
//! - `FORGE-4xxx`: Geometry stage failures
//! - `FORGE-5xxx`: Artifacts, images and configuration
//! - `FORGE-6xxx`: Job registry

use std::path::PathBuf;

use forge_mesh::MeshError;
use miette::Diagnostic;
use thiserror::Error;

use crate::resource::ModelKind;

/// Result type alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Machine-readable error codes for pipeline operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// FORGE-1001: Prompt missing, blank or too long
    InvalidPrompt = 1001,
    /// FORGE-1002: Upload has no name or a disallowed extension
    InvalidUpload = 1002,
    /// FORGE-1003: Upload exceeds the size cap
    UploadTooLarge = 1003,

    /// FORGE-2001: Model cost exceeds the whole budget
    BudgetExceeded = 2001,
    /// FORGE-2002: Model failed to load
    LoadFailed = 2002,
    /// FORGE-2003: Timed out waiting for a model
    AcquireTimeout = 2003,

    /// FORGE-3001: External model call failed
    OracleFailed = 3001,

    /// FORGE-4001: Mesh could not be processed
    Geometry = 4001,

    /// FORGE-5001: Artifact could not be read or written
    Io = 5001,
    /// FORGE-5002: Image could not be decoded or encoded
    Image = 5002,
    /// FORGE-5003: Configuration could not be parsed
    Config = 5003,

    /// FORGE-6001: No job with this id
    JobNotFound = 6001,
    /// FORGE-6002: Job was cancelled
    Cancelled = 6002,
    /// FORGE-6003: Job cannot be run from its current status
    JobState = 6003,
}

impl ErrorCode {
    /// Returns the error code as a string in the format `FORGE-XXXX`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidPrompt => "FORGE-1001",
            ErrorCode::InvalidUpload => "FORGE-1002",
            ErrorCode::UploadTooLarge => "FORGE-1003",
            ErrorCode::BudgetExceeded => "FORGE-2001",
            ErrorCode::LoadFailed => "FORGE-2002",
            ErrorCode::AcquireTimeout => "FORGE-2003",
            ErrorCode::OracleFailed => "FORGE-3001",
            ErrorCode::Geometry => "FORGE-4001",
            ErrorCode::Io => "FORGE-5001",
            ErrorCode::Image => "FORGE-5002",
            ErrorCode::Config => "FORGE-5003",
            ErrorCode::JobNotFound => "FORGE-6001",
            ErrorCode::Cancelled => "FORGE-6002",
            ErrorCode::JobState => "FORGE-6003",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rejected request. No job is created for it.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum ValidationError {
    #[error("Prompt is required")]
    #[diagnostic(code(forge::validation::prompt_missing))]
    PromptMissing,

    #[error("Prompt cannot be empty")]
    #[diagnostic(code(forge::validation::prompt_empty))]
    PromptEmpty,

    #[error("Prompt too long (max {max} chars)")]
    #[diagnostic(
        code(forge::validation::prompt_length),
        help("Shorten the description of the object")
    )]
    PromptTooLong { length: usize, max: usize },

    #[error("No file selected")]
    #[diagnostic(code(forge::validation::no_file))]
    NoFile,

    #[error("Invalid file type. Allowed: {}", .allowed.join(", "))]
    #[diagnostic(code(forge::validation::file_type))]
    UnsupportedFileType {
        extension: String,
        allowed: Vec<String>,
    },

    #[error("File too large ({size} bytes, max {max} bytes)")]
    #[diagnostic(code(forge::validation::file_size))]
    FileTooLarge { size: usize, max: usize },
}

/// Failure from an external model. The message is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
#[error("{message}")]
#[diagnostic(code(forge::oracle::failed))]
pub struct OracleError {
    /// Which oracle failed, e.g. `image-synthesis`.
    pub oracle: &'static str,
    pub message: String,
}

impl OracleError {
    pub fn new(oracle: &'static str, message: impl Into<String>) -> Self {
        Self {
            oracle,
            message: message.into(),
        }
    }
}

/// Errors that can occur while running the pipeline.
#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Validation(#[from] ValidationError),

    /// The model can never fit, no matter what is evicted.
    #[error("{kind} needs {cost} bytes but the memory budget is {budget} bytes")]
    #[diagnostic(
        code(forge::resource::budget),
        help("Raise the memory budget or lower the model cost in the configuration")
    )]
    BudgetExceeded { kind: ModelKind, cost: u64, budget: u64 },

    #[error("failed to load {kind}: {details}")]
    #[diagnostic(code(forge::resource::load))]
    LoadFailed { kind: ModelKind, details: String },

    #[error("timed out after {waited_ms} ms waiting for {kind}")]
    #[diagnostic(
        code(forge::resource::timeout),
        help("Another job holds the model; retry later or raise acquire_timeout_ms")
    )]
    AcquireTimeout { kind: ModelKind, waited_ms: u64 },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Oracle(#[from] OracleError),

    // No transparent forwarding: the inherent `MeshError::code` shadows
    // `Diagnostic::code`.
    #[error(transparent)]
    #[diagnostic(
        code(forge::mesh),
        help("The reconstruction produced geometry that could not be repaired")
    )]
    Mesh(#[from] MeshError),

    #[error("failed to access artifact {path}")]
    #[diagnostic(code(forge::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("image error: {details}")]
    #[diagnostic(code(forge::image))]
    Image { details: String },

    #[error("invalid configuration: {details}")]
    #[diagnostic(code(forge::config))]
    Config { details: String },

    #[error("Job not found")]
    #[diagnostic(code(forge::job::not_found))]
    JobNotFound { id: String },

    #[error("job {id} was cancelled")]
    #[diagnostic(code(forge::job::cancelled))]
    Cancelled { id: String },

    #[error("job {id} is already {status}")]
    #[diagnostic(code(forge::job::state))]
    JobState { id: String, status: String },
}

impl PipelineError {
    /// Returns the machine-readable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            PipelineError::Validation(err) => match err {
                ValidationError::PromptMissing
                | ValidationError::PromptEmpty
                | ValidationError::PromptTooLong { .. } => ErrorCode::InvalidPrompt,
                ValidationError::NoFile | ValidationError::UnsupportedFileType { .. } => {
                    ErrorCode::InvalidUpload
                }
                ValidationError::FileTooLarge { .. } => ErrorCode::UploadTooLarge,
            },
            PipelineError::BudgetExceeded { .. } => ErrorCode::BudgetExceeded,
            PipelineError::LoadFailed { .. } => ErrorCode::LoadFailed,
            PipelineError::AcquireTimeout { .. } => ErrorCode::AcquireTimeout,
            PipelineError::Oracle(_) => ErrorCode::OracleFailed,
            PipelineError::Mesh(err) if err.is_geometry() => ErrorCode::Geometry,
            PipelineError::Mesh(_) | PipelineError::Io { .. } => ErrorCode::Io,
            PipelineError::Image { .. } => ErrorCode::Image,
            PipelineError::Config { .. } => ErrorCode::Config,
            PipelineError::JobNotFound { .. } => ErrorCode::JobNotFound,
            PipelineError::Cancelled { .. } => ErrorCode::Cancelled,
            PipelineError::JobState { .. } => ErrorCode::JobState,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, PipelineError::Validation(_))
    }

    /// Memory budget could not be satisfied for a model.
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(
            self,
            PipelineError::BudgetExceeded { .. }
                | PipelineError::LoadFailed { .. }
                | PipelineError::AcquireTimeout { .. }
        )
    }

    pub fn is_geometry(&self) -> bool {
        matches!(self, PipelineError::Mesh(err) if err.is_geometry())
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn image(err: impl std::fmt::Display) -> Self {
        PipelineError::Image {
            details: err.to_string(),
        }
    }
}

impl From<image::ImageError> for PipelineError {
    fn from(err: image::ImageError) -> Self {
        PipelineError::image(err)
    }
}
