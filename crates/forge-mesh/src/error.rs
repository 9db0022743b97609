//! Error types for mesh operations with rich diagnostics.
//!
//! Each error has a unique code in the format `MESH-XXXX`:
//! - `MESH-1xxx`: I/O and container errors
//! - `MESH-2xxx`: Validation errors (empty meshes, bad indices)
//! - `MESH-3xxx`: Geometry operations that could not reach their goal

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for mesh operations.
pub type MeshResult<T> = Result<T, MeshError>;

/// Machine-readable error codes for mesh operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// MESH-1001: Failed to read file
    IoRead = 1001,
    /// MESH-1002: Failed to write file
    IoWrite = 1002,
    /// MESH-1003: Malformed or unsupported container
    ParseError = 1003,
    /// MESH-1004: Texture could not be encoded or decoded
    TextureError = 1004,

    /// MESH-2001: Face references invalid vertex index
    InvalidVertexIndex = 2001,
    /// MESH-2002: Mesh has no vertices or faces
    EmptyMesh = 2002,

    /// MESH-3001: Decimation could not reach its target
    DecimationFailed = 3001,
    /// MESH-3002: Remeshing failed
    RemeshingFailed = 3002,
}

impl ErrorCode {
    /// Returns the error code as a string in the format `MESH-XXXX`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::IoRead => "MESH-1001",
            ErrorCode::IoWrite => "MESH-1002",
            ErrorCode::ParseError => "MESH-1003",
            ErrorCode::TextureError => "MESH-1004",
            ErrorCode::InvalidVertexIndex => "MESH-2001",
            ErrorCode::EmptyMesh => "MESH-2002",
            ErrorCode::DecimationFailed => "MESH-3001",
            ErrorCode::RemeshingFailed => "MESH-3002",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that can occur during mesh operations.
#[derive(Debug, Error, Diagnostic)]
pub enum MeshError {
    /// Error reading from a file.
    #[error("failed to read mesh from {path}")]
    #[diagnostic(
        code(mesh::io::read),
        help("Check that the file exists and is readable")
    )]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error writing to a file.
    #[error("failed to write mesh to {path}")]
    #[diagnostic(
        code(mesh::io::write),
        help("Check that the directory exists and is writable")
    )]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed GLB container.
    #[error("failed to parse mesh container: {details}")]
    #[diagnostic(
        code(mesh::parse::error),
        help("Only binary glTF 2.0 files with a single triangle primitive are supported")
    )]
    ParseError { details: String },

    /// Texture image could not be encoded or decoded.
    #[error("texture error: {details}")]
    #[diagnostic(code(mesh::texture))]
    TextureError { details: String },

    /// Empty mesh (no vertices or faces).
    #[error("mesh is empty: {details}")]
    #[diagnostic(
        code(mesh::validation::empty),
        help("The reconstruction produced no usable surface. Check the input image.")
    )]
    EmptyMesh { details: String },

    /// Invalid vertex index in face data.
    #[error(
        "invalid vertex index: face {face_index} references vertex {vertex_index}, but mesh only has {vertex_count} vertices"
    )]
    #[diagnostic(
        code(mesh::validation::vertex_index),
        help("Run repair to drop faces with invalid vertex references")
    )]
    InvalidVertexIndex {
        face_index: usize,
        vertex_index: u32,
        vertex_count: usize,
    },

    /// Decimation stopped above its target because no legal collapse remained.
    #[error(
        "decimation stopped at {reached} faces, target was {target}: no legal collapse remains"
    )]
    #[diagnostic(
        code(mesh::decimate::failed),
        help("Raise the target face count or repair the mesh before decimation")
    )]
    DecimationFailed { target: usize, reached: usize },

    /// Remeshing failed.
    #[error("remeshing failed: {details}")]
    #[diagnostic(code(mesh::remesh::failed))]
    RemeshingFailed { details: String },
}

impl MeshError {
    /// Returns the machine-readable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            MeshError::IoRead { .. } => ErrorCode::IoRead,
            MeshError::IoWrite { .. } => ErrorCode::IoWrite,
            MeshError::ParseError { .. } => ErrorCode::ParseError,
            MeshError::TextureError { .. } => ErrorCode::TextureError,
            MeshError::EmptyMesh { .. } => ErrorCode::EmptyMesh,
            MeshError::InvalidVertexIndex { .. } => ErrorCode::InvalidVertexIndex,
            MeshError::DecimationFailed { .. } => ErrorCode::DecimationFailed,
            MeshError::RemeshingFailed { .. } => ErrorCode::RemeshingFailed,
        }
    }

    /// Geometry errors mean the mesh itself cannot satisfy the operation,
    /// as opposed to an I/O or container problem.
    pub fn is_geometry(&self) -> bool {
        matches!(
            self,
            MeshError::EmptyMesh { .. }
                | MeshError::InvalidVertexIndex { .. }
                | MeshError::DecimationFailed { .. }
                | MeshError::RemeshingFailed { .. }
        )
    }

    /// Create an IoRead error.
    pub fn io_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MeshError::IoRead {
            path: path.into(),
            source,
        }
    }

    /// Create an IoWrite error.
    pub fn io_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MeshError::IoWrite {
            path: path.into(),
            source,
        }
    }

    /// Create a ParseError.
    pub fn parse_error(details: impl Into<String>) -> Self {
        MeshError::ParseError {
            details: details.into(),
        }
    }

    /// Create an EmptyMesh error.
    pub fn empty_mesh(details: impl Into<String>) -> Self {
        MeshError::EmptyMesh {
            details: details.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ErrorCode::EmptyMesh.as_str(), "MESH-2002");
        assert_eq!(ErrorCode::DecimationFailed.to_string(), "MESH-3001");
    }

    #[test]
    fn test_error_display_and_code() {
        let err = MeshError::DecimationFailed {
            target: 10,
            reached: 14,
        };
        assert_eq!(err.code(), ErrorCode::DecimationFailed);
        assert!(err.to_string().contains("14 faces"));
        assert!(err.is_geometry());
    }

    #[test]
    fn test_io_is_not_geometry() {
        let err = MeshError::io_write(
            "/tmp/out.glb",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.code().as_str(), "MESH-1002");
        assert!(!err.is_geometry());
    }
}
