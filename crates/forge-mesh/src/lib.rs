//! Geometry stage of the forge text/photo to 3D pipeline.
//!
//! Raw reconstructions come out of the image-to-mesh model with duplicated
//! vertices, slivers, flipped patches and small holes. This crate repairs
//! them, brings them to a face budget, normalizes their scale, gives them
//! texture coordinates and a texture, and writes them as binary glTF.
//!
//! # Features
//!
//! - **Repair**: weld vertices, drop degenerate and duplicate faces, orient
//!   components outward, fill small holes
//! - **Operators**: quadric-error decimation, Laplacian smoothing, one-to-four
//!   subdivision (midpoint or Loop)
//! - **Remeshing**: triangle and quad-dominant targets, unit normalization
//! - **Texturing**: box-projected UVs, front-view atlas, procedural fallback
//! - **I/O**: GLB with embedded PNG texture
//!
//! # Coordinate System
//!
//! Face winding is **counter-clockwise (CCW) when viewed from outside** the
//! mesh, so normals point outward by the right-hand rule.
//!
//! # Quick Start
//!
//! ```no_run
//! use forge_mesh::{Topology, load_glb, remesh, save_glb};
//!
//! let raw = load_glb("job_raw.glb").unwrap();
//! let result = remesh(&raw, Topology::Triangle, 15_000).unwrap();
//! println!(
//!     "{} -> {} faces",
//!     result.stats.original_face_count, result.stats.new_face_count
//! );
//! save_glb(&result.mesh, "job.glb").unwrap();
//! ```
//!
//! # Feature Flags
//!
//! - `pipeline-config` (default): serde support for parameter structs and reports

mod error;
pub mod tracing_ext;
mod types;

pub mod adjacency;
pub mod atlas;
pub mod decimate;
pub mod glb;
pub mod holes;
pub mod remesh;
pub mod repair;
pub mod smooth;
pub mod subdivide;
pub mod uv;
pub mod validate;
pub mod winding;

pub use error::{ErrorCode, MeshError, MeshResult};
pub use types::{Mesh, Triangle, Vertex};

pub use adjacency::MeshAdjacency;

pub use atlas::{
    RENDER_VIEW_ANGLES, TextureSource, TextureStyle, TextureView, composite_atlas,
    procedural_texture, texture_or_fallback,
};
pub use decimate::{DecimateParams, DecimateResult, decimate, decimate_mesh};
pub use glb::{from_glb_bytes, load_glb, save_glb, to_glb_bytes};
pub use holes::{BoundaryLoop, detect_holes, fill_holes, fill_holes_with_max_edges};
pub use remesh::{
    PostprocessParams, RemeshParams, RemeshQuality, RemeshResult, RemeshStats, Topology,
    normalize, postprocess, remesh, remesh_with_config,
};
pub use repair::{
    RepairParams, RepairReport, compute_vertex_normals, remove_degenerate_triangles,
    remove_duplicate_faces, remove_invalid_faces, remove_unreferenced_vertices, repair_mesh,
    repair_mesh_with_config, weld_vertices,
};
pub use smooth::{SmoothParams, smooth, smooth_mesh};
pub use subdivide::{SubdivideParams, SubdivideResult, subdivide, subdivide_mesh};
pub use uv::{ensure_uvs, project_uv_box};
pub use validate::{MeshReport, validate_mesh};
pub use winding::fix_winding_order;
