//! Remeshing engine: re-topologize to a face budget and normalize scale.
//!
//! The quad path is a quad-dominant approximation: decimate to half the
//! budget, split every triangle one-to-four, then decimate to the budget.
//! The result is still a triangle mesh whose faces pair up into regular,
//! quad-like patches; it is not an exact quadrangulation.

use std::fmt;

use tracing::info;

use crate::decimate::{DecimateParams, decimate_mesh};
use crate::error::{MeshError, MeshResult};
use crate::repair::{RepairParams, repair_mesh_with_config};
use crate::smooth::{SmoothParams, smooth_mesh};
use crate::subdivide::{SubdivideParams, subdivide_mesh};
use crate::tracing_ext::{OperationTimer, log_mesh_stats};
use crate::Mesh;

/// Output face topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum Topology {
    #[default]
    Triangle,
    Quad,
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topology::Triangle => write!(f, "triangle"),
            Topology::Quad => write!(f, "quad"),
        }
    }
}

/// Face budget presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum RemeshQuality {
    Low,
    #[default]
    Medium,
    High,
}

impl RemeshQuality {
    /// Target face count for this preset.
    pub fn target_faces(self) -> usize {
        match self {
            RemeshQuality::Low => 5_000,
            RemeshQuality::Medium => 15_000,
            RemeshQuality::High => 50_000,
        }
    }
}

/// Vertex and face counts before and after remeshing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "pipeline-config", derive(serde::Serialize))]
#[cfg_attr(feature = "pipeline-config", serde(rename_all = "camelCase"))]
pub struct RemeshStats {
    pub original_vertex_count: usize,
    pub original_face_count: usize,
    pub new_vertex_count: usize,
    pub new_face_count: usize,
}

impl RemeshStats {
    fn between(before: &Mesh, after: &Mesh) -> Self {
        Self {
            original_vertex_count: before.vertex_count(),
            original_face_count: before.face_count(),
            new_vertex_count: after.vertex_count(),
            new_face_count: after.face_count(),
        }
    }
}

/// A remeshed mesh with its statistics.
#[derive(Debug)]
pub struct RemeshResult {
    pub mesh: Mesh,
    pub stats: RemeshStats,
}

/// Configuration for [`remesh_with_config`].
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct RemeshParams {
    pub topology: Topology,
    pub target_faces: usize,
    /// Largest bounding-box extent after normalization.
    /// Default: 1.0
    pub unit_size: f64,
    pub repair: RepairParams,
}

impl Default for RemeshParams {
    fn default() -> Self {
        Self {
            topology: Topology::Triangle,
            target_faces: RemeshQuality::default().target_faces(),
            unit_size: 1.0,
            repair: RepairParams::default(),
        }
    }
}

/// Remesh to `target_faces` with the given topology and unit scale.
pub fn remesh(mesh: &Mesh, topology: Topology, target_faces: usize) -> MeshResult<RemeshResult> {
    remesh_with_config(
        mesh,
        &RemeshParams {
            topology,
            target_faces,
            ..Default::default()
        },
    )
}

/// Remesh according to `params`.
///
/// Triangle topology decimates when the mesh has more faces than the target
/// and subdivides once when it has fewer than half; quad topology runs
/// decimate(target / 2), subdivide, decimate(target). Both finish with a
/// repair pass and [`normalize`].
///
/// Errors when the mesh has no faces after repair or when the final
/// decimation cannot reach the target.
pub fn remesh_with_config(mesh: &Mesh, params: &RemeshParams) -> MeshResult<RemeshResult> {
    let _timer = OperationTimer::with_mesh("remesh", mesh);
    let target = params.target_faces;

    let mut working = mesh.clone();
    repair_mesh_with_config(&mut working, &params.repair);
    require_faces(&working, "no faces left after repair")?;

    let mut working = match params.topology {
        Topology::Triangle => {
            let faces = working.face_count();
            if faces > target {
                decimate_mesh(&working, &DecimateParams::with_target_triangles(target))
                    .require_target()?
                    .mesh
            } else if faces < target / 2 {
                subdivide_mesh(&working, &SubdivideParams::midpoint()).mesh
            } else {
                working
            }
        }
        Topology::Quad => {
            let coarse =
                decimate_mesh(&working, &DecimateParams::with_target_triangles(target / 2)).mesh;
            let split = subdivide_mesh(&coarse, &SubdivideParams::midpoint()).mesh;
            decimate_mesh(&split, &DecimateParams::with_target_triangles(target))
                .require_target()?
                .mesh
        }
    };

    repair_mesh_with_config(&mut working, &params.repair);
    require_faces(&working, "no faces left after remeshing")?;
    normalize(&mut working, params.unit_size)?;

    let stats = RemeshStats::between(mesh, &working);
    info!(
        topology = %params.topology,
        target,
        original_vertices = stats.original_vertex_count,
        original_faces = stats.original_face_count,
        new_vertices = stats.new_vertex_count,
        new_faces = stats.new_face_count,
        "Remesh complete"
    );
    log_mesh_stats(&working, "remesh");

    Ok(RemeshResult {
        mesh: working,
        stats,
    })
}

/// Center the bounding box on the origin and scale uniformly so its largest
/// extent equals `unit_size`.
pub fn normalize(mesh: &mut Mesh, unit_size: f64) -> MeshResult<()> {
    let (min, max) = mesh
        .bounds()
        .ok_or_else(|| MeshError::empty_mesh("cannot normalize a mesh without vertices"))?;

    let center = (min.coords + max.coords) * 0.5;
    let extent = max - min;
    let largest = extent.x.max(extent.y).max(extent.z);
    if !(largest.is_finite() && largest > f64::EPSILON) {
        return Err(MeshError::RemeshingFailed {
            details: format!("cannot normalize a mesh with extent {largest}"),
        });
    }

    mesh.translate(-center);
    mesh.scale(unit_size / largest);
    Ok(())
}

/// Settings for the reconstruction post-processing chain.
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct PostprocessParams {
    pub smoothing_iterations: usize,
    pub target_faces: usize,
    pub unit_size: f64,
}

impl Default for PostprocessParams {
    fn default() -> Self {
        Self {
            smoothing_iterations: 2,
            target_faces: 50_000,
            unit_size: 1.0,
        }
    }
}

/// Repair, smooth, decimate to the face budget and normalize a raw
/// reconstruction.
pub fn postprocess(mesh: &Mesh, params: &PostprocessParams) -> MeshResult<RemeshResult> {
    let _timer = OperationTimer::with_mesh("postprocess", mesh);

    let mut working = mesh.clone();
    repair_mesh_with_config(&mut working, &RepairParams::for_reconstruction());
    require_faces(&working, "reconstruction has no faces after repair")?;

    smooth_mesh(
        &mut working,
        &SmoothParams {
            iterations: params.smoothing_iterations,
            ..Default::default()
        },
    );

    if working.face_count() > params.target_faces {
        working = decimate_mesh(
            &working,
            &DecimateParams::with_target_triangles(params.target_faces),
        )
        .require_target()?
        .mesh;
    }

    normalize(&mut working, params.unit_size)?;
    let stats = RemeshStats::between(mesh, &working);
    info!(
        original_faces = stats.original_face_count,
        new_faces = stats.new_face_count,
        smoothing = params.smoothing_iterations,
        "Post-processing complete"
    );

    Ok(RemeshResult {
        mesh: working,
        stats,
    })
}

fn require_faces(mesh: &Mesh, details: &str) -> MeshResult<()> {
    if mesh.faces.is_empty() {
        Err(MeshError::empty_mesh(details))
    } else {
        Ok(())
    }
}
