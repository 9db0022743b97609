//! Mesh repair operations.
//!
//! [`repair_mesh_with_config`] runs the full sequence in a fixed order:
//!
//! 1. drop faces with out-of-range indices
//! 2. weld vertices closer than `weld_epsilon`
//! 3. drop degenerate faces (repeated indices, area below `area_epsilon`)
//! 4. drop duplicate faces (same vertex set, either winding)
//! 5. orient faces consistently and outward
//! 6. fill boundary loops of at most `max_hole_edges` edges
//! 7. drop unreferenced vertices and recompute vertex normals
//!
//! Repair never fails. Non-manifold edges are left in place and counted in the
//! report. Running it twice gives the same mesh as running it once.

use hashbrown::{HashMap, HashSet};
use nalgebra::{Point3, Vector3};
use tracing::{debug, info, warn};

use crate::adjacency::MeshAdjacency;
use crate::holes::fill_holes_with_max_edges;
use crate::tracing_ext::OperationTimer;
use crate::winding::fix_winding_order;
use crate::{Mesh, Triangle};

/// Configuration for mesh repair.
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct RepairParams {
    /// Distance below which two vertices are merged.
    ///
    /// Reconstruction oracles export each face with its own vertex copies;
    /// welding restores the shared topology.
    /// Default: 1e-6
    pub weld_epsilon: f64,

    /// Faces with area at or below this value are removed.
    /// Default: 1e-12
    pub area_epsilon: f64,

    /// Make winding consistent and outward.
    /// Default: true
    pub orient: bool,

    /// Fill small boundary loops.
    /// Default: true
    pub fill_holes: bool,

    /// Largest boundary loop (in edges) that is filled.
    /// Default: 8
    pub max_hole_edges: usize,

    /// Recompute area-weighted vertex normals.
    /// Default: true
    pub compute_normals: bool,
}

impl Default for RepairParams {
    fn default() -> Self {
        Self {
            weld_epsilon: 1e-6,
            area_epsilon: 1e-12,
            orient: true,
            fill_holes: true,
            max_hole_edges: 8,
            compute_normals: true,
        }
    }
}

impl RepairParams {
    /// Settings for raw oracle output, which arrives in roughly unit scale
    /// with float32 noise in duplicated vertices.
    pub fn for_reconstruction() -> Self {
        Self {
            weld_epsilon: 1e-5,
            ..Default::default()
        }
    }

    /// Cleanup only: no reorientation and no new geometry.
    pub fn conservative() -> Self {
        Self {
            orient: false,
            fill_holes: false,
            ..Default::default()
        }
    }
}

/// What a repair pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "pipeline-config", derive(serde::Serialize))]
pub struct RepairReport {
    pub initial_vertices: usize,
    pub initial_faces: usize,
    pub final_vertices: usize,
    pub final_faces: usize,
    pub invalid_faces_removed: usize,
    pub vertices_welded: usize,
    pub degenerate_faces_removed: usize,
    pub duplicate_faces_removed: usize,
    pub faces_reoriented: usize,
    pub holes_filled: usize,
    pub unreferenced_vertices_removed: usize,
    /// Edges shared by more than two faces after repair. Reported, not fixed.
    pub non_manifold_edges: usize,
}

impl RepairReport {
    /// The output still has quality problems worth surfacing.
    pub fn has_warnings(&self) -> bool {
        self.non_manifold_edges > 0
    }

    /// The pass changed nothing.
    pub fn is_noop(&self) -> bool {
        self.invalid_faces_removed == 0
            && self.vertices_welded == 0
            && self.degenerate_faces_removed == 0
            && self.duplicate_faces_removed == 0
            && self.faces_reoriented == 0
            && self.holes_filled == 0
            && self.unreferenced_vertices_removed == 0
    }
}

/// Repair a mesh with default settings, returning the repaired copy.
pub fn repair_mesh(mesh: &Mesh) -> Mesh {
    let mut out = mesh.clone();
    repair_mesh_with_config(&mut out, &RepairParams::default());
    out
}

/// Repair a mesh in place.
pub fn repair_mesh_with_config(mesh: &mut Mesh, params: &RepairParams) -> RepairReport {
    let _timer = OperationTimer::with_mesh("repair", mesh);

    let mut report = RepairReport {
        initial_vertices: mesh.vertex_count(),
        initial_faces: mesh.face_count(),
        ..Default::default()
    };

    report.invalid_faces_removed = remove_invalid_faces(mesh);
    report.vertices_welded = weld_vertices(mesh, params.weld_epsilon);
    report.degenerate_faces_removed = remove_degenerate_triangles(mesh, params.area_epsilon);
    report.duplicate_faces_removed = remove_duplicate_faces(mesh);

    if params.orient {
        report.faces_reoriented = fix_winding_order(mesh);
    }

    if params.fill_holes {
        report.holes_filled = fill_holes_with_max_edges(
            mesh,
            params.max_hole_edges,
            params.area_epsilon,
            params.weld_epsilon,
        );
        // Fills can close a component, which makes its volume sign meaningful.
        if report.holes_filled > 0 && params.orient {
            report.faces_reoriented += fix_winding_order(mesh);
        }
    }

    report.unreferenced_vertices_removed = remove_unreferenced_vertices(mesh);

    if params.compute_normals {
        compute_vertex_normals(mesh);
    }

    let adjacency = MeshAdjacency::build(&mesh.faces);
    report.non_manifold_edges = adjacency.non_manifold_edge_count();
    report.final_vertices = mesh.vertex_count();
    report.final_faces = mesh.face_count();

    if report.has_warnings() {
        warn!(
            non_manifold_edges = report.non_manifold_edges,
            "Mesh has non-manifold edges after repair"
        );
    }

    info!(
        vertices_before = report.initial_vertices,
        vertices_after = report.final_vertices,
        faces_before = report.initial_faces,
        faces_after = report.final_faces,
        welded = report.vertices_welded,
        degenerate = report.degenerate_faces_removed,
        duplicates = report.duplicate_faces_removed,
        reoriented = report.faces_reoriented,
        holes = report.holes_filled,
        "Repair complete"
    );

    report
}

/// Remove faces that reference vertices past the end of the vertex list.
pub fn remove_invalid_faces(mesh: &mut Mesh) -> usize {
    let n = mesh.vertices.len() as u32;
    let before = mesh.faces.len();
    mesh.faces.retain(|f| f.iter().all(|&i| i < n));
    let removed = before - mesh.faces.len();
    if removed > 0 {
        debug!(removed, "Removed faces with out-of-range indices");
    }
    removed
}

/// Merge vertices closer than `epsilon`.
///
/// Vertices are visited in index order; each one maps onto the lowest-index
/// kept vertex within `epsilon`, or is kept itself. Kept vertices are
/// therefore pairwise further apart than `epsilon`, and their positions do not
/// move. Merged vertices stay in the list unreferenced until compaction.
///
/// Returns the number of vertices merged away.
pub fn weld_vertices(mesh: &mut Mesh, epsilon: f64) -> usize {
    if mesh.vertices.is_empty() || epsilon <= 0.0 {
        return 0;
    }

    let cell_size = epsilon;
    let eps_sq = epsilon * epsilon;
    let mut grid: HashMap<(i64, i64, i64), Vec<u32>> = HashMap::new();
    let mut remap: Vec<u32> = (0..mesh.vertices.len() as u32).collect();
    let mut merged = 0usize;

    for i in 0..mesh.vertices.len() {
        let p = mesh.vertices[i].position;
        if !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()) {
            continue;
        }
        let cell = pos_to_cell(&p, cell_size);

        let mut target: Option<u32> = None;
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let key = (cell.0 + dx, cell.1 + dy, cell.2 + dz);
                    let Some(bucket) = grid.get(&key) else {
                        continue;
                    };
                    for &j in bucket {
                        let q = mesh.vertices[j as usize].position;
                        if (p - q).norm_squared() <= eps_sq && target.is_none_or(|t| j < t) {
                            target = Some(j);
                        }
                    }
                }
            }
        }

        match target {
            Some(j) => {
                remap[i] = j;
                merged += 1;
            }
            None => grid.entry(cell).or_default().push(i as u32),
        }
    }

    if merged > 0 {
        for face in &mut mesh.faces {
            for idx in face.iter_mut() {
                *idx = remap[*idx as usize];
            }
        }
        debug!(merged, epsilon, "Welded vertices");
    }

    merged
}

/// Remove faces with repeated indices or area at or below `area_epsilon`.
pub fn remove_degenerate_triangles(mesh: &mut Mesh, area_epsilon: f64) -> usize {
    let before = mesh.faces.len();
    let vertices = &mesh.vertices;
    mesh.faces.retain(|f| {
        if f[0] == f[1] || f[1] == f[2] || f[0] == f[2] {
            return false;
        }
        let tri = Triangle::new(
            vertices[f[0] as usize].position,
            vertices[f[1] as usize].position,
            vertices[f[2] as usize].position,
        );
        !tri.is_degenerate(area_epsilon)
    });
    let removed = before - mesh.faces.len();
    if removed > 0 {
        debug!(removed, "Removed degenerate faces");
    }
    removed
}

/// Remove faces that repeat an earlier face's vertex set, in either winding.
pub fn remove_duplicate_faces(mesh: &mut Mesh) -> usize {
    let before = mesh.faces.len();
    let mut seen: HashSet<[u32; 3]> = HashSet::with_capacity(before);
    mesh.faces.retain(|f| {
        let mut key = *f;
        key.sort_unstable();
        seen.insert(key)
    });
    let removed = before - mesh.faces.len();
    if removed > 0 {
        debug!(removed, "Removed duplicate faces");
    }
    removed
}

/// Remove vertices not referenced by any face, preserving vertex order.
pub fn remove_unreferenced_vertices(mesh: &mut Mesh) -> usize {
    let mut referenced = vec![false; mesh.vertices.len()];
    for face in &mesh.faces {
        for &i in face {
            referenced[i as usize] = true;
        }
    }

    let mut remap = vec![u32::MAX; mesh.vertices.len()];
    let mut next = 0u32;
    for (i, &used) in referenced.iter().enumerate() {
        if used {
            remap[i] = next;
            next += 1;
        }
    }

    let removed = mesh.vertices.len() - next as usize;
    if removed == 0 {
        return 0;
    }

    let mut keep = referenced.iter();
    mesh.vertices.retain(|_| keep.next().copied().unwrap_or(false));
    for face in &mut mesh.faces {
        for idx in face.iter_mut() {
            *idx = remap[*idx as usize];
        }
    }

    debug!(removed, "Removed unreferenced vertices");
    removed
}

/// Compute area-weighted vertex normals from face normals.
///
/// Vertices whose incident faces cancel out get `None`.
pub fn compute_vertex_normals(mesh: &mut Mesh) {
    let mut sums = vec![Vector3::zeros(); mesh.vertices.len()];
    for face in &mesh.faces {
        let tri = Triangle::new(
            mesh.vertices[face[0] as usize].position,
            mesh.vertices[face[1] as usize].position,
            mesh.vertices[face[2] as usize].position,
        );
        let n = tri.normal_unnormalized();
        for &i in face {
            sums[i as usize] += n;
        }
    }

    for (vertex, sum) in mesh.vertices.iter_mut().zip(sums) {
        let len = sum.norm();
        vertex.normal = (len > f64::EPSILON && len.is_finite()).then(|| sum / len);
    }
}

#[inline]
fn pos_to_cell(p: &Point3<f64>, cell_size: f64) -> (i64, i64, i64) {
    (
        (p.x / cell_size).floor() as i64,
        (p.y / cell_size).floor() as i64,
        (p.z / cell_size).floor() as i64,
    )
}
