//! Uniform Laplacian smoothing.

use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use tracing::debug;

use crate::adjacency::MeshAdjacency;
use crate::repair::compute_vertex_normals;
use crate::Mesh;

/// Parameters for Laplacian smoothing.
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct SmoothParams {
    /// Number of passes. Larger counts visibly erode detail.
    /// Default: 2
    pub iterations: usize,
    /// Fraction of the way each vertex moves toward its one-ring centroid per pass.
    /// Default: 0.5
    pub lambda: f64,
}

impl Default for SmoothParams {
    fn default() -> Self {
        Self {
            iterations: 2,
            lambda: 0.5,
        }
    }
}

/// Smooth `iterations` times with the default step factor.
pub fn smooth(mesh: &Mesh, iterations: usize) -> Mesh {
    let mut out = mesh.clone();
    smooth_mesh(
        &mut out,
        &SmoothParams {
            iterations,
            ..Default::default()
        },
    );
    out
}

/// Move each interior vertex toward the centroid of its one-ring neighbors.
///
/// Boundary vertices and vertices on non-manifold edges stay in place, so open
/// meshes do not shrink away from their outline. Every pass reads the previous
/// pass's positions only, so vertex updates are computed in parallel.
pub fn smooth_mesh(mesh: &mut Mesh, params: &SmoothParams) {
    if mesh.faces.is_empty() || params.iterations == 0 {
        return;
    }

    let adjacency = MeshAdjacency::build(&mesh.faces);
    let mut pinned = vec![false; mesh.vertices.len()];
    for (&(a, b), faces) in &adjacency.edge_to_faces {
        if faces.len() != 2 {
            pinned[a as usize] = true;
            pinned[b as usize] = true;
        }
    }

    let rings: Vec<Vec<u32>> = (0..mesh.vertices.len() as u32)
        .into_par_iter()
        .map(|v| {
            if pinned[v as usize] {
                Vec::new()
            } else {
                adjacency.vertex_neighbors(&mesh.faces, v)
            }
        })
        .collect();

    let mut positions: Vec<Point3<f64>> = mesh.vertices.iter().map(|v| v.position).collect();
    for _ in 0..params.iterations {
        positions = rings
            .par_iter()
            .zip(positions.par_iter())
            .map(|(ring, p)| {
                if ring.is_empty() {
                    return *p;
                }
                let sum = ring
                    .iter()
                    .fold(Vector3::zeros(), |acc, &u| acc + positions[u as usize].coords);
                let centroid = sum / ring.len() as f64;
                Point3::from(p.coords + (centroid - p.coords) * params.lambda)
            })
            .collect();
    }

    for (vertex, p) in mesh.vertices.iter_mut().zip(positions) {
        vertex.position = p;
    }
    if mesh.has_normals() {
        compute_vertex_normals(mesh);
    }

    debug!(
        iterations = params.iterations,
        lambda = params.lambda,
        pinned = pinned.iter().filter(|&&p| p).count(),
        "Laplacian smoothing complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bumpy_grid() -> Mesh {
        let n = 4u32;
        let mut positions = Vec::new();
        for y in 0..=n {
            for x in 0..=n {
                let z = if x == 2 && y == 2 { 1.0 } else { 0.0 };
                positions.push([x as f64, y as f64, z]);
            }
        }
        let mut faces = Vec::new();
        for y in 0..n {
            for x in 0..n {
                let i = y * (n + 1) + x;
                faces.push([i, i + 1, i + n + 2]);
                faces.push([i, i + n + 2, i + n + 1]);
            }
        }
        Mesh::from_raw(&positions, &faces)
    }

    #[test]
    fn test_spike_is_flattened() {
        let mesh = bumpy_grid();
        let smoothed = smooth(&mesh, 2);
        let peak = smoothed.vertices[12].position.z;
        assert!(peak < 1.0);
        assert!(peak > 0.0);
    }

    #[test]
    fn test_boundary_is_pinned() {
        let mesh = bumpy_grid();
        let smoothed = smooth(&mesh, 5);
        for i in [0usize, 1, 2, 3, 4, 5, 9, 10, 14, 20, 24] {
            assert_eq!(smoothed.vertices[i].position, mesh.vertices[i].position);
        }
    }

    #[test]
    fn test_zero_iterations_is_identity() {
        let mesh = bumpy_grid();
        assert_eq!(smooth(&mesh, 0), mesh);
    }

    #[test]
    fn test_flat_interior_stays_flat() {
        let mut mesh = bumpy_grid();
        mesh.vertices[12].position.z = 0.0;
        let smoothed = smooth(&mesh, 3);
        for v in &smoothed.vertices {
            assert!(v.position.z.abs() < 1e-12);
        }
    }
}
