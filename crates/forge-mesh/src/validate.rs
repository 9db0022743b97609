//! Mesh quality report.

use std::fmt;

use crate::adjacency::MeshAdjacency;
use crate::{Mesh, Triangle};

/// Summary of a mesh's topology and geometry.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "pipeline-config", derive(serde::Serialize))]
pub struct MeshReport {
    pub vertex_count: usize,
    pub face_count: usize,
    pub boundary_edge_count: usize,
    pub non_manifold_edge_count: usize,
    pub degenerate_face_count: usize,
    pub component_count: usize,
    pub is_watertight: bool,
    pub is_manifold: bool,
    pub has_normals: bool,
    pub has_uvs: bool,
    pub has_texture: bool,
    pub bounds: Option<([f64; 3], [f64; 3])>,
    pub surface_area: f64,
    /// Enclosed volume; only meaningful for watertight meshes.
    pub volume: f64,
}

impl MeshReport {
    /// Closed, manifold and free of degenerate faces.
    pub fn is_printable(&self) -> bool {
        self.is_watertight && self.is_manifold && self.degenerate_face_count == 0
    }
}

impl fmt::Display for MeshReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "vertices:            {}", self.vertex_count)?;
        writeln!(f, "faces:               {}", self.face_count)?;
        writeln!(f, "components:          {}", self.component_count)?;
        writeln!(f, "boundary edges:      {}", self.boundary_edge_count)?;
        writeln!(f, "non-manifold edges:  {}", self.non_manifold_edge_count)?;
        writeln!(f, "degenerate faces:    {}", self.degenerate_face_count)?;
        writeln!(f, "watertight:          {}", self.is_watertight)?;
        writeln!(f, "manifold:            {}", self.is_manifold)?;
        writeln!(f, "normals / uvs:       {} / {}", self.has_normals, self.has_uvs)?;
        writeln!(f, "texture:             {}", self.has_texture)?;
        if let Some((min, max)) = self.bounds {
            writeln!(
                f,
                "bounds:              [{:.4}, {:.4}, {:.4}] .. [{:.4}, {:.4}, {:.4}]",
                min[0], min[1], min[2], max[0], max[1], max[2]
            )?;
        }
        writeln!(f, "surface area:        {:.6}", self.surface_area)?;
        write!(f, "volume:              {:.6}", self.volume)
    }
}

/// Build a [`MeshReport`].
pub fn validate_mesh(mesh: &Mesh) -> MeshReport {
    let adjacency = MeshAdjacency::build(&mesh.faces);
    let valid: Vec<[u32; 3]> = mesh
        .faces
        .iter()
        .copied()
        .filter(|f| f.iter().all(|&v| (v as usize) < mesh.vertices.len()))
        .collect();
    let triangles: Vec<Triangle> = valid
        .iter()
        .map(|f| {
            Triangle::new(
                mesh.vertices[f[0] as usize].position,
                mesh.vertices[f[1] as usize].position,
                mesh.vertices[f[2] as usize].position,
            )
        })
        .collect();

    let invalid = mesh.faces.len() - valid.len();
    let degenerate_face_count = invalid
        + triangles
            .iter()
            .filter(|t| t.is_degenerate(f64::EPSILON))
            .count();

    MeshReport {
        vertex_count: mesh.vertex_count(),
        face_count: mesh.face_count(),
        boundary_edge_count: adjacency.boundary_edge_count(),
        non_manifold_edge_count: adjacency.non_manifold_edge_count(),
        degenerate_face_count,
        component_count: count_components(mesh),
        is_watertight: !mesh.faces.is_empty() && adjacency.is_watertight(),
        is_manifold: adjacency.is_manifold(),
        has_normals: mesh.has_normals(),
        has_uvs: mesh.has_uvs(),
        has_texture: mesh.texture.is_some(),
        bounds: mesh
            .bounds()
            .map(|(min, max)| ([min.x, min.y, min.z], [max.x, max.y, max.z])),
        surface_area: triangles.iter().map(Triangle::area).sum(),
        volume: mesh.faces_signed_volume(valid.iter()).abs(),
    }
}

/// Face-connected components, counted with union-find over vertices.
fn count_components(mesh: &Mesh) -> usize {
    let n = mesh.vertices.len();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }

    let mut used = vec![false; n];
    for f in &mesh.faces {
        if f.iter().any(|&v| v as usize >= n) {
            continue;
        }
        for &v in f {
            used[v as usize] = true;
        }
        let root = find(&mut parent, f[0] as usize);
        for &v in &f[1..] {
            let r = find(&mut parent, v as usize);
            if r != root {
                parent[r] = root;
            }
        }
    }

    (0..n)
        .filter(|&v| used[v] && find(&mut parent, v) == v)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_tetrahedron(offset: f64) -> (Vec<[f64; 3]>, Vec<[u32; 3]>) {
        (
            vec![
                [offset, 0.0, 0.0],
                [offset + 1.0, 0.0, 0.0],
                [offset, 1.0, 0.0],
                [offset, 0.0, 1.0],
            ],
            vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]],
        )
    }

    #[test]
    fn test_closed_tetrahedron() {
        let (v, f) = make_tetrahedron(0.0);
        let report = validate_mesh(&Mesh::from_raw(&v, &f));
        assert!(report.is_watertight);
        assert!(report.is_manifold);
        assert!(report.is_printable());
        assert_eq!(report.component_count, 1);
        assert!((report.volume - 1.0 / 6.0).abs() < 1e-12);
        assert_eq!(report.bounds, Some(([0.0, 0.0, 0.0], [1.0, 1.0, 1.0])));
    }

    #[test]
    fn test_two_components_and_open_edges() {
        let (mut v, mut f) = make_tetrahedron(0.0);
        let (v2, f2) = make_tetrahedron(5.0);
        v.extend(v2);
        f.extend(f2.iter().take(3).map(|t| t.map(|i| i + 4)));
        let report = validate_mesh(&Mesh::from_raw(&v, &f));
        assert_eq!(report.component_count, 2);
        assert_eq!(report.boundary_edge_count, 3);
        assert!(!report.is_watertight);
        assert!(!report.is_printable());
    }

    #[test]
    fn test_degenerate_faces_counted() {
        let mesh = Mesh::from_raw(
            &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0]],
            &[[0, 1, 2], [0, 1, 7]],
        );
        let report = validate_mesh(&mesh);
        assert_eq!(report.degenerate_face_count, 2);
    }

    #[test]
    fn test_empty_mesh() {
        let report = validate_mesh(&Mesh::new());
        assert_eq!(report.component_count, 0);
        assert!(!report.is_watertight);
        assert!(report.bounds.is_none());
        assert!(report.to_string().contains("faces:"));
    }
}
