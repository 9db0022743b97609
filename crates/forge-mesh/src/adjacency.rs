//! Edge and vertex adjacency for indexed triangle meshes.
//!
//! Edges are keyed by `(min, max)` vertex index so both windings map to the
//! same entry. Face lists are kept in ascending face order, which keeps every
//! traversal built on top of them deterministic.

use hashbrown::HashMap;

/// Edge → faces and vertex → faces lookup tables.
#[derive(Debug, Clone, Default)]
pub struct MeshAdjacency {
    /// Faces incident to each undirected edge.
    pub edge_to_faces: HashMap<(u32, u32), Vec<u32>>,

    /// Faces incident to each vertex.
    pub vertex_to_faces: HashMap<u32, Vec<u32>>,
}

/// Canonical undirected key for the edge `a`-`b`.
#[inline]
pub fn edge_key(a: u32, b: u32) -> (u32, u32) {
    if a < b { (a, b) } else { (b, a) }
}

impl MeshAdjacency {
    /// Build adjacency from a face list.
    pub fn build(faces: &[[u32; 3]]) -> Self {
        let mut edge_to_faces: HashMap<(u32, u32), Vec<u32>> =
            HashMap::with_capacity(faces.len() * 3 / 2);
        let mut vertex_to_faces: HashMap<u32, Vec<u32>> = HashMap::with_capacity(faces.len() / 2);

        for (fi, face) in faces.iter().enumerate() {
            let fi = fi as u32;
            for k in 0..3 {
                let a = face[k];
                let b = face[(k + 1) % 3];
                edge_to_faces.entry(edge_key(a, b)).or_default().push(fi);

                let list = vertex_to_faces.entry(a).or_default();
                if list.last() != Some(&fi) {
                    list.push(fi);
                }
            }
        }

        Self {
            edge_to_faces,
            vertex_to_faces,
        }
    }

    /// Faces sharing the edge `a`-`b`.
    pub fn faces_of_edge(&self, a: u32, b: u32) -> &[u32] {
        self.edge_to_faces
            .get(&edge_key(a, b))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Faces touching vertex `v`.
    pub fn faces_of_vertex(&self, v: u32) -> &[u32] {
        self.vertex_to_faces
            .get(&v)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Edges with exactly one incident face.
    pub fn boundary_edges(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.edge_to_faces
            .iter()
            .filter(|(_, faces)| faces.len() == 1)
            .map(|(&e, _)| e)
    }

    /// Edges with more than two incident faces.
    pub fn non_manifold_edges(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.edge_to_faces
            .iter()
            .filter(|(_, faces)| faces.len() > 2)
            .map(|(&e, _)| e)
    }

    pub fn boundary_edge_count(&self) -> usize {
        self.boundary_edges().count()
    }

    pub fn non_manifold_edge_count(&self) -> usize {
        self.non_manifold_edges().count()
    }

    /// Every edge borders exactly two faces.
    pub fn is_watertight(&self) -> bool {
        !self.edge_to_faces.is_empty() && self.edge_to_faces.values().all(|f| f.len() == 2)
    }

    /// Every edge borders at most two faces.
    pub fn is_manifold(&self) -> bool {
        self.edge_to_faces.values().all(|f| f.len() <= 2)
    }

    /// Sorted one-ring neighbors of `v`.
    pub fn vertex_neighbors(&self, faces: &[[u32; 3]], v: u32) -> Vec<u32> {
        let mut out: Vec<u32> = self
            .faces_of_vertex(v)
            .iter()
            .flat_map(|&fi| faces[fi as usize])
            .filter(|&u| u != v)
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }
}
