//! One-to-four triangle subdivision.
//!
//! Every triangle is split into four by inserting a vertex on each edge. With
//! smoothing enabled the new and old vertices are repositioned by Loop's
//! rules, the triangle counterpart of Catmull-Clark averaging; without it the
//! new vertices sit at edge midpoints and the surface keeps its exact shape.

use hashbrown::{HashMap, HashSet};
use nalgebra::Point3;

use crate::adjacency::{MeshAdjacency, edge_key};
use crate::repair::compute_vertex_normals;
use crate::{Mesh, Vertex};

/// Parameters for mesh subdivision.
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct SubdivideParams {
    /// Number of subdivision iterations.
    /// Each iteration quadruples the triangle count.
    /// Default: 1
    pub iterations: usize,
    /// Reposition vertices with Loop averaging.
    /// Default: true
    pub smooth: bool,
    /// Boundary vertices use the curve rule (3/4, 1/8, 1/8) instead of the
    /// interior rule, so open meshes do not pull away from their outline.
    /// Default: true
    pub preserve_boundary: bool,
}

impl Default for SubdivideParams {
    fn default() -> Self {
        Self {
            iterations: 1,
            smooth: true,
            preserve_boundary: true,
        }
    }
}

impl SubdivideParams {
    /// Plain midpoint split, no repositioning.
    pub fn midpoint() -> Self {
        Self {
            smooth: false,
            ..Default::default()
        }
    }

    /// Create params for multiple subdivision iterations.
    pub fn with_iterations(iterations: usize) -> Self {
        Self {
            iterations,
            ..Default::default()
        }
    }
}

/// Result of mesh subdivision.
#[derive(Debug)]
pub struct SubdivideResult {
    /// The subdivided mesh.
    pub mesh: Mesh,
    /// Original triangle count.
    pub original_triangles: usize,
    /// Final triangle count.
    pub final_triangles: usize,
    /// Number of iterations performed.
    pub iterations_performed: usize,
}

/// Subdivide a mesh.
///
/// ```
/// use forge_mesh::{Mesh, SubdivideParams, subdivide_mesh};
///
/// let mesh = Mesh::from_raw(
///     &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.5, 1.0, 0.0]],
///     &[[0, 1, 2]],
/// );
/// let result = subdivide_mesh(&mesh, &SubdivideParams::midpoint());
/// assert_eq!(result.final_triangles, 4);
/// ```
pub fn subdivide_mesh(mesh: &Mesh, params: &SubdivideParams) -> SubdivideResult {
    let original_triangles = mesh.faces.len();

    if original_triangles == 0 || params.iterations == 0 {
        return SubdivideResult {
            mesh: mesh.clone(),
            original_triangles,
            final_triangles: original_triangles,
            iterations_performed: 0,
        };
    }

    let mut current = mesh.clone();
    for _ in 0..params.iterations {
        current = subdivide_once(&current, params);
    }
    if mesh.has_normals() {
        compute_vertex_normals(&mut current);
    }

    SubdivideResult {
        final_triangles: current.faces.len(),
        mesh: current,
        original_triangles,
        iterations_performed: params.iterations,
    }
}

/// Subdivide once with Loop smoothing.
pub fn subdivide(mesh: &Mesh) -> Mesh {
    subdivide_mesh(mesh, &SubdivideParams::default()).mesh
}

fn subdivide_once(mesh: &Mesh, params: &SubdivideParams) -> Mesh {
    let adj = MeshAdjacency::build(&mesh.faces);

    let mut boundary_neighbors: HashMap<u32, Vec<u32>> = HashMap::new();
    let mut boundary_seen: HashSet<(u32, u32)> = HashSet::new();
    for f in &mesh.faces {
        for k in 0..3 {
            let (a, b) = (f[k], f[(k + 1) % 3]);
            if adj.faces_of_edge(a, b).len() == 1 && boundary_seen.insert(edge_key(a, b)) {
                boundary_neighbors.entry(a).or_default().push(b);
                boundary_neighbors.entry(b).or_default().push(a);
            }
        }
    }

    // Edge vertices are allocated in face order so the output is reproducible.
    let mut edge_vertices: HashMap<(u32, u32), u32> = HashMap::new();
    let mut vertices: Vec<Vertex> = mesh.vertices.clone();

    for f in &mesh.faces {
        for k in 0..3 {
            let (a, b) = (f[k], f[(k + 1) % 3]);
            let key = edge_key(a, b);
            if edge_vertices.contains_key(&key) {
                continue;
            }

            let va = &mesh.vertices[a as usize];
            let vb = &mesh.vertices[b as usize];
            let position = if params.smooth {
                edge_point(mesh, &adj, a, b)
            } else {
                midpoint(&va.position, &vb.position)
            };
            let uv = match (va.uv, vb.uv) {
                (Some(p), Some(q)) => Some([(p[0] + q[0]) * 0.5, (p[1] + q[1]) * 0.5]),
                _ => None,
            };

            edge_vertices.insert(key, vertices.len() as u32);
            vertices.push(Vertex {
                position,
                normal: None,
                uv,
            });
        }
    }

    if params.smooth {
        for i in 0..mesh.vertices.len() as u32 {
            let boundary = boundary_neighbors.get(&i);
            vertices[i as usize].position = match boundary {
                Some(ring) if params.preserve_boundary => boundary_point(mesh, i, ring),
                _ => interior_point(mesh, &adj, i),
            };
        }
    }

    let mut faces: Vec<[u32; 3]> = Vec::with_capacity(mesh.faces.len() * 4);
    for &[v0, v1, v2] in &mesh.faces {
        let e01 = edge_vertices[&edge_key(v0, v1)];
        let e12 = edge_vertices[&edge_key(v1, v2)];
        let e20 = edge_vertices[&edge_key(v2, v0)];

        //       v0
        //      /  \
        //    e20--e01
        //    / \  / \
        //  v2--e12--v1
        faces.push([v0, e01, e20]);
        faces.push([e01, v1, e12]);
        faces.push([e20, e12, v2]);
        faces.push([e01, e12, e20]);
    }

    Mesh {
        vertices,
        faces,
        texture: mesh.texture.clone(),
    }
}

fn midpoint(a: &Point3<f64>, b: &Point3<f64>) -> Point3<f64> {
    Point3::from((a.coords + b.coords) * 0.5)
}

/// Loop edge rule: 3/8 for the endpoints, 1/8 for the two opposite vertices.
fn edge_point(mesh: &Mesh, adj: &MeshAdjacency, a: u32, b: u32) -> Point3<f64> {
    let pa = mesh.vertices[a as usize].position;
    let pb = mesh.vertices[b as usize].position;
    let faces = adj.faces_of_edge(a, b);
    if faces.len() != 2 {
        return midpoint(&pa, &pb);
    }

    let opposite = |fi: u32| {
        mesh.faces[fi as usize]
            .iter()
            .copied()
            .find(|&v| v != a && v != b)
    };
    match (opposite(faces[0]), opposite(faces[1])) {
        (Some(c), Some(d)) => {
            let pc = mesh.vertices[c as usize].position;
            let pd = mesh.vertices[d as usize].position;
            Point3::from((pa.coords + pb.coords) * 0.375 + (pc.coords + pd.coords) * 0.125)
        }
        _ => midpoint(&pa, &pb),
    }
}

/// Loop vertex rule with Warren's simplified weights.
fn interior_point(mesh: &Mesh, adj: &MeshAdjacency, v: u32) -> Point3<f64> {
    let p = mesh.vertices[v as usize].position;
    let ring = adj.vertex_neighbors(&mesh.faces, v);
    let n = ring.len();
    if n < 3 {
        return p;
    }

    let beta = loop_beta(n);
    let sum = ring
        .iter()
        .fold(nalgebra::Vector3::zeros(), |acc, &u| {
            acc + mesh.vertices[u as usize].position.coords
        });
    Point3::from(p.coords * (1.0 - n as f64 * beta) + sum * beta)
}

fn boundary_point(mesh: &Mesh, v: u32, ring: &[u32]) -> Point3<f64> {
    let p = mesh.vertices[v as usize].position;
    if let [a, b] = ring {
        let pa = mesh.vertices[*a as usize].position;
        let pb = mesh.vertices[*b as usize].position;
        Point3::from(p.coords * 0.75 + (pa.coords + pb.coords) * 0.125)
    } else {
        // Corner or pinched boundary: keep in place.
        p
    }
}

fn loop_beta(n: usize) -> f64 {
    if n == 3 {
        3.0 / 16.0
    } else {
        3.0 / (8.0 * n as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_single_triangle() -> Mesh {
        let mut mesh = Mesh::from_raw(
            &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.5, 1.0, 0.0]],
            &[[0, 1, 2]],
        );
        mesh.vertices[0].uv = Some([0.0, 0.0]);
        mesh.vertices[1].uv = Some([1.0, 0.0]);
        mesh.vertices[2].uv = Some([0.5, 1.0]);
        mesh
    }

    fn make_octahedron() -> Mesh {
        Mesh::from_raw(
            &[
                [1.0, 0.0, 0.0],
                [-1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, -1.0, 0.0],
                [0.0, 0.0, 1.0],
                [0.0, 0.0, -1.0],
            ],
            &[
                [0, 2, 4],
                [2, 1, 4],
                [1, 3, 4],
                [3, 0, 4],
                [2, 0, 5],
                [1, 2, 5],
                [3, 1, 5],
                [0, 3, 5],
            ],
        )
    }

    #[test]
    fn test_single_triangle_midpoint() {
        let result = subdivide_mesh(&make_single_triangle(), &SubdivideParams::midpoint());
        assert_eq!(result.final_triangles, 4);
        assert_eq!(result.mesh.vertex_count(), 6);
        assert_eq!(result.mesh.vertices[3].position, Point3::new(0.5, 0.0, 0.0));
        assert_eq!(result.mesh.vertices[3].uv, Some([0.5, 0.0]));
        assert!((result.mesh.surface_area() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_boundary_smoothing_keeps_corners() {
        // All three corners have exactly two boundary neighbors, so they move
        // by the curve rule but stay in the plane.
        let result = subdivide_mesh(&make_single_triangle(), &SubdivideParams::default());
        for v in &result.mesh.vertices {
            assert_eq!(v.position.z, 0.0);
        }
    }

    #[test]
    fn test_closed_mesh_counts() {
        let result = subdivide_mesh(&make_octahedron(), &SubdivideParams::with_iterations(2));
        assert_eq!(result.final_triangles, 8 * 16);
        // V - E + F = 2 for a sphere: V = 2 + E - F = 2 + 192 - 128.
        assert_eq!(result.mesh.vertex_count(), 66);
        assert!(MeshAdjacency::build(&result.mesh.faces).is_watertight());
    }

    #[test]
    fn test_loop_smoothing_shrinks_octahedron() {
        let coarse = make_octahedron();
        let smooth = subdivide(&coarse);
        let (_, max) = smooth.bounds().unwrap();
        assert!(max.x < 1.0);
        assert!(smooth.signed_volume() < coarse.signed_volume());
        assert!(smooth.signed_volume() > 0.0);
    }

    #[test]
    fn test_zero_iterations_is_identity() {
        let mesh = make_octahedron();
        let params = SubdivideParams {
            iterations: 0,
            ..Default::default()
        };
        let result = subdivide_mesh(&mesh, &params);
        assert_eq!(result.mesh, mesh);
        assert_eq!(result.iterations_performed, 0);
    }
}
