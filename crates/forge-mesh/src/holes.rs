//! Boundary loop detection and small-hole filling.

use hashbrown::{HashMap, HashSet};
use nalgebra::Point3;
use rayon::prelude::*;
use tracing::debug;

use crate::adjacency::MeshAdjacency;
use crate::{Mesh, Triangle, Vertex};

/// A closed or open chain of boundary edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryLoop {
    /// Vertices in boundary-edge order.
    pub vertices: Vec<u32>,
    /// The chain returned to its first vertex.
    pub closed: bool,
    /// Every vertex on the chain has exactly one incoming and one outgoing
    /// boundary edge, so the chain does not depend on traversal order.
    pub simple: bool,
}

impl BoundaryLoop {
    /// Number of boundary edges in the loop.
    pub fn edge_count(&self) -> usize {
        self.vertices.len()
    }
}

/// Find boundary loops.
///
/// A boundary edge is an edge with exactly one incident face; its direction
/// is taken from that face. Loops are traced in face order starting from the
/// first unvisited boundary edge.
pub fn detect_holes(mesh: &Mesh, adjacency: &MeshAdjacency) -> Vec<BoundaryLoop> {
    let mut half_edges: Vec<(u32, u32)> = Vec::new();
    for face in &mesh.faces {
        for k in 0..3 {
            let (a, b) = (face[k], face[(k + 1) % 3]);
            if adjacency.faces_of_edge(a, b).len() == 1 {
                half_edges.push((a, b));
            }
        }
    }

    let mut outgoing: HashMap<u32, Vec<usize>> = HashMap::new();
    let mut in_degree: HashMap<u32, usize> = HashMap::new();
    for (i, &(a, b)) in half_edges.iter().enumerate() {
        outgoing.entry(a).or_default().push(i);
        *in_degree.entry(b).or_default() += 1;
    }

    let unambiguous = |v: u32| {
        outgoing.get(&v).map_or(0, Vec::len) == 1 && in_degree.get(&v).copied().unwrap_or(0) == 1
    };

    let mut used = vec![false; half_edges.len()];
    let mut loops = Vec::new();

    for start in 0..half_edges.len() {
        if used[start] {
            continue;
        }
        used[start] = true;

        let (first, mut current) = half_edges[start];
        let mut vertices = vec![first];
        let mut simple = unambiguous(first);
        let mut closed = false;

        loop {
            if current == first {
                closed = true;
                break;
            }
            vertices.push(current);
            simple &= unambiguous(current);

            let next = outgoing
                .get(&current)
                .and_then(|edges| edges.iter().copied().find(|&e| !used[e]));
            match next {
                Some(e) => {
                    used[e] = true;
                    current = half_edges[e].1;
                }
                None => break,
            }
        }

        loops.push(BoundaryLoop {
            vertices,
            closed,
            simple: simple && closed,
        });
    }

    loops
}

/// Fill closed, simple boundary loops of at most `max_edges` edges.
///
/// Loops of three edges get one triangle; longer loops get a fan around a new
/// vertex at the loop centroid. A loop is skipped when any fan triangle would
/// be degenerate, when the new centroid would land within `weld_epsilon` of a
/// loop vertex, or when an existing face already spans three loop vertices
/// (the loop is the whole outline of a sheet rather than a hole in a surface).
///
/// Returns the number of holes filled.
pub fn fill_holes_with_max_edges(
    mesh: &mut Mesh,
    max_edges: usize,
    area_epsilon: f64,
    weld_epsilon: f64,
) -> usize {
    let adjacency = MeshAdjacency::build(&mesh.faces);
    let holes = detect_holes(mesh, &adjacency);

    let snapshot: &Mesh = mesh;
    let plans: Vec<FillPlan> = holes
        .par_iter()
        .filter(|h| h.closed && h.simple && (3..=max_edges).contains(&h.edge_count()))
        .filter_map(|h| plan_fill(snapshot, &adjacency, h, area_epsilon, weld_epsilon))
        .collect();

    let filled = plans.len();
    for plan in plans {
        let centroid_index = plan.centroid.map(|vertex| {
            mesh.vertices.push(vertex);
            (mesh.vertices.len() - 1) as u32
        });
        let loop_vertices = &plan.loop_vertices;
        match centroid_index {
            None => mesh
                .faces
                .push([loop_vertices[2], loop_vertices[1], loop_vertices[0]]),
            Some(c) => {
                let n = loop_vertices.len();
                for i in 0..n {
                    mesh.faces
                        .push([loop_vertices[(i + 1) % n], loop_vertices[i], c]);
                }
            }
        }
    }

    debug!(
        detected = holes.len(),
        filled, max_edges, "Hole filling complete"
    );
    filled
}

/// Fill holes with the default limit of eight edges.
pub fn fill_holes(mesh: &mut Mesh) -> usize {
    fill_holes_with_max_edges(mesh, 8, 1e-12, 1e-6)
}

struct FillPlan {
    loop_vertices: Vec<u32>,
    centroid: Option<Vertex>,
}

fn plan_fill(
    mesh: &Mesh,
    adjacency: &MeshAdjacency,
    hole: &BoundaryLoop,
    area_epsilon: f64,
    weld_epsilon: f64,
) -> Option<FillPlan> {
    let members: HashSet<u32> = hole.vertices.iter().copied().collect();
    let spans_loop = hole.vertices.iter().any(|&v| {
        adjacency
            .faces_of_vertex(v)
            .iter()
            .any(|&fi| mesh.faces[fi as usize].iter().all(|u| members.contains(u)))
    });
    if spans_loop {
        return None;
    }

    let pos = |v: u32| mesh.vertices[v as usize].position;
    let n = hole.vertices.len();

    if n == 3 {
        let tri = Triangle::new(
            pos(hole.vertices[2]),
            pos(hole.vertices[1]),
            pos(hole.vertices[0]),
        );
        if tri.is_degenerate(area_epsilon) {
            return None;
        }
        return Some(FillPlan {
            loop_vertices: hole.vertices.clone(),
            centroid: None,
        });
    }

    let sum = hole
        .vertices
        .iter()
        .fold(nalgebra::Vector3::zeros(), |acc, &v| acc + pos(v).coords);
    let centroid = Point3::from(sum / n as f64);

    for i in 0..n {
        let a = hole.vertices[i];
        let b = hole.vertices[(i + 1) % n];
        if (pos(a) - centroid).norm() <= weld_epsilon {
            return None;
        }
        if Triangle::new(pos(b), pos(a), centroid).is_degenerate(area_epsilon) {
            return None;
        }
    }

    let uvs: Option<Vec<[f64; 2]>> = hole
        .vertices
        .iter()
        .map(|&v| mesh.vertices[v as usize].uv)
        .collect();
    let mut vertex = Vertex::new(centroid);
    vertex.uv = uvs.map(|uvs| {
        let (u, v) = uvs
            .iter()
            .fold((0.0, 0.0), |(u, v), uv| (u + uv[0], v + uv[1]));
        [u / n as f64, v / n as f64]
    });

    Some(FillPlan {
        loop_vertices: hole.vertices.clone(),
        centroid: Some(vertex),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Unit cube without its top face (z = 1).
    fn open_box_mesh() -> Mesh {
        Mesh::from_raw(
            &[
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [1.0, 1.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 0.0, 1.0],
                [1.0, 0.0, 1.0],
                [1.0, 1.0, 1.0],
                [0.0, 1.0, 1.0],
            ],
            &[
                [0, 2, 1],
                [0, 3, 2],
                [0, 1, 5],
                [0, 5, 4],
                [3, 7, 6],
                [3, 6, 2],
                [0, 4, 7],
                [0, 7, 3],
                [1, 2, 6],
                [1, 6, 5],
            ],
        )
    }

    #[test]
    fn test_detect_single_hole() {
        let mesh = open_box_mesh();
        let adj = MeshAdjacency::build(&mesh.faces);
        let holes = detect_holes(&mesh, &adj);
        assert_eq!(holes.len(), 1);
        assert_eq!(holes[0].edge_count(), 4);
        assert!(holes[0].closed);
        assert!(holes[0].simple);
    }

    #[test]
    fn test_fill_open_box() {
        let mut mesh = open_box_mesh();
        let filled = fill_holes(&mut mesh);
        assert_eq!(filled, 1);
        assert_eq!(mesh.vertex_count(), 9);
        assert_eq!(mesh.face_count(), 14);

        let adj = MeshAdjacency::build(&mesh.faces);
        assert!(adj.is_watertight());
        assert!((mesh.signed_volume() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_hole_larger_than_limit_is_kept() {
        let mut mesh = open_box_mesh();
        assert_eq!(fill_holes_with_max_edges(&mut mesh, 3, 1e-12, 1e-6), 0);
        assert_eq!(mesh.face_count(), 10);
    }

    #[test]
    fn test_lone_triangle_is_not_closed_into_a_pillow() {
        let mut mesh = Mesh::from_raw(
            &[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            &[[0, 1, 2]],
        );
        assert_eq!(fill_holes(&mut mesh), 0);
        assert_eq!(mesh.face_count(), 1);
    }

    #[test]
    fn test_three_edge_hole_gets_single_triangle() {
        // Tetrahedron with one face removed.
        let mut mesh = Mesh::from_raw(
            &[
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 0.0, 1.0],
            ],
            &[[0, 2, 1], [0, 1, 3], [1, 2, 3]],
        );
        assert_eq!(fill_holes(&mut mesh), 1);
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(mesh.faces[3], [3, 2, 0]);
        assert!(MeshAdjacency::build(&mesh.faces).is_watertight());
    }
}
