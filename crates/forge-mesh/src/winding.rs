//! Consistent, outward-facing winding order.

use std::collections::VecDeque;

use tracing::debug;

use crate::Mesh;
use crate::adjacency::MeshAdjacency;

/// Signed volume below which a component is treated as inside-out.
const INSIDE_OUT_VOLUME: f64 = -1e-12;

/// Make face winding consistent within every connected component, then
/// point it outward.
///
/// Each component is traversed breadth-first from its lowest face index.
/// A neighbor across a two-face edge is flipped when it traverses the shared
/// edge in the same direction as the current face. Edges with more than two
/// faces are not crossed. Afterwards the whole component is flipped back when
/// the traversal flipped more faces than it kept (the majority orientation
/// wins), and flipped again when its signed volume is negative.
///
/// Returns the number of faces whose winding differs from the input.
pub fn fix_winding_order(mesh: &mut Mesh) -> usize {
    if mesh.faces.is_empty() {
        return 0;
    }

    let original = mesh.faces.clone();
    let adjacency = MeshAdjacency::build(&mesh.faces);
    let mut visited = vec![false; mesh.faces.len()];
    let mut queue = VecDeque::new();
    let mut components = 0usize;

    for seed in 0..mesh.faces.len() {
        if visited[seed] {
            continue;
        }
        components += 1;

        let mut component = vec![seed as u32];
        let mut flipped_in_component = 0usize;
        visited[seed] = true;
        queue.push_back(seed as u32);

        while let Some(fi) = queue.pop_front() {
            let face = mesh.faces[fi as usize];
            for k in 0..3 {
                let (a, b) = (face[k], face[(k + 1) % 3]);
                let sharing = adjacency.faces_of_edge(a, b);
                if sharing.len() != 2 {
                    continue;
                }
                let other = if sharing[0] == fi { sharing[1] } else { sharing[0] };
                if visited[other as usize] {
                    continue;
                }
                visited[other as usize] = true;

                if has_directed_edge(&mesh.faces[other as usize], a, b) {
                    mesh.faces[other as usize].swap(1, 2);
                    flipped_in_component += 1;
                }
                component.push(other);
                queue.push_back(other);
            }
        }

        if flipped_in_component * 2 > component.len() {
            for &fi in &component {
                mesh.faces[fi as usize].swap(1, 2);
            }
        }

        let volume = mesh.faces_signed_volume(component.iter().map(|&fi| &mesh.faces[fi as usize]));
        if volume < INSIDE_OUT_VOLUME {
            for &fi in &component {
                mesh.faces[fi as usize].swap(1, 2);
            }
        }
    }

    let changed = mesh
        .faces
        .iter()
        .zip(&original)
        .filter(|(now, before)| !same_winding(now, before))
        .count();

    debug!(components, changed, "Winding order fixed");
    changed
}

/// Whether `face` contains the directed edge `a -> b`.
pub(crate) fn has_directed_edge(face: &[u32; 3], a: u32, b: u32) -> bool {
    (0..3).any(|k| face[k] == a && face[(k + 1) % 3] == b)
}

fn same_winding(a: &[u32; 3], b: &[u32; 3]) -> bool {
    (0..3).any(|r| a[0] == b[r] && a[1] == b[(r + 1) % 3] && a[2] == b[(r + 2) % 3])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tetrahedron() -> Mesh {
        Mesh::from_raw(
            &[
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 0.0, 1.0],
            ],
            &[[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]],
        )
    }

    #[test]
    fn test_consistent_outward_mesh_unchanged() {
        let mut mesh = tetrahedron();
        assert!(mesh.signed_volume() > 0.0);
        assert_eq!(fix_winding_order(&mut mesh), 0);
    }

    #[test]
    fn test_single_flipped_face_is_repaired() {
        let mut mesh = tetrahedron();
        mesh.faces[2].swap(1, 2);
        assert_eq!(fix_winding_order(&mut mesh), 1);
        assert!(mesh.signed_volume() > 0.0);
        assert_eq!(fix_winding_order(&mut mesh), 0);
    }

    #[test]
    fn test_inside_out_mesh_is_turned_outward() {
        let mut mesh = tetrahedron();
        for f in &mut mesh.faces {
            f.swap(1, 2);
        }
        assert_eq!(fix_winding_order(&mut mesh), 4);
        assert!(mesh.signed_volume() > 0.0);
    }

    #[test]
    fn test_majority_orientation_wins_on_open_sheet() {
        // Flat fan of four triangles around vertex 0; one disagrees.
        let mut mesh = Mesh::from_raw(
            &[
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [-1.0, 0.0, 0.0],
                [0.0, -1.0, 0.0],
            ],
            &[[0, 2, 1], [0, 3, 2], [0, 4, 3], [0, 4, 1]],
        );
        assert_eq!(fix_winding_order(&mut mesh), 1);
        assert_eq!(mesh.faces[3], [0, 1, 4]);
    }

    #[test]
    fn test_directed_edge() {
        assert!(has_directed_edge(&[3, 4, 5], 5, 3));
        assert!(!has_directed_edge(&[3, 4, 5], 3, 5));
    }
}
