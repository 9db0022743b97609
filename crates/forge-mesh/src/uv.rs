//! Box-projection UV fallback for meshes that arrive without texture coordinates.

use tracing::debug;

use crate::repair::compute_vertex_normals;
use crate::Mesh;

/// Added to the UV range before dividing so flat projections stay finite.
pub const UV_RANGE_GUARD: f64 = 1e-8;

/// Project every vertex onto the plane orthogonal to the dominant axis of its
/// normal and rescale the result into the unit square.
///
/// X-facing vertices map to `(z, y)`, Y-facing to `(x, z)` and Z-facing to
/// `(x, y)`. Each UV component is min-max normalized independently. A vertex
/// without a usable normal is treated as X-facing. Meshes that already carry
/// UVs are returned unchanged.
pub fn project_uv_box(mesh: &Mesh) -> Mesh {
    let mut out = mesh.clone();
    ensure_uvs(&mut out);
    out
}

/// In-place variant of [`project_uv_box`]. Returns `true` when UVs were generated.
pub fn ensure_uvs(mesh: &mut Mesh) -> bool {
    if mesh.vertices.is_empty() || mesh.has_uvs() {
        return false;
    }
    if !mesh.has_normals() {
        compute_vertex_normals(mesh);
    }

    let projected: Vec<[f64; 2]> = mesh
        .vertices
        .iter()
        .map(|v| {
            let p = v.position;
            match v.normal.map(|n| dominant_axis([n.x.abs(), n.y.abs(), n.z.abs()])) {
                Some(1) => [p.x, p.z],
                Some(2) => [p.x, p.y],
                _ => [p.z, p.y],
            }
        })
        .collect();

    let mut min = [f64::INFINITY; 2];
    let mut max = [f64::NEG_INFINITY; 2];
    for uv in &projected {
        for k in 0..2 {
            min[k] = min[k].min(uv[k]);
            max[k] = max[k].max(uv[k]);
        }
    }

    for (vertex, uv) in mesh.vertices.iter_mut().zip(projected) {
        vertex.uv = Some([
            (uv[0] - min[0]) / (max[0] - min[0] + UV_RANGE_GUARD),
            (uv[1] - min[1]) / (max[1] - min[1] + UV_RANGE_GUARD),
        ]);
    }

    debug!(vertices = mesh.vertices.len(), "Generated box-projected UVs");
    true
}

/// Index of the largest component; the first one wins ties.
fn dominant_axis(n: [f64; 3]) -> usize {
    let mut best = 0;
    for k in 1..3 {
        if n[k] > n[best] {
            best = k;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn make_quad_facing(normal: Vector3<f64>) -> Mesh {
        let mut mesh = Mesh::from_raw(
            &[
                [0.0, 0.0, 0.0],
                [2.0, 0.0, 1.0],
                [2.0, 4.0, 3.0],
                [0.0, 4.0, 2.0],
            ],
            &[[0, 1, 2], [0, 2, 3]],
        );
        for v in &mut mesh.vertices {
            v.normal = Some(normal);
        }
        mesh
    }

    #[test]
    fn test_z_facing_uses_xy() {
        let mesh = project_uv_box(&make_quad_facing(Vector3::z()));
        let uvs: Vec<[f64; 2]> = mesh.vertices.iter().map(|v| v.uv.unwrap()).collect();
        assert!(uvs[0][0].abs() < 1e-6 && uvs[0][1].abs() < 1e-6);
        assert!((uvs[2][0] - 1.0).abs() < 1e-6 && (uvs[2][1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_x_facing_uses_zy() {
        let mesh = project_uv_box(&make_quad_facing(-Vector3::x()));
        // z spans 0..3, y spans 0..4.
        let uv = mesh.vertices[1].uv.unwrap();
        assert!((uv[0] - 1.0 / 3.0).abs() < 1e-6);
        assert!(uv[1].abs() < 1e-6);
    }

    #[test]
    fn test_y_facing_uses_xz() {
        let mesh = project_uv_box(&make_quad_facing(Vector3::y()));
        let uv = mesh.vertices[3].uv.unwrap();
        assert!(uv[0].abs() < 1e-6);
        assert!((uv[1] - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_all_uvs_in_unit_square() {
        let mesh = Mesh::from_raw(
            &[
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 0.0, 1.0],
            ],
            &[[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]],
        );
        let mesh = project_uv_box(&mesh);
        for v in &mesh.vertices {
            let [u, w] = v.uv.unwrap();
            assert!((0.0..=1.0).contains(&u));
            assert!((0.0..=1.0).contains(&w));
        }
    }

    #[test]
    fn test_flat_projection_is_finite() {
        let mut mesh = make_quad_facing(Vector3::z());
        for v in &mut mesh.vertices {
            v.position.x = 5.0;
        }
        let mesh = project_uv_box(&mesh);
        for v in &mesh.vertices {
            assert_eq!(v.uv.unwrap()[0], 0.0);
        }
    }

    #[test]
    fn test_existing_uvs_untouched() {
        let mut mesh = make_quad_facing(Vector3::z());
        for v in &mut mesh.vertices {
            v.uv = Some([0.25, 0.75]);
        }
        assert!(!ensure_uvs(&mut mesh));
        assert_eq!(mesh.vertices[2].uv, Some([0.25, 0.75]));
    }
}
