//! Core mesh data types.

use image::RgbaImage;
use nalgebra::{Point3, Vector3};

/// A vertex with optional per-vertex attributes.
///
/// Reconstruction oracles emit positions only; normals are filled in by repair
/// and UVs by box projection when no other source exists.
#[derive(Debug, Clone, PartialEq)]
pub struct Vertex {
    /// 3D position.
    pub position: Point3<f64>,

    /// Unit normal vector, computed from adjacent faces.
    pub normal: Option<Vector3<f64>>,

    /// Texture coordinate in `[0, 1]²`.
    pub uv: Option<[f64; 2]>,
}

impl Vertex {
    /// Create a new vertex with only position set.
    #[inline]
    pub fn new(position: Point3<f64>) -> Self {
        Self {
            position,
            normal: None,
            uv: None,
        }
    }

    /// Create a vertex from raw coordinates.
    #[inline]
    pub fn from_coords(x: f64, y: f64, z: f64) -> Self {
        Self::new(Point3::new(x, y, z))
    }

    /// Create a vertex with a texture coordinate.
    #[inline]
    pub fn with_uv(position: Point3<f64>, uv: [f64; 2]) -> Self {
        Self {
            position,
            normal: None,
            uv: Some(uv),
        }
    }
}

/// An indexed triangle mesh with optional texture.
///
/// Invariant: every index in `faces` is `< vertices.len()` once the mesh has
/// gone through [`crate::repair_mesh`]. Operators take `&Mesh` and return a new
/// value, or take `&mut Mesh` when they work in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    /// Vertex data.
    pub vertices: Vec<Vertex>,

    /// Triangle faces as indices into the vertex array.
    /// Each face is [v0, v1, v2] with counter-clockwise winding seen from outside.
    pub faces: Vec<[u32; 3]>,

    /// Base color texture sampled through the vertex UVs.
    pub texture: Option<RgbaImage>,
}

impl Mesh {
    /// Create a new empty mesh.
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            faces: Vec::new(),
            texture: None,
        }
    }

    /// Create a mesh with pre-allocated capacity.
    pub fn with_capacity(vertex_count: usize, face_count: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(vertex_count),
            faces: Vec::with_capacity(face_count),
            texture: None,
        }
    }

    /// Build a mesh from raw positions and faces.
    pub fn from_raw(positions: &[[f64; 3]], faces: &[[u32; 3]]) -> Self {
        Self {
            vertices: positions
                .iter()
                .map(|&[x, y, z]| Vertex::from_coords(x, y, z))
                .collect(),
            faces: faces.to_vec(),
            texture: None,
        }
    }

    /// Number of vertices in the mesh.
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Number of faces (triangles) in the mesh.
    #[inline]
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Check if mesh is empty (no vertices or faces).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.faces.is_empty()
    }

    /// True when every vertex carries a texture coordinate.
    pub fn has_uvs(&self) -> bool {
        !self.vertices.is_empty() && self.vertices.iter().all(|v| v.uv.is_some())
    }

    /// True when every vertex carries a normal.
    pub fn has_normals(&self) -> bool {
        !self.vertices.is_empty() && self.vertices.iter().all(|v| v.normal.is_some())
    }

    /// Axis-aligned bounding box over all vertices, `None` for an empty mesh.
    pub fn bounds(&self) -> Option<(Point3<f64>, Point3<f64>)> {
        let first = self.vertices.first()?;
        let mut min = first.position;
        let mut max = first.position;

        for v in &self.vertices[1..] {
            let p = &v.position;
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            min.z = min.z.min(p.z);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
            max.z = max.z.max(p.z);
        }

        Some((min, max))
    }

    /// Iterate over all triangles as resolved positions.
    pub fn triangles(&self) -> impl Iterator<Item = Triangle> + '_ {
        self.faces.iter().map(|f| self.triangle_of(f))
    }

    /// Get a single triangle by face index.
    pub fn triangle(&self, face_idx: usize) -> Option<Triangle> {
        self.faces.get(face_idx).map(|f| self.triangle_of(f))
    }

    fn triangle_of(&self, f: &[u32; 3]) -> Triangle {
        Triangle::new(
            self.vertices[f[0] as usize].position,
            self.vertices[f[1] as usize].position,
            self.vertices[f[2] as usize].position,
        )
    }

    /// Translate all vertices.
    pub fn translate(&mut self, offset: Vector3<f64>) {
        for v in &mut self.vertices {
            v.position += offset;
        }
    }

    /// Uniformly scale all vertices about the origin.
    pub fn scale(&mut self, factor: f64) {
        for v in &mut self.vertices {
            v.position.coords *= factor;
        }
    }

    /// Signed volume via the divergence theorem.
    ///
    /// Positive for a closed mesh whose faces wind counter-clockwise seen from
    /// outside. Only meaningful for watertight meshes.
    pub fn signed_volume(&self) -> f64 {
        self.faces_signed_volume(self.faces.iter())
    }

    /// Signed volume of a subset of faces, measured about their own centroid so
    /// that distant components do not pick up a translation-dependent term.
    pub(crate) fn faces_signed_volume<'a>(
        &self,
        faces: impl Iterator<Item = &'a [u32; 3]> + Clone,
    ) -> f64 {
        let mut centroid = Vector3::zeros();
        let mut count = 0usize;
        for f in faces.clone() {
            for &i in f {
                centroid += self.vertices[i as usize].position.coords;
                count += 1;
            }
        }
        if count == 0 {
            return 0.0;
        }
        centroid /= count as f64;

        let mut volume = 0.0;
        for f in faces {
            let a = self.vertices[f[0] as usize].position.coords - centroid;
            let b = self.vertices[f[1] as usize].position.coords - centroid;
            let c = self.vertices[f[2] as usize].position.coords - centroid;
            volume += a.dot(&b.cross(&c));
        }
        volume / 6.0
    }

    /// Absolute enclosed volume.
    pub fn volume(&self) -> f64 {
        self.signed_volume().abs()
    }

    /// Check if the closed mesh has inward-facing normals.
    pub fn is_inside_out(&self) -> bool {
        self.signed_volume() < 0.0
    }

    /// Total surface area.
    pub fn surface_area(&self) -> f64 {
        self.triangles().map(|t| t.area()).sum()
    }
}

impl Default for Mesh {
    fn default() -> Self {
        Self::new()
    }
}

/// A triangle with resolved vertex positions.
#[derive(Debug, Clone, Copy)]
pub struct Triangle {
    pub v0: Point3<f64>,
    pub v1: Point3<f64>,
    pub v2: Point3<f64>,
}

impl Triangle {
    /// Create a triangle from three positions.
    #[inline]
    pub fn new(v0: Point3<f64>, v1: Point3<f64>, v2: Point3<f64>) -> Self {
        Self { v0, v1, v2 }
    }

    /// Cross product of the two edges from `v0`; length is twice the area.
    #[inline]
    pub fn normal_unnormalized(&self) -> Vector3<f64> {
        (self.v1 - self.v0).cross(&(self.v2 - self.v0))
    }

    /// Unit normal, `None` when the triangle has (near) zero area.
    pub fn normal(&self) -> Option<Vector3<f64>> {
        let n = self.normal_unnormalized();
        let len = n.norm();
        if len > f64::EPSILON && len.is_finite() {
            Some(n / len)
        } else {
            None
        }
    }

    /// Triangle area.
    #[inline]
    pub fn area(&self) -> f64 {
        self.normal_unnormalized().norm() * 0.5
    }

    /// Centroid of the three corners.
    #[inline]
    pub fn centroid(&self) -> Point3<f64> {
        Point3::from((self.v0.coords + self.v1.coords + self.v2.coords) / 3.0)
    }

    /// Lengths of edges v0-v1, v1-v2, v2-v0.
    pub fn edge_lengths(&self) -> [f64; 3] {
        [
            (self.v1 - self.v0).norm(),
            (self.v2 - self.v1).norm(),
            (self.v0 - self.v2).norm(),
        ]
    }

    /// Ratio of longest edge to shortest altitude; infinite for degenerate triangles.
    pub fn aspect_ratio(&self) -> f64 {
        let area = self.area();
        let longest = self.edge_lengths().into_iter().fold(0.0, f64::max);
        if area <= f64::EPSILON {
            return f64::INFINITY;
        }
        let min_altitude = 2.0 * area / longest;
        longest / min_altitude
    }

    /// A triangle is degenerate when its area is below `epsilon` or not finite.
    #[inline]
    pub fn is_degenerate(&self, epsilon: f64) -> bool {
        let area = self.area();
        !(area.is_finite() && area > epsilon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn make_unit_cube() -> Mesh {
        let positions = [
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [1.0, 0.0, 1.0],
            [1.0, 1.0, 1.0],
            [0.0, 1.0, 1.0],
        ];
        let faces = [
            [0, 2, 1],
            [0, 3, 2],
            [4, 5, 6],
            [4, 6, 7],
            [0, 1, 5],
            [0, 5, 4],
            [3, 7, 6],
            [3, 6, 2],
            [0, 4, 7],
            [0, 7, 3],
            [1, 2, 6],
            [1, 6, 5],
        ];
        Mesh::from_raw(&positions, &faces)
    }

    #[test]
    fn test_bounds() {
        let mesh = make_unit_cube();
        let (min, max) = mesh.bounds().unwrap();
        assert_eq!(min, Point3::new(0.0, 0.0, 0.0));
        assert_eq!(max, Point3::new(1.0, 1.0, 1.0));
        assert!(Mesh::new().bounds().is_none());
    }

    #[test]
    fn test_cube_volume_and_area() {
        let mesh = make_unit_cube();
        assert!(approx_eq(mesh.signed_volume(), 1.0));
        assert!(approx_eq(mesh.surface_area(), 6.0));
        assert!(!mesh.is_inside_out());
    }

    #[test]
    fn test_inverted_cube_is_inside_out() {
        let mut mesh = make_unit_cube();
        for f in &mut mesh.faces {
            f.swap(1, 2);
        }
        assert!(mesh.is_inside_out());
        assert!(approx_eq(mesh.volume(), 1.0));
    }

    #[test]
    fn test_volume_is_translation_invariant() {
        let mut mesh = make_unit_cube();
        mesh.translate(Vector3::new(1000.0, -500.0, 250.0));
        assert!((mesh.signed_volume() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_translate_and_scale() {
        let mut mesh = make_unit_cube();
        mesh.translate(Vector3::new(-0.5, -0.5, -0.5));
        mesh.scale(2.0);
        let (min, max) = mesh.bounds().unwrap();
        assert_eq!(min, Point3::new(-1.0, -1.0, -1.0));
        assert_eq!(max, Point3::new(1.0, 1.0, 1.0));
    }

    #[test]
    fn test_triangle_geometry() {
        let tri = Triangle::new(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        );
        assert!(approx_eq(tri.area(), 0.5));
        let n = tri.normal().unwrap();
        assert!(approx_eq(n.z, 1.0));
        assert!(!tri.is_degenerate(1e-12));
    }

    #[test]
    fn test_degenerate_triangle() {
        let tri = Triangle::new(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
        );
        assert!(tri.is_degenerate(1e-12));
        assert!(tri.normal().is_none());
        assert!(tri.aspect_ratio().is_infinite());
    }

    #[test]
    fn test_has_uvs() {
        let mut mesh = make_unit_cube();
        assert!(!mesh.has_uvs());
        for v in &mut mesh.vertices {
            v.uv = Some([0.0, 0.0]);
        }
        assert!(mesh.has_uvs());
    }
}
