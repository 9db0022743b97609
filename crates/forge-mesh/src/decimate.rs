//! Mesh decimation using edge collapse with quadric error metrics.
//!
//! Candidate collapses sit in a min-heap keyed by the quadric error of the
//! merged vertex. Entries carry the version counters of both endpoints at the
//! time they were queued; an entry whose endpoints changed since then is stale
//! and skipped. Equal costs are ordered by vertex index so identical input
//! always collapses in the same order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use hashbrown::HashSet;
use nalgebra::{Matrix3, Point3, Vector3};
use tracing::{debug, info};

use crate::adjacency::{MeshAdjacency, edge_key};
use crate::tracing_ext::OperationTimer;
use crate::error::MeshError;
use crate::{Mesh, MeshResult, Triangle, Vertex};

/// Parameters for mesh decimation.
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct DecimateParams {
    /// Stop once the face count is at or below this value.
    pub target_triangles: usize,

    /// Largest angle (radians) any surviving face normal may turn by in one
    /// collapse. Default: PI/3 (60 degrees)
    pub max_normal_deviation: f64,

    /// Keep boundary vertices in place and never collapse boundary edges.
    /// Default: true
    pub preserve_boundary: bool,

    /// Weight of the constraint planes added along boundary edges when
    /// boundary edges may collapse. Default: 10.0
    pub boundary_weight: f64,
}

impl Default for DecimateParams {
    fn default() -> Self {
        Self {
            target_triangles: 0,
            max_normal_deviation: std::f64::consts::FRAC_PI_3,
            preserve_boundary: true,
            boundary_weight: 10.0,
        }
    }
}

impl DecimateParams {
    /// Create params targeting a specific triangle count.
    pub fn with_target_triangles(count: usize) -> Self {
        Self {
            target_triangles: count,
            ..Default::default()
        }
    }
}

/// Result of mesh decimation.
#[derive(Debug)]
pub struct DecimateResult {
    /// The decimated mesh.
    pub mesh: Mesh,
    /// Triangle count before decimation.
    pub original_triangles: usize,
    /// Triangle count after decimation.
    pub final_triangles: usize,
    /// Collapses applied.
    pub collapses_performed: usize,
    /// Candidates rejected by the legality checks.
    pub collapses_rejected: usize,
    /// Requested face count.
    pub target_triangles: usize,
}

impl DecimateResult {
    /// The face count reached the target.
    pub fn reached_target(&self) -> bool {
        self.final_triangles <= self.target_triangles
    }

    /// Convert an unreached target into a geometry error.
    pub fn require_target(self) -> MeshResult<Self> {
        if self.reached_target() {
            Ok(self)
        } else {
            Err(MeshError::DecimationFailed {
                target: self.target_triangles,
                reached: self.final_triangles,
            })
        }
    }
}

/// Symmetric 4x4 error quadric stored as its upper triangle:
///
/// ```text
/// [a b c d]
/// [  e f g]
/// [    h i]
/// [      j]
/// ```
#[derive(Debug, Clone, Copy, Default)]
struct Quadric {
    a: f64,
    b: f64,
    c: f64,
    d: f64,
    e: f64,
    f: f64,
    g: f64,
    h: f64,
    i: f64,
    j: f64,
}

impl Quadric {
    /// Quadric of the plane `n·x + d = 0`, scaled by `weight`.
    fn from_plane(n: Vector3<f64>, d: f64, weight: f64) -> Self {
        let (a, b, c) = (n.x, n.y, n.z);
        Self {
            a: weight * a * a,
            b: weight * a * b,
            c: weight * a * c,
            d: weight * a * d,
            e: weight * b * b,
            f: weight * b * c,
            g: weight * b * d,
            h: weight * c * c,
            i: weight * c * d,
            j: weight * d * d,
        }
    }

    fn add(&self, o: &Quadric) -> Quadric {
        Quadric {
            a: self.a + o.a,
            b: self.b + o.b,
            c: self.c + o.c,
            d: self.d + o.d,
            e: self.e + o.e,
            f: self.f + o.f,
            g: self.g + o.g,
            h: self.h + o.h,
            i: self.i + o.i,
            j: self.j + o.j,
        }
    }

    /// `v^T Q v` with `v = [x, y, z, 1]`.
    fn evaluate(&self, p: &Point3<f64>) -> f64 {
        let (x, y, z) = (p.x, p.y, p.z);
        self.a * x * x
            + 2.0 * self.b * x * y
            + 2.0 * self.c * x * z
            + 2.0 * self.d * x
            + self.e * y * y
            + 2.0 * self.f * y * z
            + 2.0 * self.g * y
            + self.h * z * z
            + 2.0 * self.i * z
            + self.j
    }

    /// Point minimizing the error, `None` when the system is (near) singular.
    fn optimal_point(&self) -> Option<Point3<f64>> {
        let m = Matrix3::new(
            self.a, self.b, self.c, //
            self.b, self.e, self.f, //
            self.c, self.f, self.h,
        );
        let scale = self.a + self.e + self.h;
        if scale <= 0.0 || m.determinant().abs() <= 1e-9 * scale.powi(3) {
            return None;
        }
        let x = m.try_inverse()? * Vector3::new(-self.d, -self.g, -self.i);
        (x.iter().all(|c| c.is_finite())).then(|| Point3::from(x))
    }
}

/// A queued edge collapse. `v0 < v1`; `v1` merges into `v0`.
#[derive(Debug, Clone)]
struct EdgeCollapse {
    cost: f64,
    v0: u32,
    v1: u32,
    target: Point3<f64>,
    version0: u32,
    version1: u32,
}

impl PartialEq for EdgeCollapse {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for EdgeCollapse {}

impl PartialOrd for EdgeCollapse {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EdgeCollapse {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for min-heap behavior: lower cost, then lower indices first.
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.v0.cmp(&self.v0))
            .then_with(|| other.v1.cmp(&self.v1))
    }
}

/// Working state of one decimation run.
struct Collapser<'a> {
    params: &'a DecimateParams,
    positions: Vec<Point3<f64>>,
    quadrics: Vec<Quadric>,
    boundary: Vec<bool>,
    vertex_alive: Vec<bool>,
    version: Vec<u32>,
    faces: Vec<[u32; 3]>,
    face_alive: Vec<bool>,
    vertex_faces: Vec<Vec<u32>>,
    live_faces: usize,
    min_normal_dot: f64,
}

impl<'a> Collapser<'a> {
    fn new(mesh: &Mesh, params: &'a DecimateParams) -> Self {
        let n = mesh.vertices.len();
        let positions: Vec<Point3<f64>> = mesh.vertices.iter().map(|v| v.position).collect();
        let adjacency = MeshAdjacency::build(&mesh.faces);

        let mut quadrics = vec![Quadric::default(); n];
        let mut vertex_faces = vec![Vec::new(); n];
        for (fi, f) in mesh.faces.iter().enumerate() {
            let tri = Triangle::new(
                positions[f[0] as usize],
                positions[f[1] as usize],
                positions[f[2] as usize],
            );
            if let Some(normal) = tri.normal() {
                let d = -normal.dot(&tri.v0.coords);
                let q = Quadric::from_plane(normal, d, tri.area());
                for &v in f {
                    quadrics[v as usize] = quadrics[v as usize].add(&q);
                }
            }
            for &v in f {
                vertex_faces[v as usize].push(fi as u32);
            }
        }

        let mut boundary = vec![false; n];
        let boundary_edges = mesh.faces.iter().flat_map(|f| {
            [(f[0], f[1]), (f[1], f[2]), (f[2], f[0])]
        });
        for (a, b) in boundary_edges {
            if adjacency.faces_of_edge(a, b).len() != 1 {
                continue;
            }
            boundary[a as usize] = true;
            boundary[b as usize] = true;

            if !params.preserve_boundary {
                // Constraint plane through the edge, perpendicular to its face.
                let fi = adjacency.faces_of_edge(a, b)[0] as usize;
                let f = mesh.faces[fi];
                let tri = Triangle::new(
                    positions[f[0] as usize],
                    positions[f[1] as usize],
                    positions[f[2] as usize],
                );
                let edge = positions[b as usize] - positions[a as usize];
                if let Some(face_normal) = tri.normal() {
                    let perp = edge.cross(&face_normal);
                    let len = perp.norm();
                    if len > f64::EPSILON {
                        let perp = perp / len;
                        let d = -perp.dot(&positions[a as usize].coords);
                        let w = params.boundary_weight * edge.norm_squared();
                        let q = Quadric::from_plane(perp, d, w);
                        quadrics[a as usize] = quadrics[a as usize].add(&q);
                        quadrics[b as usize] = quadrics[b as usize].add(&q);
                    }
                }
            }
        }

        Self {
            params,
            positions,
            quadrics,
            boundary,
            vertex_alive: vec![true; n],
            version: vec![0; n],
            face_alive: vec![true; mesh.faces.len()],
            live_faces: mesh.faces.len(),
            faces: mesh.faces.clone(),
            vertex_faces,
            min_normal_dot: params.max_normal_deviation.cos(),
        }
    }

    fn candidate(&self, a: u32, b: u32) -> Option<EdgeCollapse> {
        let (v0, v1) = edge_key(a, b);
        let (i0, i1) = (v0 as usize, v1 as usize);
        if self.params.preserve_boundary && self.boundary[i0] && self.boundary[i1] {
            return None;
        }

        let q = self.quadrics[i0].add(&self.quadrics[i1]);
        let (p0, p1) = (self.positions[i0], self.positions[i1]);

        let target = if self.params.preserve_boundary && self.boundary[i0] {
            p0
        } else if self.params.preserve_boundary && self.boundary[i1] {
            p1
        } else {
            let midpoint = Point3::from((p0.coords + p1.coords) * 0.5);
            q.optimal_point()
                .into_iter()
                .chain([p0, p1, midpoint])
                .map(|p| (q.evaluate(&p), p))
                .fold(None, |best: Option<(f64, Point3<f64>)>, (cost, p)| match best {
                    Some((c, _)) if c <= cost => best,
                    _ => Some((cost, p)),
                })
                .map(|(_, p)| p)?
        };

        Some(EdgeCollapse {
            cost: q.evaluate(&target).max(0.0),
            v0,
            v1,
            target,
            version0: self.version[i0],
            version1: self.version[i1],
        })
    }

    fn live_faces_of(&self, v: u32) -> impl Iterator<Item = u32> + '_ {
        self.vertex_faces[v as usize]
            .iter()
            .copied()
            .filter(|&fi| self.face_alive[fi as usize])
    }

    fn neighbors(&self, v: u32) -> Vec<u32> {
        let mut out: Vec<u32> = self
            .live_faces_of(v)
            .flat_map(|fi| self.faces[fi as usize])
            .filter(|&u| u != v)
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    fn is_stale(&self, c: &EdgeCollapse) -> bool {
        !self.vertex_alive[c.v0 as usize]
            || !self.vertex_alive[c.v1 as usize]
            || self.version[c.v0 as usize] != c.version0
            || self.version[c.v1 as usize] != c.version1
    }

    fn is_legal(&self, c: &EdgeCollapse) -> bool {
        let (v0, v1) = (c.v0, c.v1);
        let shared: Vec<u32> = self
            .live_faces_of(v0)
            .filter(|&fi| self.faces[fi as usize].contains(&v1))
            .collect();

        match shared.len() {
            1 if self.params.preserve_boundary => return false,
            1 | 2 => {}
            _ => return false,
        }

        // An interior edge joining two boundary vertices would pinch the surface.
        if shared.len() == 2 && self.boundary[v0 as usize] && self.boundary[v1 as usize] {
            return false;
        }

        // Link condition: the endpoints may only share the vertices opposite the edge.
        let n0 = self.neighbors(v0);
        let n1 = self.neighbors(v1);
        let common = n0.iter().filter(|u| n1.binary_search(u).is_ok()).count();
        if common != shared.len() {
            return false;
        }

        // Surviving faces must keep their orientation and must not coincide.
        let mut kept_keys: HashSet<[u32; 3]> = HashSet::new();
        for (v, other) in [(v0, v1), (v1, v0)] {
            for fi in self.live_faces_of(v) {
                let face = self.faces[fi as usize];
                if face.contains(&other) {
                    continue;
                }

                let before = self.face_triangle(&face, None);
                let after = self.face_triangle(&face, Some((v, c.target)));
                let (Some(n_before), Some(n_after)) = (before.normal(), after.normal()) else {
                    return false;
                };
                if n_before.dot(&n_after) < self.min_normal_dot {
                    return false;
                }

                let mut key = face.map(|u| if u == v1 { v0 } else { u });
                key.sort_unstable();
                if !kept_keys.insert(key) {
                    return false;
                }
            }
        }

        true
    }

    fn face_triangle(&self, face: &[u32; 3], moved: Option<(u32, Point3<f64>)>) -> Triangle {
        let p = |u: u32| match moved {
            Some((m, target)) if m == u => target,
            _ => self.positions[u as usize],
        };
        Triangle::new(p(face[0]), p(face[1]), p(face[2]))
    }

    fn apply(&mut self, c: &EdgeCollapse) {
        let (v0, v1) = (c.v0, c.v1);
        let moved: Vec<u32> = self.live_faces_of(v1).collect();
        for fi in moved {
            let face = &mut self.faces[fi as usize];
            if face.contains(&v0) {
                self.face_alive[fi as usize] = false;
                self.live_faces -= 1;
            } else {
                for u in face.iter_mut() {
                    if *u == v1 {
                        *u = v0;
                    }
                }
                self.vertex_faces[v0 as usize].push(fi);
            }
        }

        let merged = self.quadrics[v0 as usize].add(&self.quadrics[v1 as usize]);
        self.quadrics[v0 as usize] = merged;
        self.positions[v0 as usize] = c.target;
        self.boundary[v0 as usize] |= self.boundary[v1 as usize];
        self.vertex_alive[v1 as usize] = false;
        self.vertex_faces[v1 as usize].clear();
        self.version[v0 as usize] += 1;
        self.version[v1 as usize] += 1;

        let live: Vec<u32> = self.live_faces_of(v0).collect();
        self.vertex_faces[v0 as usize] = live;
    }

    fn into_mesh(self, source: &Mesh) -> Mesh {
        let mut remap = vec![u32::MAX; self.positions.len()];
        let mut out = Mesh::with_capacity(self.positions.len(), self.live_faces);
        out.texture = source.texture.clone();

        for (fi, face) in self.faces.iter().enumerate() {
            if !self.face_alive[fi] {
                continue;
            }
            let mut new_face = [0u32; 3];
            for (k, &u) in face.iter().enumerate() {
                if remap[u as usize] == u32::MAX {
                    remap[u as usize] = out.vertices.len() as u32;
                    out.vertices.push(Vertex {
                        position: self.positions[u as usize],
                        normal: None,
                        uv: source.vertices[u as usize].uv,
                    });
                }
                new_face[k] = remap[u as usize];
            }
            out.faces.push(new_face);
        }
        out
    }
}

/// Decimate a mesh to at most `params.target_triangles` faces.
///
/// A target at or above the current face count returns an unchanged copy.
/// When no legal collapse remains before the target is reached the result is
/// returned anyway; check [`DecimateResult::reached_target`] or call
/// [`DecimateResult::require_target`].
pub fn decimate_mesh(mesh: &Mesh, params: &DecimateParams) -> DecimateResult {
    let original_triangles = mesh.face_count();
    let target = params.target_triangles;

    if target >= original_triangles {
        debug!(target, faces = original_triangles, "Decimation target not below face count");
        return DecimateResult {
            mesh: mesh.clone(),
            original_triangles,
            final_triangles: original_triangles,
            collapses_performed: 0,
            collapses_rejected: 0,
            target_triangles: target,
        };
    }

    let _timer = OperationTimer::with_mesh("decimate", mesh);
    let mut state = Collapser::new(mesh, params);
    let mut heap = BinaryHeap::new();

    let mut queued: HashSet<(u32, u32)> = HashSet::new();
    for f in &mesh.faces {
        for k in 0..3 {
            let key = edge_key(f[k], f[(k + 1) % 3]);
            if key.0 != key.1 && queued.insert(key) {
                heap.extend(state.candidate(key.0, key.1));
            }
        }
    }

    let mut performed = 0usize;
    let mut rejected = 0usize;

    while state.live_faces > target {
        let Some(collapse) = heap.pop() else {
            break;
        };
        if state.is_stale(&collapse) {
            continue;
        }
        if !state.is_legal(&collapse) {
            rejected += 1;
            continue;
        }

        state.apply(&collapse);
        performed += 1;

        let v0 = collapse.v0;
        for u in state.neighbors(v0) {
            heap.extend(state.candidate(v0, u));
        }
    }

    let had_normals = mesh.has_normals();
    let mut out = state.into_mesh(mesh);
    if had_normals {
        crate::repair::compute_vertex_normals(&mut out);
    }

    let final_triangles = out.face_count();
    info!(
        original = original_triangles,
        target,
        final_faces = final_triangles,
        collapses = performed,
        rejected,
        "Decimation complete"
    );

    DecimateResult {
        mesh: out,
        original_triangles,
        final_triangles,
        collapses_performed: performed,
        collapses_rejected: rejected,
        target_triangles: target,
    }
}

/// Decimate to `target_faces` with default settings.
pub fn decimate(mesh: &Mesh, target_faces: usize) -> DecimateResult {
    decimate_mesh(mesh, &DecimateParams::with_target_triangles(target_faces))
}
