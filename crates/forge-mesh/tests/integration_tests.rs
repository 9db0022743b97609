//! End-to-end tests over the public API: raw reconstruction in, textured GLB out.

use forge_mesh::{
    PostprocessParams, RemeshQuality, RepairParams, SubdivideParams, TextureSource, TextureStyle,
    TextureView, Topology, composite_atlas, ensure_uvs, load_glb, postprocess, remesh,
    repair_mesh_with_config, save_glb, subdivide_mesh, texture_or_fallback, validate_mesh,
};
use forge_mesh::{Mesh, MeshError};
use image::{Rgba, RgbaImage};

/// Cube exported the way reconstruction models do it: every face has its own
/// three vertex copies, with float32-level jitter.
fn raw_reconstruction() -> Mesh {
    let corners = [
        [0.0, 0.0, 0.0],
        [2.0, 0.0, 0.0],
        [2.0, 2.0, 0.0],
        [0.0, 2.0, 0.0],
        [0.0, 0.0, 2.0],
        [2.0, 0.0, 2.0],
        [2.0, 2.0, 2.0],
        [0.0, 2.0, 2.0],
    ];
    let faces: [[usize; 3]; 12] = [
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

    let mut positions = Vec::new();
    let mut loose = Vec::new();
    for (fi, face) in faces.iter().enumerate() {
        let base = positions.len() as u32;
        for (k, &c) in face.iter().enumerate() {
            let jitter = ((fi * 3 + k) % 5) as f64 * 1e-7;
            let [x, y, z] = corners[c];
            positions.push([x + jitter, y, z - jitter]);
        }
        loose.push([base, base + 1, base + 2]);
    }
    Mesh::from_raw(&positions, &loose)
}

#[test]
fn test_raw_reconstruction_is_welded_and_closed() {
    let mut mesh = raw_reconstruction();
    assert_eq!(mesh.vertex_count(), 36);

    let report = repair_mesh_with_config(&mut mesh, &RepairParams::for_reconstruction());
    assert_eq!(report.final_vertices, 8);
    assert_eq!(report.final_faces, 12);

    let quality = validate_mesh(&mesh);
    assert!(quality.is_watertight);
    assert!(quality.is_manifold);
    assert_eq!(quality.component_count, 1);
    assert!(mesh.signed_volume() > 7.9);
}

#[test]
fn test_postprocess_then_texture_then_export() {
    let fine = subdivide_mesh(&raw_reconstruction(), &SubdivideParams::midpoint()).mesh;
    let result = postprocess(
        &fine,
        &PostprocessParams {
            smoothing_iterations: 0,
            target_faces: 40,
            unit_size: 1.0,
        },
    )
    .unwrap();
    assert!(result.stats.new_face_count <= 40);

    let mut mesh = result.mesh;
    assert!(ensure_uvs(&mut mesh));
    let views: Vec<TextureView> = [180.0, 60.0, 0.0]
        .iter()
        .map(|&angle| {
            let shade = (angle as u32 / 2) as u8;
            TextureView::new(RgbaImage::from_pixel(16, 16, Rgba([shade, 0, 0, 255])), angle)
        })
        .collect();
    mesh.texture = Some(composite_atlas(&views));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("job.glb");
    save_glb(&mesh, &path).unwrap();

    let loaded = load_glb(&path).unwrap();
    assert_eq!(loaded.face_count(), mesh.face_count());
    assert!(loaded.has_uvs());
    let texture = loaded.texture.unwrap();
    assert_eq!(texture.get_pixel(0, 0), &Rgba([0, 0, 0, 255]));
}

#[test]
fn test_failed_texture_synthesis_falls_back() {
    let failed: Result<RgbaImage, MeshError> = Err(MeshError::TextureError {
        details: "texturer out of memory".into(),
    });
    let (texture, source) = texture_or_fallback(failed, TextureStyle::HandPainted, 64, 42);
    assert_eq!(source, TextureSource::Procedural);
    assert_eq!(texture.dimensions(), (64, 64));
}

#[test]
fn test_triangle_remesh_quality_preset() {
    let result = remesh(
        &raw_reconstruction(),
        Topology::Triangle,
        RemeshQuality::Low.target_faces(),
    )
    .unwrap();
    // One subdivision pass: 12 -> 48.
    assert_eq!(result.stats.original_vertex_count, 36);
    assert_eq!(result.stats.new_face_count, 48);
}

#[test]
fn test_remesh_of_garbage_is_geometry_error() {
    let mesh = Mesh::from_raw(&[[0.0, 0.0, 0.0], [1.0, 1.0, 1.0]], &[[0, 1, 0], [0, 1, 9]]);
    let err = remesh(&mesh, Topology::Quad, 100).unwrap_err();
    assert!(err.is_geometry());
}
