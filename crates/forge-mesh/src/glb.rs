//! Binary glTF 2.0 (GLB) container I/O.
//!
//! Written files carry one mesh with f32 positions, optional normals and
//! texture coordinates, u32 indices and, when the mesh has a texture, an
//! embedded PNG bound as the base color of a single material.

use std::io::Cursor;
use std::path::Path;

use image::RgbaImage;
use nalgebra::{Point3, Vector3};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::error::{MeshError, MeshResult};
use crate::{Mesh, Vertex};

const GLB_MAGIC: &[u8; 4] = b"glTF";
const GLB_VERSION: u32 = 2;
const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;

const COMPONENT_FLOAT: u32 = 5126;
const COMPONENT_UNSIGNED_INT: u32 = 5125;
const TARGET_ARRAY_BUFFER: u32 = 34962;
const TARGET_ELEMENT_ARRAY_BUFFER: u32 = 34963;
const MODE_TRIANGLES: u32 = 4;

/// Accumulates the binary chunk together with its buffer views and accessors.
#[derive(Default)]
struct BinBuilder {
    data: Vec<u8>,
    views: Vec<Value>,
    accessors: Vec<Value>,
}

impl BinBuilder {
    fn push_view(&mut self, bytes: &[u8], target: Option<u32>) -> usize {
        while self.data.len() % 4 != 0 {
            self.data.push(0);
        }
        let mut view = json!({
            "buffer": 0,
            "byteOffset": self.data.len(),
            "byteLength": bytes.len(),
        });
        if let Some(target) = target {
            view["target"] = json!(target);
        }
        self.data.extend_from_slice(bytes);
        self.views.push(view);
        self.views.len() - 1
    }

    fn push_floats(
        &mut self,
        values: &[f32],
        kind: &str,
        count: usize,
        bounds: Option<([f32; 3], [f32; 3])>,
    ) -> usize {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let view = self.push_view(&bytes, Some(TARGET_ARRAY_BUFFER));
        let mut accessor = json!({
            "bufferView": view,
            "componentType": COMPONENT_FLOAT,
            "count": count,
            "type": kind,
        });
        if let Some((min, max)) = bounds {
            accessor["min"] = json!(min);
            accessor["max"] = json!(max);
        }
        self.accessors.push(accessor);
        self.accessors.len() - 1
    }

    fn push_indices(&mut self, faces: &[[u32; 3]]) -> usize {
        let bytes: Vec<u8> = faces
            .iter()
            .flatten()
            .flat_map(|i| i.to_le_bytes())
            .collect();
        let view = self.push_view(&bytes, Some(TARGET_ELEMENT_ARRAY_BUFFER));
        self.accessors.push(json!({
            "bufferView": view,
            "componentType": COMPONENT_UNSIGNED_INT,
            "count": faces.len() * 3,
            "type": "SCALAR",
        }));
        self.accessors.len() - 1
    }
}

/// Encode a mesh as a GLB byte buffer.
pub fn to_glb_bytes(mesh: &Mesh) -> MeshResult<Vec<u8>> {
    if mesh.vertices.is_empty() {
        return Err(MeshError::empty_mesh("cannot export a mesh without vertices"));
    }

    let mut bin = BinBuilder::default();

    let positions: Vec<f32> = mesh
        .vertices
        .iter()
        .flat_map(|v| [v.position.x as f32, v.position.y as f32, v.position.z as f32])
        .collect();
    let mut min = [f32::INFINITY; 3];
    let mut max = [f32::NEG_INFINITY; 3];
    for p in positions.chunks_exact(3) {
        for k in 0..3 {
            min[k] = min[k].min(p[k]);
            max[k] = max[k].max(p[k]);
        }
    }
    let count = mesh.vertices.len();
    let mut attributes = json!({
        "POSITION": bin.push_floats(&positions, "VEC3", count, Some((min, max))),
    });

    if mesh.has_normals() {
        let normals: Vec<f32> = mesh
            .vertices
            .iter()
            .flat_map(|v| {
                let n = v.normal.unwrap_or_else(Vector3::zeros);
                [n.x as f32, n.y as f32, n.z as f32]
            })
            .collect();
        attributes["NORMAL"] = json!(bin.push_floats(&normals, "VEC3", count, None));
    }

    if mesh.has_uvs() {
        let uvs: Vec<f32> = mesh
            .vertices
            .iter()
            .flat_map(|v| {
                let [u, w] = v.uv.unwrap_or([0.0, 0.0]);
                [u as f32, w as f32]
            })
            .collect();
        attributes["TEXCOORD_0"] = json!(bin.push_floats(&uvs, "VEC2", count, None));
    }

    let mut primitive = json!({
        "attributes": attributes,
        "mode": MODE_TRIANGLES,
    });
    if !mesh.faces.is_empty() {
        primitive["indices"] = json!(bin.push_indices(&mesh.faces));
    }

    let mut document = json!({
        "asset": { "version": "2.0", "generator": concat!("forge-mesh ", env!("CARGO_PKG_VERSION")) },
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [{ "mesh": 0 }],
    });

    if let Some(texture) = &mesh.texture {
        let png = encode_png(texture)?;
        let view = bin.push_view(&png, None);
        document["images"] = json!([{ "bufferView": view, "mimeType": "image/png" }]);
        document["samplers"] = json!([{}]);
        document["textures"] = json!([{ "source": 0, "sampler": 0 }]);
        document["materials"] = json!([{
            "pbrMetallicRoughness": {
                "baseColorTexture": { "index": 0 },
                "metallicFactor": 0.0,
                "roughnessFactor": 1.0,
            }
        }]);
        primitive["material"] = json!(0);
    }

    while bin.data.len() % 4 != 0 {
        bin.data.push(0);
    }
    document["meshes"] = json!([{ "primitives": [primitive] }]);
    document["buffers"] = json!([{ "byteLength": bin.data.len() }]);
    document["bufferViews"] = Value::Array(bin.views);
    document["accessors"] = Value::Array(bin.accessors);

    let mut json_chunk = serde_json::to_vec(&document)
        .map_err(|e| MeshError::parse_error(format!("failed to encode glTF document: {e}")))?;
    while json_chunk.len() % 4 != 0 {
        json_chunk.push(b' ');
    }

    let total = 12 + 8 + json_chunk.len() + 8 + bin.data.len();
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(GLB_MAGIC);
    out.extend_from_slice(&GLB_VERSION.to_le_bytes());
    out.extend_from_slice(&(total as u32).to_le_bytes());
    out.extend_from_slice(&(json_chunk.len() as u32).to_le_bytes());
    out.extend_from_slice(&CHUNK_JSON.to_le_bytes());
    out.extend_from_slice(&json_chunk);
    out.extend_from_slice(&(bin.data.len() as u32).to_le_bytes());
    out.extend_from_slice(&CHUNK_BIN.to_le_bytes());
    out.extend_from_slice(&bin.data);

    debug!(
        bytes = out.len(),
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        textured = mesh.texture.is_some(),
        "Encoded GLB"
    );
    Ok(out)
}

/// Write a mesh to a `.glb` file.
pub fn save_glb(mesh: &Mesh, path: impl AsRef<Path>) -> MeshResult<()> {
    let path = path.as_ref();
    let bytes = to_glb_bytes(mesh)?;
    std::fs::write(path, &bytes).map_err(|e| MeshError::io_write(path, e))?;
    info!(path = %path.display(), bytes = bytes.len(), "Saved GLB");
    Ok(())
}

/// Decode a GLB byte buffer.
///
/// All triangle primitives of all meshes are merged into one [`Mesh`]. The
/// first embedded image becomes the mesh texture. Buffers referencing
/// external URIs are not supported.
pub fn from_glb_bytes(bytes: &[u8]) -> MeshResult<Mesh> {
    let gltf = gltf::Gltf::from_slice(bytes)
        .map_err(|e| MeshError::parse_error(format!("invalid GLB container: {e}")))?;
    let blob = gltf.blob.as_deref();

    let buffer_data = |buffer: gltf::Buffer<'_>| match buffer.source() {
        gltf::buffer::Source::Bin => blob,
        gltf::buffer::Source::Uri(_) => None,
    };

    let mut mesh = Mesh::new();
    for gltf_mesh in gltf.document.meshes() {
        for primitive in gltf_mesh.primitives() {
            if primitive.mode() != gltf::mesh::Mode::Triangles {
                debug!(mode = ?primitive.mode(), "Skipping non-triangle primitive");
                continue;
            }
            let reader = primitive.reader(buffer_data);
            let positions: Vec<[f32; 3]> = reader
                .read_positions()
                .ok_or_else(|| MeshError::parse_error("primitive has no POSITION attribute"))?
                .collect();
            let normals: Option<Vec<[f32; 3]>> = reader.read_normals().map(|n| n.collect());
            let uvs: Option<Vec<[f32; 2]>> =
                reader.read_tex_coords(0).map(|t| t.into_f32().collect());
            let indices: Vec<u32> = match reader.read_indices() {
                Some(indices) => indices.into_u32().collect(),
                None => (0..positions.len() as u32).collect(),
            };

            let offset = mesh.vertices.len() as u32;
            for (i, p) in positions.iter().enumerate() {
                let mut vertex = Vertex::new(Point3::new(p[0] as f64, p[1] as f64, p[2] as f64));
                vertex.normal = normals
                    .as_ref()
                    .and_then(|n| n.get(i))
                    .map(|n| Vector3::new(n[0] as f64, n[1] as f64, n[2] as f64));
                vertex.uv = uvs
                    .as_ref()
                    .and_then(|t| t.get(i))
                    .map(|t| [t[0] as f64, t[1] as f64]);
                mesh.vertices.push(vertex);
            }

            for tri in indices.chunks_exact(3) {
                if let Some(&bad) = tri.iter().find(|&&i| i as usize >= positions.len()) {
                    return Err(MeshError::InvalidVertexIndex {
                        face_index: mesh.faces.len(),
                        vertex_index: bad + offset,
                        vertex_count: mesh.vertices.len(),
                    });
                }
                mesh.faces.push([tri[0] + offset, tri[1] + offset, tri[2] + offset]);
            }
        }
    }

    if let Some(image) = gltf.document.images().next() {
        mesh.texture = Some(decode_image(&image, blob)?);
    }

    debug!(
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        textured = mesh.texture.is_some(),
        "Decoded GLB"
    );
    Ok(mesh)
}

/// Read a mesh from a `.glb` file.
pub fn load_glb(path: impl AsRef<Path>) -> MeshResult<Mesh> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| MeshError::io_read(path, e))?;
    let mesh = from_glb_bytes(&bytes)?;
    info!(
        path = %path.display(),
        vertices = mesh.vertex_count(),
        faces = mesh.face_count(),
        "Loaded GLB"
    );
    Ok(mesh)
}

fn encode_png(texture: &RgbaImage) -> MeshResult<Vec<u8>> {
    let mut bytes = Vec::new();
    texture
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .map_err(|e| MeshError::TextureError {
            details: format!("failed to encode texture: {e}"),
        })?;
    Ok(bytes)
}

fn decode_image(image: &gltf::Image<'_>, blob: Option<&[u8]>) -> MeshResult<RgbaImage> {
    let gltf::image::Source::View { view, .. } = image.source() else {
        return Err(MeshError::TextureError {
            details: "external texture URIs are not supported".into(),
        });
    };
    let blob = blob.ok_or_else(|| MeshError::parse_error("GLB has no binary chunk"))?;
    let start = view.offset();
    let bytes = blob
        .get(start..start + view.length())
        .ok_or_else(|| MeshError::parse_error("texture buffer view out of range"))?;
    image::load_from_memory(bytes)
        .map(|decoded| decoded.to_rgba8())
        .map_err(|e| MeshError::TextureError {
            details: format!("failed to decode embedded texture: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn make_tetrahedron() -> Mesh {
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
    fn test_header_layout() {
        let bytes = to_glb_bytes(&make_tetrahedron()).unwrap();
        assert_eq!(&bytes[0..4], b"glTF");
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 2);
        assert_eq!(
            u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize,
            bytes.len()
        );
        assert_eq!(bytes.len() % 4, 0);
    }

    #[test]
    fn test_geometry_survives_round_trip() {
        let mesh = make_tetrahedron();
        let decoded = from_glb_bytes(&to_glb_bytes(&mesh).unwrap()).unwrap();
        assert_eq!(decoded.faces, mesh.faces);
        assert_eq!(decoded.vertices.len(), 4);
        assert_eq!(decoded.vertices[3].position, Point3::new(0.0, 0.0, 1.0));
        assert!(decoded.texture.is_none());
        assert!(!decoded.has_uvs());
    }

    #[test]
    fn test_textured_mesh_embeds_png() {
        let mut mesh = crate::uv::project_uv_box(&make_tetrahedron());
        crate::repair::compute_vertex_normals(&mut mesh);
        mesh.texture = Some(RgbaImage::from_pixel(8, 8, Rgba([10, 20, 30, 255])));

        let decoded = from_glb_bytes(&to_glb_bytes(&mesh).unwrap()).unwrap();
        assert!(decoded.has_uvs());
        assert!(decoded.has_normals());
        let texture = decoded.texture.unwrap();
        assert_eq!(texture.dimensions(), (8, 8));
        assert_eq!(texture.get_pixel(3, 3), &Rgba([10, 20, 30, 255]));
    }

    #[test]
    fn test_garbage_is_parse_error() {
        let err = from_glb_bytes(b"not a glb file").unwrap_err();
        assert!(matches!(err, MeshError::ParseError { .. }));
    }

    #[test]
    fn test_empty_mesh_rejected() {
        assert!(to_glb_bytes(&Mesh::new()).is_err());
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tetra.glb");
        save_glb(&make_tetrahedron(), &path).unwrap();
        let loaded = load_glb(&path).unwrap();
        assert_eq!(loaded.face_count(), 4);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_glb("/nonexistent/forge/mesh.glb").unwrap_err();
        assert!(matches!(err, MeshError::IoRead { .. }));
    }
}
