//! forge info command - display mesh statistics.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use forge_mesh::{load_glb, validate_mesh};
use serde::Serialize;

use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct MeshInfo {
    path: String,
    vertices: usize,
    faces: usize,
    components: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<[f64; 3]>,
    surface_area: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    volume: Option<f64>,
    has_normals: bool,
    has_uvs: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    texture: Option<[u32; 2]>,
}

pub fn run(input: &Path, cli: &Cli) -> Result<()> {
    let mesh = load_glb(input).with_context(|| format!("Failed to load mesh from {:?}", input))?;
    let report = validate_mesh(&mesh);

    let info = MeshInfo {
        path: input.display().to_string(),
        vertices: report.vertex_count,
        faces: report.face_count,
        components: report.component_count,
        dimensions: report
            .bounds
            .map(|(min, max)| [max[0] - min[0], max[1] - min[1], max[2] - min[2]]),
        surface_area: report.surface_area,
        volume: report.is_watertight.then_some(report.volume),
        has_normals: report.has_normals,
        has_uvs: report.has_uvs,
        texture: mesh.texture.as_ref().map(|t| [t.width(), t.height()]),
    };

    match cli.format {
        OutputFormat::Json => output::print(&info, cli.format, cli.quiet),
        OutputFormat::Text => {
            if cli.quiet {
                return Ok(());
            }
            println!("{}", "Mesh Information".bold().underline());
            println!("  {}: {}", "File".cyan(), info.path);
            println!("  {}: {}", "Vertices".cyan(), info.vertices);
            println!("  {}: {}", "Faces".cyan(), info.faces);
            println!("  {}: {}", "Components".cyan(), info.components);
            if let Some(d) = info.dimensions {
                println!(
                    "  {}: {:.3} x {:.3} x {:.3}",
                    "Dimensions".cyan(),
                    d[0],
                    d[1],
                    d[2]
                );
            }
            println!("  {}: {:.4}", "Surface area".cyan(), info.surface_area);
            if let Some(volume) = info.volume {
                println!("  {}: {:.4}", "Volume".cyan(), volume);
            }
            println!("  {}: {}", "Has normals".cyan(), output::yes_no(info.has_normals));
            println!("  {}: {}", "Has UVs".cyan(), output::yes_no(info.has_uvs));
            match info.texture {
                Some([w, h]) => println!("  {}: {}x{}", "Texture".cyan(), w, h),
                None => println!("  {}: none", "Texture".cyan()),
            }
        }
    }

    Ok(())
}
