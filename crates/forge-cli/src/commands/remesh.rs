//! forge remesh command - bring a mesh to a face budget.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use forge_mesh::{
    RemeshParams, RemeshQuality, Topology, ensure_uvs, load_glb, remesh_with_config, save_glb,
};

use crate::{Cli, OutputFormat, Quality, TopologyArg, output};

impl From<TopologyArg> for Topology {
    fn from(arg: TopologyArg) -> Self {
        match arg {
            TopologyArg::Triangle => Topology::Triangle,
            TopologyArg::Quad => Topology::Quad,
        }
    }
}

impl From<Quality> for RemeshQuality {
    fn from(quality: Quality) -> Self {
        match quality {
            Quality::Low => RemeshQuality::Low,
            Quality::Medium => RemeshQuality::Medium,
            Quality::High => RemeshQuality::High,
        }
    }
}

pub fn run(
    input: &Path,
    output_path: &Path,
    topology: TopologyArg,
    quality: Quality,
    faces: Option<usize>,
    unit_size: f64,
    cli: &Cli,
) -> Result<()> {
    let mesh = load_glb(input).with_context(|| format!("Failed to load mesh from {:?}", input))?;

    let params = RemeshParams {
        topology: topology.into(),
        target_faces: faces.unwrap_or_else(|| RemeshQuality::from(quality).target_faces()),
        unit_size,
        ..RemeshParams::default()
    };
    let mut result = remesh_with_config(&mesh, &params)?;
    ensure_uvs(&mut result.mesh);

    save_glb(&result.mesh, output_path)
        .with_context(|| format!("Failed to save remeshed mesh to {:?}", output_path))?;

    match cli.format {
        OutputFormat::Json => output::print(&result.stats, cli.format, cli.quiet),
        OutputFormat::Text => {
            if !cli.quiet {
                output::success(
                    &format!(
                        "Remeshed ({}) to {} faces, saved to {}",
                        params.topology,
                        result.stats.new_face_count,
                        output_path.display()
                    ),
                    cli.format,
                    cli.quiet,
                );
                println!(
                    "  {}: {} → {} vertices",
                    "Vertices".cyan(),
                    result.stats.original_vertex_count,
                    result.stats.new_vertex_count
                );
                println!(
                    "  {}: {} → {} faces (target {})",
                    "Faces".cyan(),
                    result.stats.original_face_count,
                    result.stats.new_face_count,
                    params.target_faces
                );
            }
        }
    }

    Ok(())
}
