//! forge repair command - clean up a raw reconstruction.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use forge_mesh::{RepairParams, load_glb, repair_mesh_with_config, save_glb};

use crate::{Cli, OutputFormat, output};

pub fn run(
    input: &Path,
    output_path: &Path,
    conservative: bool,
    max_hole_edges: Option<usize>,
    weld_tolerance: Option<f64>,
    cli: &Cli,
) -> Result<()> {
    let mut mesh =
        load_glb(input).with_context(|| format!("Failed to load mesh from {:?}", input))?;

    let mut params = if conservative {
        RepairParams::conservative()
    } else {
        RepairParams::for_reconstruction()
    };
    if let Some(max_edges) = max_hole_edges {
        params.max_hole_edges = max_edges;
    }
    if let Some(tolerance) = weld_tolerance {
        params.weld_epsilon = tolerance;
    }

    let report = repair_mesh_with_config(&mut mesh, &params);

    save_glb(&mesh, output_path)
        .with_context(|| format!("Failed to save repaired mesh to {:?}", output_path))?;

    match cli.format {
        OutputFormat::Json => output::print(&report, cli.format, cli.quiet),
        OutputFormat::Text => {
            if cli.quiet {
                return Ok(());
            }
            output::success(
                &format!("Repaired mesh saved to {}", output_path.display()),
                cli.format,
                cli.quiet,
            );
            println!(
                "  {}: {} → {} vertices",
                "Vertices".cyan(),
                report.initial_vertices,
                report.final_vertices
            );
            println!(
                "  {}: {} → {} faces",
                "Faces".cyan(),
                report.initial_faces,
                report.final_faces
            );
            let repairs = [
                ("vertices welded", report.vertices_welded),
                ("degenerate faces removed", report.degenerate_faces_removed),
                ("duplicate faces removed", report.duplicate_faces_removed),
                ("faces reoriented", report.faces_reoriented),
                ("holes filled", report.holes_filled),
            ];
            for (label, count) in repairs {
                if count > 0 {
                    println!("  {}: {} {}", "Repairs".green(), count, label);
                }
            }
            if report.non_manifold_edges > 0 {
                output::warning(
                    &format!("{} non-manifold edges left as-is", report.non_manifold_edges),
                    cli.format,
                    cli.quiet,
                );
            }
        }
    }

    Ok(())
}
