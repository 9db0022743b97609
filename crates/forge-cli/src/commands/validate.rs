//! forge validate command - report topology problems.

use std::path::Path;

use anyhow::{Context, Result, bail};
use colored::Colorize;
use forge_mesh::{load_glb, validate_mesh};
use serde::Serialize;

use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct ValidationResult {
    path: String,
    valid: bool,
    issues: Vec<Issue>,
}

#[derive(Serialize)]
struct Issue {
    message: String,
    severity: &'static str,
}

pub fn run(input: &Path, strict: bool, cli: &Cli) -> Result<()> {
    let mesh = load_glb(input).with_context(|| format!("Failed to load mesh from {:?}", input))?;
    let report = validate_mesh(&mesh);

    let mut issues = Vec::new();
    if !report.is_watertight {
        issues.push(Issue {
            message: format!(
                "Mesh is not watertight ({} boundary edges)",
                report.boundary_edge_count
            ),
            severity: if strict { "error" } else { "warning" },
        });
    }
    if !report.is_manifold {
        issues.push(Issue {
            message: format!(
                "Mesh is not manifold ({} non-manifold edges)",
                report.non_manifold_edge_count
            ),
            severity: if strict { "error" } else { "warning" },
        });
    }
    if report.degenerate_face_count > 0 {
        issues.push(Issue {
            message: format!("{} degenerate faces", report.degenerate_face_count),
            severity: "warning",
        });
    }
    if report.component_count > 1 {
        issues.push(Issue {
            message: format!("{} disconnected components", report.component_count),
            severity: "info",
        });
    }
    if !report.has_uvs {
        issues.push(Issue {
            message: "No texture coordinates".to_string(),
            severity: "info",
        });
    }

    let valid = !issues.iter().any(|i| i.severity == "error");
    let result = ValidationResult {
        path: input.display().to_string(),
        valid,
        issues,
    };

    match cli.format {
        OutputFormat::Json => output::print(&result, cli.format, cli.quiet),
        OutputFormat::Text => {
            if !cli.quiet {
                if result.issues.is_empty() {
                    output::success("No issues found", cli.format, cli.quiet);
                }
                for issue in &result.issues {
                    let label = match issue.severity {
                        "error" => issue.severity.red().bold(),
                        "warning" => issue.severity.yellow(),
                        _ => issue.severity.normal(),
                    };
                    println!("  {}: {}", label, issue.message);
                }
            }
        }
    }

    if !result.valid {
        bail!("{} failed validation", input.display());
    }
    Ok(())
}
