//! forge tier command - show the settings chosen for a memory budget.

use std::path::Path;

use anyhow::{Result, ensure};
use colored::Colorize;
use forge_pipeline::{GIB, GenerationMode, OptimizationTier, ServiceConfig};

use crate::{Cli, OutputFormat, output};

pub fn run(budget_gib: Option<f64>, config: Option<&Path>, cli: &Cli) -> Result<()> {
    let budget = match (budget_gib, config) {
        (Some(gib), _) => {
            ensure!(gib >= 0.0 && gib.is_finite(), "budget must be a non-negative number");
            (gib * GIB as f64) as u64
        }
        (None, Some(path)) => ServiceConfig::from_toml_file(path)?.memory_budget_bytes,
        (None, None) => ServiceConfig::default().memory_budget_bytes,
    };
    let tier = OptimizationTier::select(budget);

    match cli.format {
        OutputFormat::Json => output::print(&tier, cli.format, cli.quiet),
        OutputFormat::Text => {
            if cli.quiet {
                return Ok(());
            }
            println!(
                "{} {} ({:.1} GiB)",
                "Tier".bold().underline(),
                tier.level.to_string().green().bold(),
                budget as f64 / GIB as f64
            );
            for mode in [GenerationMode::Fast, GenerationMode::Quality] {
                let s = mode.synthesis(&tier);
                println!(
                    "  {}: {}px, {} steps, guidance {:.1}, reconstruction {}",
                    mode.to_string().cyan(),
                    s.resolution,
                    s.steps,
                    s.guidance,
                    mode.reconstruction_resolution(&tier)
                );
            }
            println!("  {}: {:?}", "Precision".cyan(), tier.precision);
            println!("  {}: {}%", "Resident share".cyan(), tier.residency_percent);
            println!("  {}: {}", "Chunk size".cyan(), tier.reconstruction_chunk_size);
            println!("  {}: {}", "Smoothing".cyan(), tier.smoothing_iterations);
            println!("  {}: {}", "Target faces".cyan(), tier.target_faces);
            println!(
                "  {}: {} views at {}px",
                "Texture".cyan(),
                tier.texture_views,
                tier.texture_resolution
            );
            println!(
                "  {}: attention slicing {}, VAE slicing {}, VAE tiling {}, offload {}",
                "Memory".cyan(),
                output::yes_no(tier.attention_slicing),
                output::yes_no(tier.vae_slicing),
                output::yes_no(tier.vae_tiling),
                output::yes_no(tier.cpu_offload)
            );
        }
    }
    Ok(())
}
