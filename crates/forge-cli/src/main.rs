//! forge: command-line front end to the mesh generation pipeline.
//!
//! Runs whole generation jobs against the offline procedural backend, and
//! exposes the geometry and image stages on their own for scripting.
//!
//! # Logging
//!
//! Set the `RUST_LOG` environment variable to control log output:
//! - `RUST_LOG=forge_pipeline=info` - Job and stage progress
//! - `RUST_LOG=forge_mesh=debug` - Detailed geometry logging
//! - `RUST_LOG=forge_mesh::timing=debug` - Per-operation timing
//!
//! # Example
//!
//! ```bash
//! forge generate "a weathered bronze statue" --root data
//! forge remesh data/outputs/raw.glb -o out.glb --topology quad --quality low
//! RUST_LOG=debug forge info out.glb
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use miette::Diagnostic;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;
mod output;

use commands::{config, generate, info, preprocess, remesh, repair, tier, validate};

/// forge - Turn text prompts and photos into 3D meshes.
#[derive(Parser)]
#[command(name = "forge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format for results
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Suppress all non-error output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Increase output verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a mesh from a text prompt or a photo
    Generate {
        /// Text prompt (omit when using --image)
        #[arg(required_unless_present = "image")]
        prompt: Option<String>,

        /// Photo to reconstruct instead of a prompt
        #[arg(long, conflicts_with = "prompt")]
        image: Option<PathBuf>,

        /// Speed/quality trade-off
        #[arg(long, default_value = "fast")]
        mode: Mode,

        /// Service configuration (TOML)
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Directory holding outputs/ and uploads/ (overrides the config)
        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Display mesh statistics
    Info {
        /// Input GLB file
        input: PathBuf,
    },

    /// Check a mesh for topology problems
    Validate {
        /// Input GLB file
        input: PathBuf,

        /// Fail unless the mesh is watertight and manifold
        #[arg(long)]
        strict: bool,
    },

    /// Repair a raw reconstruction
    Repair {
        /// Input GLB file
        input: PathBuf,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Only weld and drop broken faces; keep winding and holes
        #[arg(long)]
        conservative: bool,

        /// Fill holes up to this edge count
        #[arg(long)]
        max_hole_edges: Option<usize>,

        /// Vertex welding tolerance
        #[arg(long)]
        weld_tolerance: Option<f64>,
    },

    /// Remesh to a face budget and normalize the scale
    Remesh {
        /// Input GLB file
        input: PathBuf,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Output topology
        #[arg(long, default_value = "triangle")]
        topology: TopologyArg,

        /// Face budget preset
        #[arg(long, default_value = "medium", conflicts_with = "faces")]
        quality: Quality,

        /// Exact target face count
        #[arg(long)]
        faces: Option<usize>,

        /// Largest extent after normalization
        #[arg(long, default_value = "1.0")]
        unit_size: f64,
    },

    /// Prepare a photo for reconstruction
    Preprocess {
        /// Input image
        input: PathBuf,

        /// Output PNG path
        #[arg(short, long)]
        output: PathBuf,

        /// Edge length of the square output
        #[arg(long, default_value = "512")]
        size: u32,

        /// Keep the background
        #[arg(long)]
        keep_background: bool,

        /// Skip lighting equalization
        #[arg(long)]
        no_equalize: bool,
    },

    /// Show the optimization tier for a memory budget
    Tier {
        /// Memory budget in GiB (0 for CPU only)
        #[arg(long, conflicts_with = "config")]
        budget_gib: Option<f64>,

        /// Read the budget from a service configuration
        #[arg(long, short)]
        config: Option<PathBuf>,
    },

    /// Write a default service configuration
    Config {
        /// Destination TOML file
        #[arg(default_value = "forge.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Mode {
    /// Fewer steps, lower reconstruction resolution
    Fast,
    /// More steps, higher reconstruction resolution
    Quality,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum TopologyArg {
    /// Triangle mesh at the target face count
    Triangle,
    /// Quad-dominant approximation
    Quad,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Quality {
    /// 5000 faces
    Low,
    /// 15000 faces
    Medium,
    /// 50000 faces
    High,
}

/// Initialize the tracing subscriber based on verbosity level.
fn init_tracing(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    // RUST_LOG wins over -v
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match verbose {
            0 => "warn",
            1 => "forge_pipeline=info,forge_mesh=info",
            2 => "forge_pipeline=debug,forge_mesh=debug",
            _ => "trace",
        };
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(filter)
        .init();
}

fn report_diagnostic(err: &dyn Diagnostic, code: impl std::fmt::Display) {
    eprintln!("{}: {}", "Error".red().bold(), err);
    eprintln!("  {}: {}", "Code".cyan(), code);
    if let Some(help) = err.help() {
        eprintln!("  {}: {}", "Suggestion".green(), help);
    }
}

fn main() -> Result<()> {
    #[cfg(debug_assertions)]
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let result = match &cli.command {
        Commands::Generate {
            prompt,
            image,
            mode,
            config,
            root,
        } => generate::run(
            prompt.as_deref(),
            image.as_deref(),
            *mode,
            config.as_deref(),
            root.as_deref(),
            &cli,
        ),
        Commands::Info { input } => info::run(input, &cli),
        Commands::Validate { input, strict } => validate::run(input, *strict, &cli),
        Commands::Repair {
            input,
            output,
            conservative,
            max_hole_edges,
            weld_tolerance,
        } => repair::run(
            input,
            output,
            *conservative,
            *max_hole_edges,
            *weld_tolerance,
            &cli,
        ),
        Commands::Remesh {
            input,
            output,
            topology,
            quality,
            faces,
            unit_size,
        } => remesh::run(input, output, *topology, *quality, *faces, *unit_size, &cli),
        Commands::Preprocess {
            input,
            output,
            size,
            keep_background,
            no_equalize,
        } => preprocess::run(input, output, *size, !*keep_background, !*no_equalize, &cli),
        Commands::Tier { budget_gib, config } => tier::run(*budget_gib, config.as_deref(), &cli),
        Commands::Config { path, force } => config::run(path, *force, &cli),
    };

    if let Err(e) = &result {
        if !cli.quiet {
            if let Some(err) = e.downcast_ref::<forge_pipeline::PipelineError>() {
                report_diagnostic(err, err.code());
            } else if let Some(err) = e.downcast_ref::<forge_mesh::MeshError>() {
                report_diagnostic(err, err.code());
            } else {
                eprintln!("{}: {}", "Error".red().bold(), e);
                for cause in e.chain().skip(1) {
                    eprintln!("  {}: {}", "Caused by".yellow(), cause);
                }
            }
        }
        std::process::exit(1);
    }

    Ok(())
}
