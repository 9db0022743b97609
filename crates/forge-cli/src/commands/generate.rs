//! forge generate command - run one job end to end.
//!
//! Uses the procedural model backend, so it runs offline in seconds. The
//! job goes through the same stages, budget and artifact layout as it would
//! with real models.

use std::path::Path;

use anyhow::{Context, Result, bail};
use colored::Colorize;
use tracing::debug;
use forge_pipeline::{
    GenerationMode, JobRecord, JobStatus, OracleSet, Orchestrator, ServiceConfig, TierLevel,
};

use crate::{Cli, Mode, OutputFormat, output};

impl From<Mode> for GenerationMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Fast => GenerationMode::Fast,
            Mode::Quality => GenerationMode::Quality,
        }
    }
}

fn load_config(config: Option<&Path>, root: Option<&Path>) -> Result<ServiceConfig> {
    let mut service = match config {
        Some(path) => ServiceConfig::from_toml_file(path)?,
        None => ServiceConfig::default(),
    };
    if let Some(root) = root {
        let rooted = ServiceConfig::with_root(root);
        service.output_dir = rooted.output_dir;
        service.upload_dir = rooted.upload_dir;
    }
    Ok(service)
}

pub fn run(
    prompt: Option<&str>,
    image: Option<&Path>,
    mode: Mode,
    config: Option<&Path>,
    root: Option<&Path>,
    cli: &Cli,
) -> Result<()> {
    let orchestrator = Orchestrator::new(load_config(config, root)?, OracleSet::procedural())?;
    let mode = GenerationMode::from(mode);

    let id = match (prompt, image) {
        (_, Some(path)) => {
            let bytes =
                std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            orchestrator.submit_image_job(&bytes, &filename, mode)?
        }
        (Some(prompt), None) => orchestrator.submit_text_job(prompt, mode)?,
        (None, None) => bail!("either a prompt or --image is required"),
    };
    let job = orchestrator.get_job(id)?;
    debug!(%id, status = %job.status, stage = %job.stage, "Job finished");

    match cli.format {
        OutputFormat::Json => output::print(&job, cli.format, cli.quiet),
        OutputFormat::Text => {
            if !cli.quiet {
                print_job(&job, orchestrator.tier().level);
            }
        }
    }

    match job.status {
        JobStatus::Completed => Ok(()),
        status => bail!(
            "job {} {}: {}",
            job.id,
            status,
            job.error.as_deref().unwrap_or("no error recorded")
        ),
    }
}

fn print_job(job: &JobRecord, tier: TierLevel) {
    let status = match job.status {
        JobStatus::Completed => job.status.to_string().green().bold(),
        JobStatus::Failed => job.status.to_string().red().bold(),
        _ => job.status.to_string().yellow(),
    };
    println!("{} {} ({})", "Job".bold().underline(), job.id, status);
    println!("  {}: {} / {}", "Mode".cyan(), job.mode, tier);
    if let Some(prompt) = &job.prompt {
        println!("  {}: {}", "Prompt".cyan(), prompt);
    }
    println!("  {}: {} ({}%)", "Stage".cyan(), job.stage, job.progress);
    if let Some(path) = &job.mesh_path {
        println!("  {}: {}", "Mesh".cyan(), path.display());
    }
    if let Some(faces) = job.face_count {
        println!("  {}: {}", "Faces".cyan(), faces);
    }
    if let Some(source) = job.texture_source {
        println!("  {}: {:?}", "Texture".cyan(), source);
    }
    if let Some(error) = &job.error {
        println!("  {}: {}", "Error".red(), error);
    }
}
