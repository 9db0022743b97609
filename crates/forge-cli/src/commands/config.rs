//! forge config command - write a default service configuration.

use std::path::Path;

use anyhow::{Result, bail};
use forge_pipeline::ServiceConfig;
use serde::Serialize;

use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct ConfigWritten<'a> {
    path: String,
    config: &'a ServiceConfig,
}

pub fn run(path: &Path, force: bool, cli: &Cli) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let config = ServiceConfig::default();
    config.save_toml(path)?;

    match cli.format {
        OutputFormat::Json => output::print(
            &ConfigWritten {
                path: path.display().to_string(),
                config: &config,
            },
            cli.format,
            cli.quiet,
        ),
        OutputFormat::Text => output::success(
            &format!("Default configuration written to {}", path.display()),
            cli.format,
            cli.quiet,
        ),
    }
    Ok(())
}
