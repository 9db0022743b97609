//! forge preprocess command - prepare a photo for reconstruction.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use forge_pipeline::procedural::ProceduralBackgroundRemover;
use forge_pipeline::{BackgroundRemover, PreprocessParams, preprocess};
use image::ImageFormat;
use serde::Serialize;

use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct PreprocessResult {
    input: String,
    output: String,
    original: [u32; 2],
    size: u32,
    background_removed: bool,
    equalized: bool,
}

pub fn run(
    input: &Path,
    output_path: &Path,
    size: u32,
    remove_background: bool,
    equalize: bool,
    cli: &Cli,
) -> Result<()> {
    let image =
        image::open(input).with_context(|| format!("Failed to read image from {:?}", input))?;

    let params = PreprocessParams {
        normalize_lighting: equalize,
        ..PreprocessParams::new(remove_background, size)
    };
    let remover = ProceduralBackgroundRemover;
    let prepared = preprocess(&image, &params, Some(&remover as &dyn BackgroundRemover))?;
    prepared
        .save_with_format(output_path, ImageFormat::Png)
        .with_context(|| format!("Failed to write {:?}", output_path))?;

    let result = PreprocessResult {
        input: input.display().to_string(),
        output: output_path.display().to_string(),
        original: [image.width(), image.height()],
        size,
        background_removed: remove_background,
        equalized: equalize,
    };

    match cli.format {
        OutputFormat::Json => output::print(&result, cli.format, cli.quiet),
        OutputFormat::Text => {
            if !cli.quiet {
                output::success(
                    &format!("Preprocessed image saved to {}", result.output),
                    cli.format,
                    cli.quiet,
                );
                println!(
                    "  {}: {}x{} → {}x{}",
                    "Size".cyan(),
                    result.original[0],
                    result.original[1],
                    size,
                    size
                );
                println!(
                    "  {}: {}",
                    "Background removed".cyan(),
                    output::yes_no(result.background_removed)
                );
                println!("  {}: {}", "Equalized".cyan(), output::yes_no(result.equalized));
            }
        }
    }

    Ok(())
}
