//! Hardware optimization tiers.
//!
//! A tier is chosen once at startup from the memory budget and fixes every
//! quality knob the stages read: synthesis resolution, steps and guidance,
//! memory savers, reconstruction chunking and the post-processing budget.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::resource::ModelKind;

/// One gibibyte in bytes.
pub const GIB: u64 = 1024 * 1024 * 1024;

/// Reconstruction grid resolution for [`GenerationMode::Fast`].
pub const FAST_RECONSTRUCTION_RESOLUTION: u32 = 256;

/// Reconstruction grid resolution for [`GenerationMode::Quality`].
pub const QUALITY_RECONSTRUCTION_RESOLUTION: u32 = 384;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TierLevel {
    /// 12 GiB or more.
    Ample,
    /// 8 to 12 GiB.
    Medium,
    /// Less than 8 GiB.
    Constrained,
    /// No accelerator memory.
    CpuOnly,
}

impl fmt::Display for TierLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TierLevel::Ample => "ample",
            TierLevel::Medium => "medium",
            TierLevel::Constrained => "constrained",
            TierLevel::CpuOnly => "cpu-only",
        };
        f.write_str(name)
    }
}

/// Floating point precision the models run at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Fp16,
    Fp32,
}

/// Diffusion settings for one text-to-image model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SynthesisSettings {
    /// Square output edge in pixels.
    pub resolution: u32,
    pub steps: u32,
    pub guidance: f32,
}

/// Every tier-dependent parameter of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationTier {
    pub level: TierLevel,
    pub precision: Precision,
    pub fast: SynthesisSettings,
    pub quality: SynthesisSettings,
    pub attention_slicing: bool,
    pub vae_slicing: bool,
    pub vae_tiling: bool,
    pub cpu_offload: bool,
    pub memory_efficient_attention: bool,
    /// Share of a model's full cost that stays resident, in percent.
    /// Offloading and half precision keep only part of the weights on the
    /// accelerator.
    pub residency_percent: u64,
    /// Points evaluated per reconstruction batch.
    pub reconstruction_chunk_size: u32,
    /// Upper bound on the reconstruction grid resolution.
    pub max_reconstruction_resolution: u32,
    pub smoothing_iterations: usize,
    pub target_faces: usize,
    pub texture_views: usize,
    pub texture_resolution: u32,
}

impl OptimizationTier {
    /// Pick the tier for a memory budget in bytes. Zero means CPU only.
    pub fn select(budget_bytes: u64) -> Self {
        let level = if budget_bytes >= 12 * GIB {
            TierLevel::Ample
        } else if budget_bytes >= 8 * GIB {
            TierLevel::Medium
        } else if budget_bytes > 0 {
            TierLevel::Constrained
        } else {
            TierLevel::CpuOnly
        };
        Self::for_level(level)
    }

    pub fn for_level(level: TierLevel) -> Self {
        match level {
            TierLevel::Ample => Self {
                level,
                precision: Precision::Fp16,
                fast: SynthesisSettings {
                    resolution: 512,
                    steps: 30,
                    guidance: 7.5,
                },
                quality: SynthesisSettings {
                    resolution: 1024,
                    steps: 40,
                    guidance: 7.5,
                },
                attention_slicing: false,
                vae_slicing: false,
                vae_tiling: false,
                cpu_offload: false,
                memory_efficient_attention: true,
                residency_percent: 100,
                reconstruction_chunk_size: 8192,
                max_reconstruction_resolution: QUALITY_RECONSTRUCTION_RESOLUTION,
                smoothing_iterations: 2,
                target_faces: 50_000,
                texture_views: 4,
                texture_resolution: 1024,
            },
            TierLevel::Medium => Self {
                level,
                precision: Precision::Fp16,
                fast: SynthesisSettings {
                    resolution: 512,
                    steps: 25,
                    guidance: 7.5,
                },
                quality: SynthesisSettings {
                    resolution: 1024,
                    steps: 30,
                    guidance: 7.0,
                },
                attention_slicing: true,
                vae_slicing: true,
                vae_tiling: false,
                cpu_offload: true,
                memory_efficient_attention: true,
                residency_percent: 75,
                reconstruction_chunk_size: 4096,
                max_reconstruction_resolution: 192,
                smoothing_iterations: 2,
                target_faces: 30_000,
                texture_views: 2,
                texture_resolution: 768,
            },
            TierLevel::Constrained => Self {
                level,
                precision: Precision::Fp16,
                fast: SynthesisSettings {
                    resolution: 512,
                    steps: 20,
                    guidance: 7.0,
                },
                quality: SynthesisSettings {
                    resolution: 768,
                    steps: 25,
                    guidance: 7.0,
                },
                attention_slicing: true,
                vae_slicing: true,
                vae_tiling: true,
                cpu_offload: true,
                memory_efficient_attention: true,
                residency_percent: 40,
                reconstruction_chunk_size: 2048,
                max_reconstruction_resolution: 128,
                smoothing_iterations: 1,
                target_faces: 15_000,
                texture_views: 1,
                texture_resolution: 512,
            },
            TierLevel::CpuOnly => Self {
                level,
                precision: Precision::Fp32,
                fast: SynthesisSettings {
                    resolution: 512,
                    steps: 15,
                    guidance: 7.0,
                },
                quality: SynthesisSettings {
                    resolution: 512,
                    steps: 15,
                    guidance: 7.0,
                },
                attention_slicing: true,
                vae_slicing: true,
                vae_tiling: true,
                cpu_offload: true,
                memory_efficient_attention: false,
                residency_percent: 100,
                reconstruction_chunk_size: 1024,
                max_reconstruction_resolution: 96,
                smoothing_iterations: 1,
                target_faces: 5_000,
                texture_views: 1,
                texture_resolution: 512,
            },
        }
    }
}

/// Speed/quality trade-off requested with a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    #[default]
    Fast,
    Quality,
}

impl GenerationMode {
    /// Text-to-image model used in this mode.
    pub fn text_model(self) -> ModelKind {
        match self {
            GenerationMode::Fast => ModelKind::TextFast,
            GenerationMode::Quality => ModelKind::TextQuality,
        }
    }

    pub fn synthesis(self, tier: &OptimizationTier) -> SynthesisSettings {
        match self {
            GenerationMode::Fast => tier.fast,
            GenerationMode::Quality => tier.quality,
        }
    }

    /// Mode resolution, capped by the tier.
    pub fn reconstruction_resolution(self, tier: &OptimizationTier) -> u32 {
        let wanted = match self {
            GenerationMode::Fast => FAST_RECONSTRUCTION_RESOLUTION,
            GenerationMode::Quality => QUALITY_RECONSTRUCTION_RESOLUTION,
        };
        wanted.min(tier.max_reconstruction_resolution)
    }
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationMode::Fast => write!(f, "fast"),
            GenerationMode::Quality => write!(f, "quality"),
        }
    }
}

impl std::str::FromStr for GenerationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(GenerationMode::Fast),
            "quality" => Ok(GenerationMode::Quality),
            other => Err(format!("unknown mode '{other}', expected fast or quality")),
        }
    }
}
