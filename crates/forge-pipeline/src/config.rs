//! Service configuration.
//!
//! ```toml
//! output_dir = "outputs"
//! upload_dir = "uploads"
//! memory_budget_bytes = 8589934592
//! acquire_timeout_ms = 30000
//!
//! [model_costs]
//! text_quality = 7516192768
//!
//! [texture]
//! style = "hand-painted"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use forge_mesh::TextureStyle;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::preprocess::PreprocessParams;
use crate::resource::ModelKind;
use crate::tier::{GIB, OptimizationTier};

/// Upload extensions accepted by default.
pub const DEFAULT_ALLOWED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Where generated artifacts are written.
    pub output_dir: PathBuf,
    /// Where uploaded originals are stored.
    pub upload_dir: PathBuf,
    /// Accelerator memory available to models. Zero selects the CPU-only tier.
    pub memory_budget_bytes: u64,
    /// Residency budget used when `memory_budget_bytes` is zero.
    pub cpu_budget_bytes: u64,
    /// How long a job waits for a busy model. Unset waits forever.
    pub acquire_timeout_ms: Option<u64>,
    /// Fixed diffusion seed for reproducible previews.
    pub synthesis_seed: Option<u64>,
    /// Edge length of the normalized output mesh.
    pub unit_size: f64,
    /// Keep `{id}_raw.glb` after a successful job.
    pub keep_raw_artifacts: bool,
    pub model_costs: ModelCosts,
    pub limits: RequestLimits,
    pub preprocess: PreprocessParams,
    pub texture: TextureSettings,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("outputs"),
            upload_dir: PathBuf::from("uploads"),
            memory_budget_bytes: 12 * GIB,
            cpu_budget_bytes: 16 * GIB,
            acquire_timeout_ms: None,
            synthesis_seed: None,
            unit_size: 1.0,
            keep_raw_artifacts: false,
            model_costs: ModelCosts::default(),
            limits: RequestLimits::default(),
            preprocess: PreprocessParams::default(),
            texture: TextureSettings::default(),
        }
    }
}

impl ServiceConfig {
    /// Config writing everything below `root`.
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            output_dir: root.join("outputs"),
            upload_dir: root.join("uploads"),
            ..Self::default()
        }
    }

    /// Tier for the configured memory budget.
    pub fn tier(&self) -> OptimizationTier {
        OptimizationTier::select(self.memory_budget_bytes)
    }

    /// Budget the resource manager enforces.
    pub fn residency_budget(&self) -> u64 {
        if self.memory_budget_bytes > 0 {
            self.memory_budget_bytes
        } else {
            self.cpu_budget_bytes
        }
    }

    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        Self::from_toml(&contents).map_err(|e| PipelineError::Config {
            details: format!("{}: {e}", path.display()),
        })
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Save configuration to a TOML file.
    pub fn save_toml(&self, path: impl AsRef<Path>) -> PipelineResult<()> {
        let path = path.as_ref();
        let contents = self.to_toml().map_err(|e| PipelineError::Config {
            details: e.to_string(),
        })?;
        std::fs::write(path, contents).map_err(|e| PipelineError::io(path, e))
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Memory each model occupies while resident, in bytes.
///
/// These are full-precision, fully resident costs. The resource manager
/// charges [`ModelCosts::for_tier`], which shrinks them for tiers that offload
/// weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelCosts {
    pub text_fast: u64,
    pub text_quality: u64,
    pub reconstructor: u64,
    pub texturer: u64,
}

impl Default for ModelCosts {
    fn default() -> Self {
        Self {
            text_fast: 4 * GIB,
            text_quality: 8 * GIB,
            reconstructor: 6 * GIB,
            texturer: 5 * GIB,
        }
    }
}

impl ModelCosts {
    pub fn cost(&self, kind: ModelKind) -> u64 {
        match kind {
            ModelKind::TextFast => self.text_fast,
            ModelKind::TextQuality => self.text_quality,
            ModelKind::Reconstructor => self.reconstructor,
            ModelKind::Texturer => self.texturer,
        }
    }

    /// Costs as charged under `tier`, rounded up to the byte.
    pub fn for_tier(&self, tier: &OptimizationTier) -> Self {
        let scale = |cost: u64| {
            let scaled = (u128::from(cost) * u128::from(tier.residency_percent)).div_ceil(100);
            u64::try_from(scaled).unwrap_or(u64::MAX)
        };
        Self {
            text_fast: scale(self.text_fast),
            text_quality: scale(self.text_quality),
            reconstructor: scale(self.reconstructor),
            texturer: scale(self.texturer),
        }
    }

    /// Same cost for every model.
    pub fn uniform(cost: u64) -> Self {
        Self {
            text_fast: cost,
            text_quality: cost,
            reconstructor: cost,
            texturer: cost,
        }
    }
}

/// Request validation limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestLimits {
    pub max_prompt_chars: usize,
    pub max_upload_bytes: usize,
    /// Lowercase extensions without the dot.
    pub allowed_extensions: Vec<String>,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_prompt_chars: 500,
            max_upload_bytes: 20 * 1024 * 1024,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}

/// Texturing of the final mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextureSettings {
    pub enabled: bool,
    /// Style of the procedural fallback texture.
    pub style: TextureStyle,
    /// Seed of the procedural fallback texture.
    pub seed: u64,
}

impl Default for TextureSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            style: TextureStyle::Default,
            seed: 42,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::TierLevel;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.limits.max_prompt_chars, 500);
        assert_eq!(config.limits.max_upload_bytes, 20 * 1024 * 1024);
        assert_eq!(config.preprocess.target_size, 512);
        assert_eq!(config.tier().level, TierLevel::Ample);
        assert!(config.acquire_timeout().is_none());
    }

    #[test]
    fn test_default_costs_fit_each_tier() {
        for budget in [4 * GIB, 8 * GIB, 12 * GIB] {
            let mut config = ServiceConfig::default();
            config.memory_budget_bytes = budget;
            let costs = config.model_costs.for_tier(&config.tier());
            for kind in ModelKind::ALL {
                assert!(
                    costs.cost(kind) <= config.residency_budget(),
                    "{kind} does not fit {budget}"
                );
            }
        }

        let mut cpu = ServiceConfig::default();
        cpu.memory_budget_bytes = 0;
        let costs = cpu.model_costs.for_tier(&cpu.tier());
        assert_eq!(costs, cpu.model_costs);
        assert!(costs.text_quality <= cpu.residency_budget());
    }

    #[test]
    fn test_tier_scaling_rounds_up() {
        let constrained = OptimizationTier::for_level(TierLevel::Constrained);
        let costs = ModelCosts::uniform(1).for_tier(&constrained);
        assert_eq!(costs, ModelCosts::uniform(1));
        let costs = ModelCosts::default().for_tier(&constrained);
        assert_eq!(costs.reconstructor, (6 * GIB * 40).div_ceil(100));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ServiceConfig::from_toml(
            r#"
            memory_budget_bytes = 0
            acquire_timeout_ms = 250

            [model_costs]
            text_quality = 1024

            [texture]
            style = "hand-painted"
            "#,
        )
        .unwrap();
        assert_eq!(config.tier().level, TierLevel::CpuOnly);
        assert_eq!(config.residency_budget(), 16 * GIB);
        assert_eq!(config.acquire_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.model_costs.text_quality, 1024);
        assert_eq!(config.model_costs.text_fast, 4 * GIB);
        assert_eq!(config.texture.style, TextureStyle::HandPainted);
        assert!(config.texture.enabled);
    }

    #[test]
    fn test_toml_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forge.toml");
        let mut config = ServiceConfig::with_root(dir.path());
        config.synthesis_seed = Some(7);
        config.save_toml(&path).unwrap();

        let loaded = ServiceConfig::from_toml_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_bad_toml_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "memory_budget_bytes = \"lots\"").unwrap();
        let err = ServiceConfig::from_toml_file(&path).unwrap_err();
        assert!(matches!(err, PipelineError::Config { .. }));

        let missing = ServiceConfig::from_toml_file(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(missing, PipelineError::Io { .. }));
    }
}
