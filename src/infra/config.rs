// src/infra/config.rs — Configuration loading (TOML + environment)

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::infra::paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub models: ModelsConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub self_correction: SelfCorrectionConfig,

    #[serde(default)]
    pub validation: ValidationConfig,

    #[serde(default)]
    pub outcomes: OutcomesConfig,

    #[serde(default)]
    pub neural: NeuralConfig,

    #[serde(default)]
    pub router: RouterConfig,

    #[serde(default)]
    pub adaptive: AdaptiveConfig,

    #[serde(default)]
    pub oss: OssConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Model used for candidate generation.
    pub generator: String,
    /// Model used for embeddings (neural router).
    pub embedder: String,
    /// Backend base URL.
    pub base_url: String,
    /// Max tokens per generation request.
    pub max_tokens: u32,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            generator: "qwen2.5-coder:7b".into(),
            embedder: "nomic-embed-text".into(),
            base_url: "http://localhost:11434".into(),
            max_tokens: 1200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Per-candidate generation timeout in seconds.
    pub per_candidate_timeout_seconds: u64,
    /// Run candidate generation concurrently.
    pub parallel: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            per_candidate_timeout_seconds: 120,
            parallel: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfCorrectionConfig {
    pub enabled: bool,
    /// Clamped to [1, 10].
    pub max_iterations: u8,
    /// Score floor below which correction is not attempted. Clamped to [0, 1).
    pub min_score: f32,
}

impl Default for SelfCorrectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_iterations: 3,
            min_score: 0.10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// When set, overrides the profile's parallel-validation default.
    pub parallel: Option<bool>,
    /// Per-rule timeout in seconds for external validators.
    pub per_rule_timeout_seconds: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            parallel: None,
            per_rule_timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomesConfig {
    /// Row TTL in days. Clamped to [1, 365].
    pub ttl_days: u32,
}

impl Default for OutcomesConfig {
    fn default() -> Self {
        Self { ttl_days: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeuralConfig {
    pub enabled: bool,
    /// Minimum confidence to accept a tier-1 classification. Clamped to [0, 1].
    pub min_confidence: f32,
    /// Neighbours used for weighted voting.
    pub top_k: usize,
}

impl Default for NeuralConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_confidence: 0.6,
            top_k: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Whether tier 2 (LLM tool selection) runs when tiers 0-1 miss.
    pub llm_fallback: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self { llm_fallback: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    pub enabled: bool,
    /// Fraction of the time budget reserved for the critical step.
    /// Clamped to (0, 1).
    pub critical_share: f32,
    /// Persist history to disk.
    pub persist: bool,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            critical_share: 0.5,
            persist: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OssConfig {
    /// Inject OSS pattern context into generation prompts.
    /// ENABLE_OSS_CONTEXT overrides.
    pub context_enabled: bool,
}

impl Default for OssConfig {
    fn default() -> Self {
        Self {
            context_enabled: true,
        }
    }
}

impl Config {
    /// Load config from file, falling back to defaults, then apply
    /// environment overrides and range clamps.
    pub fn load() -> anyhow::Result<Self> {
        let path = paths::config_file_path();
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env();
        config.clamp();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("ENABLE_OSS_CONTEXT") {
            self.oss.context_enabled = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    /// Clamp recognised options into their documented ranges.
    pub fn clamp(&mut self) {
        self.self_correction.max_iterations = self.self_correction.max_iterations.clamp(1, 10);
        self.self_correction.min_score = self.self_correction.min_score.clamp(0.0, 0.999);
        self.outcomes.ttl_days = self.outcomes.ttl_days.clamp(1, 365);
        self.neural.min_confidence = self.neural.min_confidence.clamp(0.0, 1.0);
        self.adaptive.critical_share = self.adaptive.critical_share.clamp(0.01, 0.99);
        if self.neural.top_k == 0 {
            self.neural.top_k = 5;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_reasonable() {
        let c = Config::default();
        assert_eq!(c.self_correction.max_iterations, 3);
        assert!((c.self_correction.min_score - 0.10).abs() < 0.001);
        assert_eq!(c.outcomes.ttl_days, 30);
        assert!((c.neural.min_confidence - 0.6).abs() < 0.001);
        assert!(c.router.llm_fallback);
        assert!(c.adaptive.enabled);
        assert!((c.adaptive.critical_share - 0.5).abs() < 0.001);
        assert!(c.oss.context_enabled);
        assert!(c.generation.parallel);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.self_correction.max_iterations, 3);
        assert_eq!(config.neural.top_k, 5);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[models]
generator = "qwen2.5-coder:32b"
embedder = "nomic-embed-text"
base_url = "http://localhost:11434"
max_tokens = 2048

[self_correction]
enabled = true
max_iterations = 5
min_score = 0.2

[validation]
parallel = false
per_rule_timeout_seconds = 15

[outcomes]
ttl_days = 90

[neural]
enabled = false
min_confidence = 0.75
top_k = 7

[router]
llm_fallback = false

[adaptive]
enabled = false
critical_share = 0.3
persist = false
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.models.generator, "qwen2.5-coder:32b");
        assert_eq!(config.models.max_tokens, 2048);
        assert_eq!(config.self_correction.max_iterations, 5);
        assert_eq!(config.validation.parallel, Some(false));
        assert_eq!(config.validation.per_rule_timeout_seconds, 15);
        assert_eq!(config.outcomes.ttl_days, 90);
        assert!(!config.neural.enabled);
        assert_eq!(config.neural.top_k, 7);
        assert!(!config.router.llm_fallback);
        assert!((config.adaptive.critical_share - 0.3).abs() < 0.001);
        assert!(!config.adaptive.persist);
    }

    #[test]
    fn test_clamp_ranges() {
        let mut c = Config::default();
        c.self_correction.max_iterations = 0;
        c.self_correction.min_score = 1.5;
        c.outcomes.ttl_days = 4000;
        c.neural.min_confidence = -0.2;
        c.adaptive.critical_share = 1.0;
        c.clamp();
        assert_eq!(c.self_correction.max_iterations, 1);
        assert!(c.self_correction.min_score < 1.0);
        assert_eq!(c.outcomes.ttl_days, 365);
        assert_eq!(c.neural.min_confidence, 0.0);
        assert!(c.adaptive.critical_share < 1.0);
    }

    #[test]
    fn test_clamp_max_iterations_upper() {
        let mut c = Config::default();
        c.self_correction.max_iterations = 20;
        c.clamp();
        assert_eq!(c.self_correction.max_iterations, 10);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = Config::default();
        let serialized = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(
            deserialized.self_correction.max_iterations,
            config.self_correction.max_iterations
        );
        assert_eq!(deserialized.models.generator, config.models.generator);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = Config::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
    }
}
