use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub classification: ClassificationConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// Minimum acceptable extracted-text length before escalating to the
    /// next cascade tier.
    #[serde(default = "default_min_text_length")]
    pub min_text_length: usize,
    /// Quality score (0–1) below which tier-1 output escalates even when
    /// the length check passed.
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,
    #[serde(default = "default_true")]
    pub ocr_enabled: bool,
    #[serde(default = "default_ocr_language")]
    pub ocr_language: String,
    #[serde(default = "default_tesseract_path")]
    pub tesseract_path: String,
    #[serde(default = "default_pdftoppm_path")]
    pub pdftoppm_path: String,
    #[serde(default = "default_ocr_timeout_secs")]
    pub ocr_timeout_secs: u64,
    /// Cap on pages rendered for OCR (cost control).
    #[serde(default = "default_max_pages_ocr")]
    pub max_pages_ocr: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_text_length: default_min_text_length(),
            quality_threshold: default_quality_threshold(),
            ocr_enabled: true,
            ocr_language: default_ocr_language(),
            tesseract_path: default_tesseract_path(),
            pdftoppm_path: default_pdftoppm_path(),
            ocr_timeout_secs: default_ocr_timeout_secs(),
            max_pages_ocr: default_max_pages_ocr(),
        }
    }
}

fn default_min_text_length() -> usize {
    50
}
fn default_quality_threshold() -> f64 {
    0.5
}
fn default_true() -> bool {
    true
}
fn default_ocr_language() -> String {
    "spa".to_string()
}
fn default_tesseract_path() -> String {
    "tesseract".to_string()
}
fn default_pdftoppm_path() -> String {
    "pdftoppm".to_string()
}
fn default_ocr_timeout_secs() -> u64 {
    60
}
fn default_max_pages_ocr() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassificationConfig {
    /// Whether to fall back to the AI content classifier when the
    /// filename gives no signal.
    #[serde(default = "default_true")]
    pub use_ai: bool,
    /// Confidence below this is flagged for manual review.
    #[serde(default = "default_low_confidence")]
    pub low_confidence: f64,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            use_ai: true,
            low_confidence: default_low_confidence(),
        }
    }
}

fn default_low_confidence() -> f64 {
    0.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct AiConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub vision_model: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay inserted between consecutive AI calls in a batch run.
    /// Caller-level rate/cost control, not a pipeline invariant.
    #[serde(default)]
    pub request_delay_ms: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            vision_model: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            request_delay_ms: 0,
        }
    }
}

impl AiConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    700
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.extraction.min_text_length == 0 {
        anyhow::bail!("extraction.min_text_length must be > 0");
    }
    if !(0.0..=1.0).contains(&config.extraction.quality_threshold) {
        anyhow::bail!("extraction.quality_threshold must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&config.classification.low_confidence) {
        anyhow::bail!("classification.low_confidence must be in [0.0, 1.0]");
    }
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }

    if config.ai.is_enabled() && config.ai.model.is_none() {
        anyhow::bail!(
            "ai.model must be specified when provider is '{}'",
            config.ai.provider
        );
    }

    match config.ai.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown AI provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_toml() -> String {
        r#"
[db]
path = "/tmp/ingesta.sqlite"

[server]
bind = "127.0.0.1:7410"
"#
        .to_string()
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config: Config = toml::from_str(&base_toml()).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.extraction.min_text_length, 50);
        assert_eq!(config.ai.provider, "disabled");
        assert!(!config.ai.is_enabled());
        assert_eq!(config.chunking.max_tokens, 700);
    }

    #[test]
    fn enabled_provider_requires_model() {
        let toml_str = format!("{}\n[ai]\nprovider = \"openai\"\n", base_toml());
        let config: Config = toml::from_str(&toml_str).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn unknown_provider_rejected() {
        let toml_str = format!(
            "{}\n[ai]\nprovider = \"acme\"\nmodel = \"m\"\n",
            base_toml()
        );
        let config: Config = toml::from_str(&toml_str).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn out_of_range_threshold_rejected() {
        let toml_str = format!(
            "{}\n[extraction]\nquality_threshold = 1.5\n",
            base_toml()
        );
        let config: Config = toml::from_str(&toml_str).unwrap();
        assert!(validate(&config).is_err());
    }
}
