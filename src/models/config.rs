//! Configuration models for powersample.
//!
//! All I^R (resolvable ignorance) is parameterized here. Defaults are applied
//! once, when the struct is built or deserialized; nothing downstream falls
//! back to ad-hoc literals.

use crate::prompts::Language;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Top-level configuration for a run.
///
/// I^R resolved: All configurable parameters are explicit. Immutable once a
/// run starts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Model backend connection
    #[serde(default)]
    pub backend: BackendConfig,

    /// Consensus and refinement sizes
    #[serde(default)]
    pub sampling: SamplingConfig,

    /// Sampling temperatures per role
    #[serde(default)]
    pub temperature: TemperatureConfig,

    /// Chain sampler (Metropolis-Hastings) settings
    #[serde(default)]
    pub mcmc: McmcConfig,

    /// Language detection settings
    #[serde(default)]
    pub language: LanguageConfig,

    /// Prompt template store
    #[serde(default)]
    pub prompts: PromptsConfig,
}

/// Model backend configuration (any OpenAI-compatible endpoint).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Model ID sent with every request
    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL for the API (a proxy URL works too)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key (can also be set via the `api_key_env` variable)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable name for the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Extra attempts after a retryable failure
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    /// Completion length cap per choice
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_retry_limit() -> u32 {
    3
}

fn default_max_tokens() -> u32 {
    2048
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            api_key: None,
            api_key_env: default_api_key_env(),
            timeout_ms: default_timeout_ms(),
            retry_limit: default_retry_limit(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Consensus width, refinement rounds and continuation size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Candidates per consensus call (k)
    #[serde(default = "default_k")]
    pub k: usize,

    /// Refinement rounds; also the chain length T in mcmc mode
    #[serde(default = "default_steps")]
    pub steps: usize,

    /// Approximate tokens requested per continuation block
    #[serde(default = "default_block_tokens")]
    pub block_tokens: u32,

    /// Replaces the `system_default` template when set
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_k() -> usize {
    3
}

fn default_steps() -> usize {
    2
}

fn default_block_tokens() -> u32 {
    200
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            steps: default_steps(),
            block_tokens: default_block_tokens(),
            system_prompt: None,
        }
    }
}

/// Temperatures, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureConfig {
    /// Diversity-seeking candidate generation
    #[serde(default = "default_sample_temperature")]
    pub sample: f64,

    /// Weak-span marking (rewriting runs at 0.9x this)
    #[serde(default = "default_rewrite_temperature")]
    pub rewrite: f64,

    /// Consensus judge
    #[serde(default)]
    pub judge: f64,
}

fn default_sample_temperature() -> f64 {
    0.9
}

fn default_rewrite_temperature() -> f64 {
    0.6
}

impl Default for TemperatureConfig {
    fn default() -> Self {
        Self {
            sample: default_sample_temperature(),
            rewrite: default_rewrite_temperature(),
            judge: 0.0,
        }
    }
}

/// Chain sampler configuration.
///
/// K_i: temp(t) = initial_temp × decay^t, strictly decreasing for decay < 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct McmcConfig {
    /// Temperature of the seed consensus and of temp(0), in (0, 1]
    #[serde(default = "default_initial_temp")]
    pub initial_temp: f64,

    /// Per-iteration multiplicative decay, in (0, 1]
    #[serde(default = "default_decay")]
    pub decay: f64,

    /// Lower bound on the acceptance probability, in [0, 1]
    #[serde(default)]
    pub acceptance_floor: f64,

    /// Seed for the acceptance draws (entropy when unset)
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_initial_temp() -> f64 {
    0.9
}

fn default_decay() -> f64 {
    0.9
}

impl Default for McmcConfig {
    fn default() -> Self {
        Self {
            initial_temp: default_initial_temp(),
            decay: default_decay(),
            acceptance_floor: 0.0,
            seed: None,
        }
    }
}

/// Language detection configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LanguageConfig {
    /// Ask the backend for the prompt's language once per run
    #[serde(default = "default_true")]
    pub auto_detect: bool,

    /// Used when detection is disabled, fails, or returns an unknown code
    #[serde(default)]
    pub default: Language,
}

fn default_true() -> bool {
    true
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            auto_detect: true,
            default: Language::default(),
        }
    }
}

/// Prompt template store configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptsConfig {
    /// JSON template file overlaying the built-in templates
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Per-invocation overrides (CLI flags, library callers).
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub model: Option<String>,
    pub k: Option<usize>,
    pub steps: Option<usize>,
    pub block_tokens: Option<u32>,
    pub seed: Option<u64>,
    pub language: Option<Language>,
    pub prompts_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// B_i(file exists) → Result
    /// B_i(file is valid TOML) → Result
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })
    }

    /// Load from `path` when given, otherwise start from defaults; then apply
    /// the `OPENAI_MODEL` / `OPENAI_BASE_URL` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(model) = lookup("OPENAI_MODEL").filter(|v| !v.is_empty()) {
            self.backend.model = model;
        }
        if let Some(url) = lookup("OPENAI_BASE_URL").filter(|v| !v.is_empty()) {
            self.backend.base_url = url;
        }
    }

    /// Merge caller overrides; unset fields keep their configured value.
    pub fn with_overrides(mut self, overrides: &RunOverrides) -> Self {
        if let Some(model) = &overrides.model {
            self.backend.model = model.clone();
        }
        if let Some(k) = overrides.k {
            self.sampling.k = k;
        }
        if let Some(steps) = overrides.steps {
            self.sampling.steps = steps;
        }
        if let Some(block_tokens) = overrides.block_tokens {
            self.sampling.block_tokens = block_tokens;
        }
        if let Some(seed) = overrides.seed {
            self.mcmc.seed = Some(seed);
        }
        if let Some(language) = overrides.language {
            self.language.default = language;
            self.language.auto_detect = false;
        }
        if let Some(path) = &overrides.prompts_path {
            self.prompts.path = Some(path.clone());
        }
        self
    }

    /// Check every range constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn unit_interval(field: &'static str, value: f64) -> Result<(), ConfigError> {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(ConfigError::Invalid {
                    field,
                    reason: format!("{value} is outside [0, 1]"),
                })
            }
        }

        if self.sampling.k == 0 {
            return Err(ConfigError::Invalid {
                field: "sampling.k",
                reason: "at least one candidate is required".to_string(),
            });
        }
        if self.sampling.block_tokens == 0 {
            return Err(ConfigError::Invalid {
                field: "sampling.block_tokens",
                reason: "must be positive".to_string(),
            });
        }

        unit_interval("temperature.sample", self.temperature.sample)?;
        unit_interval("temperature.rewrite", self.temperature.rewrite)?;
        unit_interval("temperature.judge", self.temperature.judge)?;
        unit_interval("mcmc.acceptance_floor", self.mcmc.acceptance_floor)?;

        if !(self.mcmc.initial_temp > 0.0 && self.mcmc.initial_temp <= 1.0) {
            return Err(ConfigError::Invalid {
                field: "mcmc.initial_temp",
                reason: format!("{} is outside (0, 1]", self.mcmc.initial_temp),
            });
        }
        if !(self.mcmc.decay > 0.0 && self.mcmc.decay <= 1.0) {
            return Err(ConfigError::Invalid {
                field: "mcmc.decay",
                reason: format!("{} is outside (0, 1]", self.mcmc.decay),
            });
        }

        Ok(())
    }

    /// Resolve the backend API key from config or environment.
    ///
    /// B_i(api key available) → Option: local endpoints and proxies run
    /// without one.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = &self.backend.api_key {
            return Some(expand_env_vars(key));
        }
        std::env::var(&self.backend.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
    }

    /// The subset echoed in run metadata.
    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            model: self.backend.model.clone(),
            k: self.sampling.k,
            steps: self.sampling.steps,
            block_tokens: self.sampling.block_tokens,
            temperature: self.temperature,
            mcmc: self.mcmc,
        }
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }
}

/// Configuration echoed back in every run result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub model: String,
    pub k: usize,
    pub steps: usize,
    pub block_tokens: u32,
    pub temperature: TemperatureConfig,
    pub mcmc: McmcConfig,
}

static ENV_VAR: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").ok());

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let Some(re) = ENV_VAR.as_ref() else {
        return s.to_string();
    };
    let mut result = s.to_string();

    for cap in re.captures_iter(s) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// Configuration errors.
///
/// Epistemic origin:
/// - B_i falsified: File not found, parse error, value out of range
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to render config: {0}")]
    Serialize(#[source] toml::ser::Error),

    #[error("Invalid template file {path}: {reason}")]
    TemplateFile { path: PathBuf, reason: String },

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
