//! Configuration for Mender, read from `.mender/mender.toml`.
//!
//! Layered: file → environment (`MENDER_*`, optionally from `.env`) → CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [pipeline]
//! max_iterations = 3
//! max_iterations_ceiling = 10
//! stage_timeout_secs = 60
//! stage_retries = 1
//! retry_backoff_ms = 500
//! max_code_length = 50000
//! # "keep" holds every finished run's snapshot and final event in memory
//! # until the process exits; long-lived servers should prefer
//! # "remove_on_terminal".
//! checkpoint_retention = "keep"
//!
//! [collaborator]
//! endpoint = "https://api.groq.com/openai/v1"
//! model = "llama-3.3-70b-versatile"
//! api_key_env = "GROQ_API_KEY"
//! max_tokens = 4096
//!
//! [collaborator.temperatures]
//! scanner = 0.3
//! fixer = 0.5
//! validator = 0.3
//!
//! [server]
//! host = "127.0.0.1"
//! port = 8000
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::pipeline::checkpoint::{CheckpointStore, RetentionPolicy};
use crate::pipeline::events::EventEmitter;
use crate::pipeline::orchestrator::{ExecutionPolicy, Orchestrator};
use crate::stages::{HttpCollaborator, StageSet};
use crate::pipeline::request::{DEFAULT_MAX_CODE_LENGTH, RequestLimits};

pub const CONFIG_DIR: &str = ".mender";
pub const CONFIG_FILE: &str = "mender.toml";

/// Pipeline bounds and retry behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Fixer→Validator cycles before a run ends as best-effort
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Largest per-request override of `max_iterations`
    #[serde(default = "default_max_iterations_ceiling")]
    pub max_iterations_ceiling: u32,
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
    /// Extra attempts after a retryable stage failure
    #[serde(default = "default_stage_retries")]
    pub stage_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_max_code_length")]
    pub max_code_length: usize,
    /// `Keep` holds each finished run's snapshot and terminal event (both
    /// carrying the original and final code) until the process exits.
    #[serde(default)]
    pub checkpoint_retention: RetentionPolicy,
}

fn default_max_iterations() -> u32 {
    3
}

fn default_max_iterations_ceiling() -> u32 {
    10
}

fn default_stage_timeout_secs() -> u64 {
    60
}

fn default_stage_retries() -> u32 {
    1
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_max_code_length() -> usize {
    DEFAULT_MAX_CODE_LENGTH
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_iterations_ceiling: default_max_iterations_ceiling(),
            stage_timeout_secs: default_stage_timeout_secs(),
            stage_retries: default_stage_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_code_length: default_max_code_length(),
            checkpoint_retention: RetentionPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Temperatures {
    #[serde(default = "default_scanner_temperature")]
    pub scanner: f32,
    #[serde(default = "default_fixer_temperature")]
    pub fixer: f32,
    #[serde(default = "default_validator_temperature")]
    pub validator: f32,
}

fn default_scanner_temperature() -> f32 {
    0.3
}

fn default_fixer_temperature() -> f32 {
    0.5
}

fn default_validator_temperature() -> f32 {
    0.3
}

impl Default for Temperatures {
    fn default() -> Self {
        Self {
            scanner: default_scanner_temperature(),
            fixer: default_fixer_temperature(),
            validator: default_validator_temperature(),
        }
    }
}

/// The OpenAI-compatible service every stage talks to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaboratorConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperatures: Temperatures,
}

fn default_endpoint() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

fn default_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}

fn default_api_key_env() -> String {
    "GROQ_API_KEY".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
            temperatures: Temperatures::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Contents of `mender.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MenderToml {
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub collaborator: CollaboratorConfig,
    #[serde(default)]
    pub server: ServerSection,
}

impl MenderToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse mender.toml")
    }

    /// Returns the default configuration if the file doesn't exist.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize mender.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `MENDER_*` overrides. `var` looks up an environment variable.
    pub fn apply_env<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = var("MENDER_MAX_ITERATIONS") {
            self.pipeline.max_iterations = v
                .parse()
                .with_context(|| format!("Invalid MENDER_MAX_ITERATIONS '{}'", v))?;
        }
        if let Some(v) = var("MENDER_STAGE_TIMEOUT_SECS") {
            self.pipeline.stage_timeout_secs = v
                .parse()
                .with_context(|| format!("Invalid MENDER_STAGE_TIMEOUT_SECS '{}'", v))?;
        }
        if let Some(v) = var("MENDER_STAGE_RETRIES") {
            self.pipeline.stage_retries = v
                .parse()
                .with_context(|| format!("Invalid MENDER_STAGE_RETRIES '{}'", v))?;
        }
        if let Some(v) = var("MENDER_CHECKPOINT_RETENTION") {
            self.pipeline.checkpoint_retention = v.parse()?;
        }
        if let Some(v) = var("MENDER_ENDPOINT") {
            self.collaborator.endpoint = v;
        }
        if let Some(v) = var("MENDER_MODEL") {
            self.collaborator.model = v;
        }
        if let Some(v) = var("MENDER_HOST") {
            self.server.host = v;
        }
        if let Some(v) = var("MENDER_PORT") {
            self.server.port = v
                .parse()
                .with_context(|| format!("Invalid MENDER_PORT '{}'", v))?;
        }
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let p = &self.pipeline;

        if p.max_iterations > p.max_iterations_ceiling {
            warnings.push(format!(
                "max_iterations {} exceeds max_iterations_ceiling {}",
                p.max_iterations, p.max_iterations_ceiling
            ));
        }
        if p.max_iterations == 0 {
            warnings.push(
                "max_iterations = 0: runs stop after the first validation".to_string(),
            );
        }
        if p.stage_timeout_secs == 0 {
            warnings.push("stage_timeout_secs = 0: every stage will time out".to_string());
        }
        if p.max_code_length == 0 {
            warnings.push("max_code_length = 0: every request will be rejected".to_string());
        }

        let t = &self.collaborator.temperatures;
        for (stage, value) in [("scanner", t.scanner), ("fixer", t.fixer), ("validator", t.validator)] {
            if !(0.0..=2.0).contains(&value) {
                warnings.push(format!(
                    "Temperature {} for {} is outside 0.0-2.0",
                    value, stage
                ));
            }
        }
        if !self.collaborator.endpoint.starts_with("http://")
            && !self.collaborator.endpoint.starts_with("https://")
        {
            warnings.push(format!(
                "Collaborator endpoint '{}' is not an http(s) URL",
                self.collaborator.endpoint
            ));
        }

        warnings
    }
}

/// Effective configuration: `mender.toml` plus environment overrides.
#[derive(Debug, Clone)]
pub struct MenderConfig {
    pub project_dir: PathBuf,
    pub config_dir: PathBuf,
    pub toml: MenderToml,
}

impl MenderConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let config_dir = project_dir.join(CONFIG_DIR);
        let mut toml = MenderToml::load_or_default(&config_dir)?;
        toml.apply_env(|key| std::env::var(key).ok())?;
        Ok(Self {
            project_dir,
            config_dir,
            toml,
        })
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    pub fn execution_policy(&self) -> ExecutionPolicy {
        let p = &self.toml.pipeline;
        ExecutionPolicy {
            stage_timeout: Duration::from_secs(p.stage_timeout_secs),
            stage_retries: p.stage_retries,
            retry_backoff: Duration::from_millis(p.retry_backoff_ms),
        }
    }

    pub fn request_limits(&self) -> RequestLimits {
        let p = &self.toml.pipeline;
        RequestLimits {
            max_code_length: p.max_code_length,
            default_max_iterations: p.max_iterations,
            max_iterations_ceiling: p.max_iterations_ceiling,
        }
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.toml.pipeline.checkpoint_retention
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }

    /// Wire the HTTP collaborator, stores and policies into an orchestrator.
    ///
    /// Fails when the collaborator's API key is not set.
    pub fn build_orchestrator(&self) -> Result<Orchestrator> {
        let collaborator_config = &self.toml.collaborator;
        let collaborator =
            HttpCollaborator::from_config(collaborator_config, self.execution_policy().stage_timeout)
                .context("Failed to configure the language-model collaborator")?;
        let stages = StageSet::from_collaborator(Arc::new(collaborator), &collaborator_config.temperatures);
        Ok(Orchestrator::new(
            stages,
            Arc::new(CheckpointStore::new(self.retention())),
            Arc::new(EventEmitter::default()),
            self.execution_policy(),
            self.request_limits(),
        ))
    }
}
