use crate::config::types::{EngineConfig, ProofError, ProofOptions, Result};
/// Service configuration loading
///
/// Layering: built-in defaults, then an optional JSON file (any subset of
/// fields), then `PROOFBOX_*` environment overrides, then validation.
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const ENV_PROVER_EXECUTABLE: &str = "PROOFBOX_PROVER_EXECUTABLE";
pub const ENV_WORKSPACE: &str = "PROOFBOX_WORKSPACE";
pub const ENV_CONCURRENCY: &str = "PROOFBOX_CONCURRENCY";

/// Full config file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub prover: EngineConfig,
    /// Options applied to requests that leave a ceiling unset
    pub defaults: ProofOptions,
}

impl ServiceConfig {
    /// Load from `path` (if any), apply environment overrides and validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProofError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let config: ServiceConfig = serde_json::from_str(&content)
            .map_err(|e| ProofError::Config(format!("Failed to parse config JSON: {}", e)))?;

        log::debug!("Loaded config file {}", path.display());
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in `load`)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(executable) = lookup(ENV_PROVER_EXECUTABLE) {
            self.prover.prover_executable = executable.into();
        }
        if let Some(workspace) = lookup(ENV_WORKSPACE) {
            self.prover.workspace = workspace.into();
        }
        if let Some(raw) = lookup(ENV_CONCURRENCY) {
            self.prover.max_concurrency = raw.trim().parse().map_err(|_| {
                ProofError::Config(format!("{} must be a non-negative integer, got {:?}", ENV_CONCURRENCY, raw))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.prover.prover_executable.as_os_str().is_empty() {
            return Err(ProofError::Config("prover executable cannot be empty".to_string()));
        }
        if self.prover.workspace.as_os_str().is_empty() {
            return Err(ProofError::Config("workspace cannot be empty".to_string()));
        }
        if self.prover.max_concurrency == 0 {
            log::warn!("max_concurrency is 0; running with a single execution slot");
        }
        Ok(())
    }

    /// Merge per-request options over the configured defaults
    pub fn resolve_options(&self, request: &ProofOptions) -> ProofOptions {
        let defaults = &self.defaults;
        ProofOptions {
            timeout: request.timeout.or(defaults.timeout),
            cpu_time_limit: request.cpu_time_limit.or(defaults.cpu_time_limit),
            memory_limit: request.memory_limit.or(defaults.memory_limit),
            stack_limit: request.stack_limit.or(defaults.stack_limit),
            file_size_limit: request.file_size_limit.or(defaults.file_size_limit),
            open_files_limit: request.open_files_limit.or(defaults.open_files_limit),
            all_tactics: request.all_tactics,
            ast: request.ast,
            tactics: request.tactics,
            premises: request.premises,
        }
        .with_defaults()
    }
}
