//! Configuration for scenarist.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (SCENARIST_HOME, SCENARIST_ORG,
//!    SCENARIST_EXECUTOR_TOKEN)
//! 2. Config file (.scenarist/config.yaml)
//! 3. Defaults (~/.scenarist)
//!
//! Config file discovery:
//! - Searches current directory and parents for .scenarist/config.yaml
//! - `paths.home` is relative to the .scenarist/ directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::limits::ExecutionLimits;
use crate::core::orchestrator::RunPolicy;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const DEFAULT_ORG: &str = "default";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default)]
    pub limits: Option<ExecutionLimits>,
    #[serde(default)]
    pub runs: Option<RunsConfig>,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .scenarist/)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunsConfig {
    /// Allow more than one in-flight run per scenario
    #[serde(default)]
    pub allow_concurrent_runs: bool,
}

/// Which action executor to use
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutorConfig {
    Simulated,
    Http { endpoint: String },
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::Simulated
    }
}

/// Which narrative / risk-map synthesizer to use
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SynthesisConfig {
    Template,
    Http {
        endpoint: String,
        #[serde(default = "default_synthesis_timeout")]
        timeout_seconds: u64,
    },
}

fn default_synthesis_timeout() -> u64 {
    60
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self::Template
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    /// Absolute path to scenarist home (audit log, state)
    pub home: PathBuf,
    /// Organization used when none is given
    pub org_id: String,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub limits: ExecutionLimits,
    pub allow_concurrent_runs: bool,
    pub executor: ExecutorConfig,
    pub synthesis: SynthesisConfig,
    /// Bearer token for the HTTP executor (never printed)
    #[serde(skip)]
    pub executor_token: Option<String>,
}

impl ResolvedConfig {
    pub fn run_policy(&self) -> RunPolicy {
        RunPolicy {
            allow_concurrent_runs: self.allow_concurrent_runs,
            limits: self.limits.clone(),
        }
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.home.join("audit.jsonl")
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".scenarist").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge a config file (if any) with environment overrides
fn resolve(
    config_file: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
    default_home: PathBuf,
) -> Result<ResolvedConfig> {
    let file = match config_file {
        Some(ref path) => Some(load_config_file(path)?),
        None => None,
    };

    let home = if let Some(env_home) = env("SCENARIST_HOME") {
        PathBuf::from(env_home)
    } else if let (Some(path), Some(home_path)) = (
        config_file.as_ref(),
        file.as_ref().and_then(|f| f.paths.home.as_ref()),
    ) {
        let scenarist_dir = path.parent().unwrap_or(Path::new("."));
        resolve_path(scenarist_dir, home_path)
    } else {
        default_home
    };

    let org_id = env("SCENARIST_ORG")
        .or_else(|| file.as_ref().and_then(|f| f.org_id.clone()))
        .unwrap_or_else(|| DEFAULT_ORG.to_string());

    Ok(ResolvedConfig {
        home,
        org_id,
        limits: file
            .as_ref()
            .and_then(|f| f.limits.clone())
            .unwrap_or_default(),
        allow_concurrent_runs: file
            .as_ref()
            .and_then(|f| f.runs.as_ref())
            .map(|r| r.allow_concurrent_runs)
            .unwrap_or(false),
        executor: file.as_ref().map(|f| f.executor.clone()).unwrap_or_default(),
        synthesis: file.as_ref().map(|f| f.synthesis.clone()).unwrap_or_default(),
        executor_token: env("SCENARIST_EXECUTOR_TOKEN"),
        config_file,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".scenarist");

    resolve(find_config_file(), |key| std::env::var(key).ok(), default_home)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Get the scenarist home directory
pub fn scenarist_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Get the audit log path ($SCENARIST_HOME/audit.jsonl)
pub fn audit_log_path() -> Result<PathBuf> {
    Ok(config()?.audit_log_path())
}
