//! Daemon configuration.
//!
//! Configuration is JSON, read from the `--config` file or the
//! `CODE_SANDBOX_CONFIG` environment variable. Every field has a default, so
//! an absent configuration yields a working nsjail + python3 setup.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::restrict::DenyAction;

/// Environment variable holding an inline JSON configuration.
pub const CONFIG_ENV: &str = "CODE_SANDBOX_CONFIG";

/// Top-level configuration for the daemon.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// How guest processes are isolated from the host.
    #[serde(default)]
    pub isolation: IsolationConfig,

    /// The host interpreter that runs guest source.
    #[serde(default)]
    pub interpreter: InterpreterConfig,

    /// Per-execution ceilings and request bounds.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Low-privilege identity lookup.
    #[serde(default)]
    pub identity: IdentityConfig,
}

/// Isolation settings.
#[derive(Debug, Clone, Deserialize)]
pub struct IsolationConfig {
    /// Which isolation shape launches the guest runner.
    #[serde(default)]
    pub mode: IsolationMode,

    /// nsjail executable (looked up on `PATH` when not absolute).
    #[serde(default = "default_nsjail_path")]
    pub nsjail_path: PathBuf,

    /// Root directory handed to nsjail's `--chroot`.
    #[serde(default = "default_chroot")]
    pub chroot: PathBuf,

    /// Binary implementing the `guest` subcommand. Defaults to this executable.
    #[serde(default)]
    pub runner: Option<PathBuf>,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            mode: IsolationMode::default(),
            nsjail_path: default_nsjail_path(),
            chroot: default_chroot(),
            runner: None,
        }
    }
}

/// Available isolation shapes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationMode {
    /// Launch the guest runner through nsjail (namespaces, chroot, no network).
    #[default]
    Nsjail,
    /// Launch the guest runner directly; only the in-process layer applies.
    Direct,
}

impl IsolationMode {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "nsjail" => Some(Self::Nsjail),
            "direct" => Some(Self::Direct),
            _ => None,
        }
    }
}

/// Interpreter used to run guest source.
#[derive(Debug, Clone, Deserialize)]
pub struct InterpreterConfig {
    /// Absolute path of the interpreter.
    #[serde(default = "default_interpreter_path")]
    pub path: PathBuf,

    /// Arguments placed before the source file.
    #[serde(default = "default_interpreter_args")]
    pub args: Vec<String>,

    /// Extension given to materialized source files.
    #[serde(default = "default_extension")]
    pub extension: String,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            path: default_interpreter_path(),
            args: default_interpreter_args(),
            extension: default_extension(),
        }
    }
}

/// Resource ceilings and request bounds.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Address-space ceiling in megabytes.
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,

    /// File-size ceiling and per-stream capture cap in megabytes.
    #[serde(default = "default_output_mb")]
    pub output_mb: u64,

    /// Timeout applied when a request does not carry one.
    #[serde(default = "default_timeout")]
    pub default_timeout_seconds: u64,

    /// Largest timeout a request may ask for.
    #[serde(default = "default_max_timeout")]
    pub max_timeout_seconds: u64,

    /// Extra wall-clock time granted on top of the CPU ceiling before the
    /// supervisor kills the process group.
    #[serde(default = "default_deadline_grace_ms")]
    pub deadline_grace_ms: u64,

    /// Largest accepted source text.
    #[serde(default = "default_max_code_bytes")]
    pub max_code_bytes: usize,

    /// What the syscall filter does with calls outside the allowlist.
    #[serde(default)]
    pub deny_action: DenyAction,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            memory_mb: default_memory_mb(),
            output_mb: default_output_mb(),
            default_timeout_seconds: default_timeout(),
            max_timeout_seconds: default_max_timeout(),
            deadline_grace_ms: default_deadline_grace_ms(),
            max_code_bytes: default_max_code_bytes(),
            deny_action: DenyAction::default(),
        }
    }
}

impl LimitsConfig {
    /// Address-space ceiling in bytes.
    pub const fn memory_bytes(&self) -> u64 {
        self.memory_mb.saturating_mul(1024 * 1024)
    }

    /// Output ceiling in bytes.
    pub const fn output_bytes(&self) -> u64 {
        self.output_mb.saturating_mul(1024 * 1024)
    }
}

/// Identity lookup settings.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    /// Explicit user name; replaces the candidate list when set.
    #[serde(default)]
    pub user: Option<String>,

    /// Explicit group name; replaces the candidate list when set.
    #[serde(default)]
    pub group: Option<String>,

    /// User names tried in order.
    #[serde(default = "default_candidate_users")]
    pub candidate_users: Vec<String>,

    /// Group names tried in order.
    #[serde(default = "default_candidate_groups")]
    pub candidate_groups: Vec<String>,

    /// Numeric uid/gid used when no named account is found.
    #[serde(default = "default_fallback_id")]
    pub fallback_id: u32,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            user: None,
            group: None,
            candidate_users: default_candidate_users(),
            candidate_groups: default_candidate_groups(),
            fallback_id: default_fallback_id(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, else `CODE_SANDBOX_CONFIG`, else
    /// defaults; then apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            Self::from_json(&json)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else if let Ok(json) = std::env::var(CONFIG_ENV) {
            Self::from_json(&json).with_context(|| format!("Failed to parse {CONFIG_ENV}"))?
        } else {
            debug!("No configuration supplied, using defaults");
            Self::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse JSON")?;
        Ok(config)
    }

    /// Apply `SANDBOX_ISOLATION`, `SANDBOX_INTERPRETER` and
    /// `SANDBOX_MAX_TIMEOUT` on top of the loaded values.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(mode) = std::env::var("SANDBOX_ISOLATION") {
            self.isolation.mode = IsolationMode::parse(&mode)
                .with_context(|| format!("Invalid SANDBOX_ISOLATION value: {mode}"))?;
        }
        if let Ok(path) = std::env::var("SANDBOX_INTERPRETER") {
            self.interpreter.path = PathBuf::from(path);
        }
        if let Ok(max) = std::env::var("SANDBOX_MAX_TIMEOUT") {
            self.limits.max_timeout_seconds = max
                .parse()
                .with_context(|| format!("Invalid SANDBOX_MAX_TIMEOUT value: {max}"))?;
        }
        Ok(())
    }

    /// Reject configurations that would weaken or break confinement.
    pub fn validate(&self) -> Result<()> {
        let limits = &self.limits;
        anyhow::ensure!(limits.memory_mb > 0, "limits.memory_mb must be positive");
        anyhow::ensure!(limits.output_mb > 0, "limits.output_mb must be positive");
        anyhow::ensure!(
            limits.default_timeout_seconds > 0,
            "limits.default_timeout_seconds must be positive"
        );
        anyhow::ensure!(
            limits.default_timeout_seconds <= limits.max_timeout_seconds,
            "limits.default_timeout_seconds ({}) exceeds limits.max_timeout_seconds ({})",
            limits.default_timeout_seconds,
            limits.max_timeout_seconds
        );
        anyhow::ensure!(
            limits.deadline_grace_ms > 0,
            "limits.deadline_grace_ms must be positive so the wall deadline outlasts the CPU ceiling"
        );
        anyhow::ensure!(limits.max_code_bytes > 0, "limits.max_code_bytes must be positive");
        anyhow::ensure!(
            self.interpreter.path.is_absolute(),
            "interpreter.path must be absolute: {}",
            self.interpreter.path.display()
        );
        Ok(())
    }
}

fn default_nsjail_path() -> PathBuf {
    "nsjail".into()
}

fn default_chroot() -> PathBuf {
    "/".into()
}

fn default_interpreter_path() -> PathBuf {
    "/usr/bin/python3".into()
}

fn default_interpreter_args() -> Vec<String> {
    vec!["-I".into(), "-B".into()]
}

fn default_extension() -> String {
    "py".into()
}

const fn default_memory_mb() -> u64 {
    100
}

const fn default_output_mb() -> u64 {
    5
}

const fn default_timeout() -> u64 {
    5
}

const fn default_max_timeout() -> u64 {
    30
}

const fn default_deadline_grace_ms() -> u64 {
    1000
}

const fn default_max_code_bytes() -> usize {
    1024 * 1024
}

fn default_candidate_users() -> Vec<String> {
    ["nobody", "www-data", "daemon", "nginx", "apache"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_candidate_groups() -> Vec<String> {
    ["nobody", "nogroup", "www-data", "daemon", "nginx", "apache"]
        .into_iter()
        .map(String::from)
        .collect()
}

const fn default_fallback_id() -> u32 {
    65534
}
