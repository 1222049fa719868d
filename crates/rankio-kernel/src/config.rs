//! Job-wide forwarding configuration.
//!
//! Configuration is loaded from `~/.config/rankio/iof.toml`. Every field is
//! optional; a missing file yields the defaults.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

/// Forwarding knobs shared by every worker of a job.
///
/// These are passed explicitly to each component rather than read from
/// process-wide state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardConfig {
    /// Try to give each worker a pseudo-terminal for stdout.
    #[serde(default = "default_use_pty")]
    pub use_pty: bool,

    /// Connect worker stdin to the fabric (otherwise stdin reads EOF).
    #[serde(default)]
    pub connect_stdin: bool,

    /// Point the worker's stderr slot at its stdout descriptor, so both
    /// streams travel as one.
    #[serde(default)]
    pub redirect_stderr_to_stdout: bool,

    /// Output directory directive, `<path>[:nojobid,nocopy]`.
    #[serde(default)]
    pub output_to_file: Option<String>,

    /// Write stderr into the stdout file when capturing to files.
    #[serde(default)]
    pub merge_stderr_to_stdout: bool,

    /// Permission bits for per-rank output files.
    #[serde(default = "default_file_mode")]
    pub output_file_mode: u32,

    /// Permission bits for per-rank output directories.
    #[serde(default = "default_dir_mode")]
    pub output_dir_mode: u32,
}

fn default_use_pty() -> bool {
    true
}

fn default_file_mode() -> u32 {
    0o600
}

fn default_dir_mode() -> u32 {
    0o750
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            use_pty: default_use_pty(),
            connect_stdin: false,
            redirect_stderr_to_stdout: false,
            output_to_file: None,
            merge_stderr_to_stdout: false,
            output_file_mode: default_file_mode(),
            output_dir_mode: default_dir_mode(),
        }
    }
}

impl ForwardConfig {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Get the default config file path.
    pub fn config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "rankio")
            .context("Could not determine config directory")?;
        Ok(dirs.config_dir().join("iof.toml"))
    }

    /// Set the pty request.
    pub fn with_pty(mut self, use_pty: bool) -> Self {
        self.use_pty = use_pty;
        self
    }

    /// Set the output directory directive.
    pub fn with_output_to_file(mut self, spec: impl Into<String>) -> Self {
        self.output_to_file = Some(spec.into());
        self
    }
}
