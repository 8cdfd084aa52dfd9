//! palimpsest repository configuration (`palimpsest.toml`).
//!
//! Defines the typed configuration for diff granularity and heuristics,
//! branch defaults, merge/publication gating, and session timing.
//! Every field has a default; a missing file yields [`EngineConfig::default`].

use std::fmt;
use std::path::Path;

use serde::Deserialize;

use crate::model::section::Granularity;
use crate::model::types::BranchName;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level palimpsest configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Diff engine settings.
    #[serde(default)]
    pub diff: DiffConfig,

    /// Branch manager settings.
    #[serde(default)]
    pub branches: BranchConfig,

    /// Merge engine settings.
    #[serde(default)]
    pub merge: MergeConfig,

    /// Publication settings.
    #[serde(default)]
    pub publish: PublishConfig,

    /// Collaborative session settings.
    #[serde(default)]
    pub session: SessionConfig,
}

// ---------------------------------------------------------------------------
// DiffConfig
// ---------------------------------------------------------------------------

/// Diff engine settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiffConfig {
    /// How content is split into sections (default: `line`).
    #[serde(default)]
    pub granularity: Granularity,

    /// Token similarity (percent) at or above which a changed section pair
    /// is reported as a modification rather than deletion + addition.
    #[serde(default = "default_similarity_threshold_pct")]
    pub similarity_threshold_pct: u8,

    /// Modified-section count above which a diff is classified `major`.
    #[serde(default = "default_major_impact_threshold")]
    pub major_impact_threshold: usize,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            granularity: Granularity::default(),
            similarity_threshold_pct: default_similarity_threshold_pct(),
            major_impact_threshold: default_major_impact_threshold(),
        }
    }
}

const fn default_similarity_threshold_pct() -> u8 {
    50
}

const fn default_major_impact_threshold() -> usize {
    10
}

// ---------------------------------------------------------------------------
// BranchConfig
// ---------------------------------------------------------------------------

/// Branch manager settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BranchConfig {
    /// Name of the branch created by `init_document` and used by sessions
    /// joined by content path (default: `"main"`).
    #[serde(default = "BranchName::main")]
    pub default_branch: BranchName,

    /// Attempts made by `commit_with_retry` before a `StaleHead` surfaces.
    #[serde(default = "default_max_commit_retries")]
    pub max_commit_retries: u32,
}

impl Default for BranchConfig {
    fn default() -> Self {
        Self {
            default_branch: BranchName::main(),
            max_commit_retries: default_max_commit_retries(),
        }
    }
}

const fn default_max_commit_retries() -> u32 {
    3
}

// ---------------------------------------------------------------------------
// MergeConfig / PublishConfig
// ---------------------------------------------------------------------------

/// Merge engine settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergeConfig {
    /// Merge requests must be `approved` before they can be completed.
    #[serde(default)]
    pub require_approved_request: bool,
}

/// Publication settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublishConfig {
    /// Publishing requires the version to be `approved`.
    #[serde(default)]
    pub require_review: bool,
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Collaborative session timing.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Pending changes older than this are checkpointed by `tick`.
    #[serde(default = "default_checkpoint_interval_ms")]
    pub checkpoint_interval_ms: u64,

    /// Sessions with no activity for this long are checkpointed and closed.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Failed closing checkpoints tolerated before the working copy is
    /// moved onto a fresh branch so the session can close.
    #[serde(default = "default_max_close_attempts")]
    pub max_close_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval_ms: default_checkpoint_interval_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            max_close_attempts: default_max_close_attempts(),
        }
    }
}

const fn default_checkpoint_interval_ms() -> u64 {
    5_000
}

const fn default_idle_timeout_ms() -> u64 {
    300_000
}

const fn default_max_close_attempts() -> u32 {
    3
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Error loading a palimpsest configuration file.
#[derive(Debug)]
pub struct ConfigError {
    /// The path that was being loaded (if available).
    pub path: Option<std::path::PathBuf>,
    /// Human-readable message with line-level detail when possible.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.path {
            write!(f, "{}: {}", p.display(), self.message)
        } else {
            write!(f, "config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl EngineConfig {
    /// File name looked up inside a repository directory.
    pub const FILE_NAME: &'static str = "palimpsest.toml";

    /// Load configuration from a TOML file.
    ///
    /// A missing file yields all defaults.
    ///
    /// # Errors
    /// Returns `ConfigError` on I/O errors (other than not-found) or parse errors.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError {
                    path: Some(path.to_owned()),
                    message: format!("could not read file: {e}"),
                });
            }
        };
        Self::parse(&contents).map_err(|mut e| {
            e.path = Some(path.to_owned());
            e
        })
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `ConfigError` on invalid TOML, unknown fields, or a similarity
    /// threshold above 100.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = toml_str[..span.start]
                    .chars()
                    .filter(|&c| c == '\n')
                    .count()
                    + 1;
                message = format!("line {line}: {message}");
            }
            ConfigError {
                path: None,
                message,
            }
        })?;
        if cfg.diff.similarity_threshold_pct > 100 {
            return Err(ConfigError {
                path: None,
                message: format!(
                    "diff.similarity_threshold_pct must be 0-100, got {}",
                    cfg.diff.similarity_threshold_pct
                ),
            });
        }
        Ok(cfg)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
