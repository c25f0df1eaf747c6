//! Unified configuration schema for caissa.
//!
//! Drivers load this from YAML; the search core itself takes plain runtime
//! param structs, so everything here is converted at the boundary. Every
//! field has a default so partial files load.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Search tuning constants.
    #[serde(default)]
    pub search: SearchSection,
    /// Node/edge arena sizing.
    #[serde(default)]
    pub store: StoreSection,
    /// NDJSON event logging.
    #[serde(default)]
    pub logging: LoggingSection,
}

/// PUCT / FPU / best-move tuning, mirrored into `cz_mcts::SearchParams`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchSection {
    /// Additive CPUCT constant.
    #[serde(default = "default_cpuct_base")]
    pub cpuct_base: f32,
    /// CPUCT log growth factor.
    #[serde(default = "default_cpuct_factor")]
    pub cpuct_factor: f32,
    /// CPUCT log denominator.
    #[serde(default = "default_cpuct_init")]
    pub cpuct_init: f32,
    /// Root overrides; equal to the interior constants when omitted.
    #[serde(default = "default_cpuct_base")]
    pub cpuct_base_root: f32,
    #[serde(default = "default_cpuct_factor")]
    pub cpuct_factor_root: f32,
    #[serde(default = "default_cpuct_init")]
    pub cpuct_init_root: f32,
    /// First-play urgency offset below the parent Q.
    #[serde(default)]
    pub fpu_offset: f32,
    /// FPU reduction weight on sqrt(visited policy mass).
    #[serde(default = "default_fpu_reduction")]
    pub fpu_reduction: f32,
    /// Visit reservations per selector per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Moves-left bonus weight in the best-move chooser (0 disables).
    #[serde(default)]
    pub mlh_bonus_factor: f32,
    /// Root Dirichlet noise fraction (self-play only; 0 disables).
    #[serde(default)]
    pub root_noise_epsilon: f32,
    /// Root Dirichlet alpha.
    #[serde(default = "default_noise_alpha")]
    pub root_noise_alpha: f32,
}

fn default_cpuct_base() -> f32 {
    2.15
}

fn default_cpuct_factor() -> f32 {
    2.82
}

fn default_cpuct_init() -> f32 {
    18368.0
}

fn default_fpu_reduction() -> f32 {
    0.44
}

fn default_batch_size() -> u32 {
    32
}

fn default_noise_alpha() -> f32 {
    0.3
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            cpuct_base: default_cpuct_base(),
            cpuct_factor: default_cpuct_factor(),
            cpuct_init: default_cpuct_init(),
            cpuct_base_root: default_cpuct_base(),
            cpuct_factor_root: default_cpuct_factor(),
            cpuct_init_root: default_cpuct_init(),
            fpu_offset: 0.0,
            fpu_reduction: default_fpu_reduction(),
            batch_size: default_batch_size(),
            mlh_bonus_factor: 0.0,
            root_noise_epsilon: 0.0,
            root_noise_alpha: default_noise_alpha(),
        }
    }
}

/// Node store sizing.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreSection {
    /// Node records to preallocate when no limit-derived estimate applies.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Whether the arenas may grow past the preallocated capacity.
    #[serde(default)]
    pub expandable: bool,
}

fn default_capacity() -> usize {
    1 << 20
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            expandable: false,
        }
    }
}

/// NDJSON event logging.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingSection {
    /// Event file path; empty disables logging.
    #[serde(default)]
    pub events_path: String,
    /// Buffered event bytes before the log auto-flushes; 0 flushes every
    /// event immediately.
    #[serde(default = "default_flush_bytes")]
    pub flush_bytes: usize,
}

fn default_flush_bytes() -> usize {
    8 * 1024
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            events_path: String::new(),
            flush_bytes: default_flush_bytes(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&contents)?)
    }
}
