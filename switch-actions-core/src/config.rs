//! Engine-level tunables.
//!
//! The deferred FIFO capacity and recursion depth are fixed constants
//! (10 and 4 respectively) in the reference behavior this crate
//! matches, but a real deployment still wants those sized from a config
//! file rather than hardcoded — so they live here with a `serde` +
//! `toml` + validating-loader shape.

use crate::error::{EngineError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Engine configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Capacity of the per-CPU deferred action FIFO.
    /// Default: 10.
    #[serde(default = "default_fifo_capacity")]
    pub deferred_fifo_capacity: usize,
    /// Maximum synchronous recursion depth before `EngineError::Loop` is
    /// returned. Default: 4.
    #[serde(default = "default_max_recursion_depth")]
    pub max_recursion_depth: u32,
    /// Number of simulated per-CPU execution contexts the demo harness
    /// allocates. Real deployments size this to the host's CPU count;
    /// here it only bounds the per-CPU state arrays.
    #[serde(default = "default_cpu_count")]
    pub cpu_count: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            deferred_fifo_capacity: default_fifo_capacity(),
            max_recursion_depth: default_max_recursion_depth(),
            cpu_count: default_cpu_count(),
        }
    }
}

fn default_fifo_capacity() -> usize {
    10
}

fn default_max_recursion_depth() -> u32 {
    4
}

fn default_cpu_count() -> usize {
    1
}

pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<EngineConfig> {
    let text = fs::read_to_string(path)
        .map_err(|e| EngineError::Config(format!("failed to read config file: {e}")))?;
    let cfg: EngineConfig = toml::from_str(&text)
        .map_err(|e| EngineError::Config(format!("failed to parse config: {e}")))?;
    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &EngineConfig) -> Result<()> {
    if cfg.deferred_fifo_capacity == 0 {
        return Err(EngineError::Config("deferred_fifo_capacity must be > 0".into()));
    }
    if cfg.max_recursion_depth == 0 {
        return Err(EngineError::Config("max_recursion_depth must be > 0".into()));
    }
    if cfg.cpu_count == 0 {
        return Err(EngineError::Config("cpu_count must be > 0".into()));
    }
    Ok(())
}
