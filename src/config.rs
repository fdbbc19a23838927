//! Whole-crate configuration, loadable from a JSON file.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::identity::ResolverConfig;
use crate::integrity::IntegrityConfig;
use crate::tracker::TrackerConfig;

/// Per-frame time budgets of the stream pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub association_timeout_ms: Option<u64>,
    pub resolution_timeout_ms: Option<u64>,
}

impl PipelineConfig {
    pub fn association_timeout(&self) -> Option<Duration> {
        self.association_timeout_ms.map(Duration::from_millis)
    }

    pub fn resolution_timeout(&self) -> Option<Duration> {
        self.resolution_timeout_ms.map(Duration::from_millis)
    }
}

/// Every policy value, with documented defaults. Missing sections and
/// fields fall back to their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tracker: TrackerConfig,
    pub resolver: ResolverConfig,
    pub integrity: IntegrityConfig,
    pub pipeline: PipelineConfig,
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        self.tracker.validate()?;
        self.resolver.validate()?;
        self.integrity.validate()?;
        if self.pipeline.association_timeout_ms == Some(0)
            || self.pipeline.resolution_timeout_ms == Some(0)
        {
            return Err(Error::Config("pipeline timeouts must be positive".to_string()));
        }
        Ok(())
    }
}
