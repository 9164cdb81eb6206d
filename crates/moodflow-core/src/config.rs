//! Engine configuration.

use crate::governor::GovernorConfig;
use crate::technique::TechniqueSelectorConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration rejected by [`EngineConfig::validate`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// TTL range is empty or inverted
    #[error("invalid ttl range: {min}..{max} ms")]
    InvalidTtlRange {
        /// Lower bound
        min: u64,
        /// Upper bound
        max: u64,
    },
    /// Weight budget outside the sane band
    #[error("sigma limit {0} outside 0.05..=1.0")]
    SigmaOutOfRange(f32),
    /// Diversity pressure outside `0..=1`
    #[error("diversity {0} outside 0.0..=1.0")]
    DiversityOutOfRange(f32),
    /// Steps per bar must be a positive power-of-two-ish grid
    #[error("step count {0} must be between 4 and 64")]
    InvalidStepCount(u32),
    /// A technique whitelist was emptied out
    #[error("technique whitelist '{0}' is empty")]
    EmptyWhitelist(&'static str),
}

/// Tunable knobs for the whole engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pipeline lifetime bounds in milliseconds, `(short floor, long ceiling)`
    pub ttl_range_ms: (u64, u64),
    /// Total node-weight budget per pipeline
    pub sigma_limit: f32,
    /// Target node count per pipeline
    pub node_limit: usize,
    /// Cooldown window for re-picking the same effect or preset
    pub cool_ms: f64,
    /// Diversity pressure, `0..=1`
    pub diversity: f32,
    /// Salt mixed into the per-track seed
    pub seed_salt: u64,
    /// Whether transition-matrix bonuses shape selection
    pub markov: bool,
    /// Steps per bar on the beat grid
    pub steps: u32,
    /// Performance governor knobs
    pub governor: GovernorConfig,
    /// Track-transition selector knobs
    pub selector: TechniqueSelectorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ttl_range_ms: (15_000, 90_000),
            sigma_limit: 0.35,
            node_limit: 3,
            cool_ms: 45_000.0,
            diversity: 0.6,
            seed_salt: 114_514,
            markov: true,
            steps: 16,
            governor: GovernorConfig::default(),
            selector: TechniqueSelectorConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (min, max) = self.ttl_range_ms;
        if min == 0 || min >= max {
            return Err(ConfigError::InvalidTtlRange { min, max });
        }
        if !(0.05..=1.0).contains(&self.sigma_limit) {
            return Err(ConfigError::SigmaOutOfRange(self.sigma_limit));
        }
        if !(0.0..=1.0).contains(&self.diversity) {
            return Err(ConfigError::DiversityOutOfRange(self.diversity));
        }
        if !(4..=64).contains(&self.steps) {
            return Err(ConfigError::InvalidStepCount(self.steps));
        }
        self.selector.validate()?;
        Ok(())
    }
}
