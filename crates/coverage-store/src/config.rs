//! Engine configuration.
//!
//! Passed by reference into every entry point that needs it; there is no
//! process-wide setting.

use raster_common::DownsampleMethod;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Lowest accepted worker thread count.
pub const MIN_THREADS: usize = 1;
/// Highest accepted worker thread count.
pub const MAX_THREADS: usize = 64;

/// Configuration for tile loading and pyramid building.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Tiles decoded concurrently per batch, always within [1, 64].
    max_threads: usize,

    /// Pyramid generation settings.
    pub pyramid: PyramidConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_threads: 1,
            pyramid: PyramidConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create a configuration with the given thread count (clamped).
    pub fn with_max_threads(max_threads: usize) -> Self {
        let mut config = Self::default();
        config.set_max_threads(max_threads);
        config
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("RL2_MAX_THREADS") {
            if let Ok(n) = val.parse() {
                config.set_max_threads(n);
            }
        }

        if let Ok(val) = std::env::var("RL2_PYRAMID_METHOD") {
            match val.parse::<DownsampleMethod>() {
                Ok(method) => config.pyramid.method = method,
                Err(e) => warn!(error = %e, "Ignoring RL2_PYRAMID_METHOD"),
            }
        }

        if let Ok(val) = std::env::var("RL2_PYRAMID_FACTOR") {
            if let Ok(factor) = val.parse() {
                config.pyramid.factor = factor;
            }
        }

        config
    }

    /// Worker threads used per decode batch.
    pub fn max_threads(&self) -> usize {
        self.max_threads.clamp(MIN_THREADS, MAX_THREADS)
    }

    /// Set the worker thread count, clamped to [1, 64].
    pub fn set_max_threads(&mut self, max_threads: usize) {
        self.max_threads = max_threads.clamp(MIN_THREADS, MAX_THREADS);
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if !(MIN_THREADS..=MAX_THREADS).contains(&self.max_threads) {
            return Err(format!(
                "max_threads must be {}-{}",
                MIN_THREADS, MAX_THREADS
            ));
        }
        self.pyramid.validate()
    }
}

/// Pyramid generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PyramidConfig {
    /// Downsampling method (forced to Nearest for palette/monochrome).
    pub method: DownsampleMethod,

    /// Reduction between consecutive levels (2, 4 or 8).
    pub factor: u32,
}

impl Default for PyramidConfig {
    fn default() -> Self {
        Self {
            method: DownsampleMethod::Mean,
            factor: 8,
        }
    }
}

impl PyramidConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !matches!(self.factor, 2 | 4 | 8) {
            return Err("pyramid factor must be 2, 4 or 8".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_threads_clamped() {
        assert_eq!(EngineConfig::default().max_threads(), 1);
        assert_eq!(EngineConfig::with_max_threads(0).max_threads(), 1);
        assert_eq!(EngineConfig::with_max_threads(8).max_threads(), 8);
        assert_eq!(EngineConfig::with_max_threads(500).max_threads(), 64);
    }

    #[test]
    fn test_deserialized_thread_count_is_clamped_on_read() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"max_threads": 128, "pyramid": {"method": "nearest", "factor": 4}}"#,
        )
        .unwrap();
        assert_eq!(config.max_threads(), 64);
        assert!(config.validate().is_err());
        assert_eq!(config.pyramid.method, DownsampleMethod::Nearest);
    }

    #[test]
    fn test_pyramid_factor_validation() {
        let mut config = EngineConfig::default();
        assert!(config.validate().is_ok());
        config.pyramid.factor = 3;
        assert!(config.validate().is_err());
    }
}
