//! Engine configuration.

use parsim_types::Time;
use thiserror::Error;

/// Errors from engine configuration, surfaced before any worker starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("max_threads must be at least 1")]
    ZeroMaxThreads,
    #[error("min_lookahead must be non-negative, got {0}")]
    NegativeLookahead(Time),
}

/// Configuration for a multithreaded simulation.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on worker threads. The engine never runs more workers
    /// than there are LPs.
    pub max_threads: usize,

    /// Lower bound on inter-LP link delay used to cut partition edges.
    /// `None` auto-computes the median point-to-point channel delay.
    pub min_lookahead: Option<Time>,
}

impl EngineConfig {
    /// Create a configuration with the given thread cap.
    pub fn new(max_threads: usize) -> Self {
        Self {
            max_threads,
            min_lookahead: None,
        }
    }

    /// Set the thread cap.
    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Set an explicit minimum lookahead instead of auto-computing it.
    pub fn with_min_lookahead(mut self, lookahead: Time) -> Self {
        self.min_lookahead = Some(lookahead);
        self
    }

    /// Fail fast on configurations the engine cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_threads == 0 {
            return Err(ConfigError::ZeroMaxThreads);
        }
        if let Some(lookahead) = self.min_lookahead {
            if lookahead.is_negative() {
                return Err(ConfigError::NegativeLookahead(lookahead));
            }
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(num_cpus::get().max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_uses_hardware_concurrency() {
        let config = EngineConfig::default();
        assert!(config.max_threads >= 1);
        assert!(config.min_lookahead.is_none());
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::new(4).with_min_lookahead(Time::millis(5));
        assert_eq!(config.max_threads, 4);
        assert_eq!(config.min_lookahead, Some(Time::millis(5)));
    }

    #[test]
    fn test_rejects_zero_threads() {
        let config = EngineConfig::new(0);
        assert!(matches!(config.validate(), Err(ConfigError::ZeroMaxThreads)));
    }

    #[test]
    fn test_rejects_negative_lookahead() {
        let config = EngineConfig::new(2).with_min_lookahead(Time::from_ticks(-1));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NegativeLookahead(_))
        ));
    }
}
