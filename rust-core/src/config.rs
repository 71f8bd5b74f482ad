//! Sentinel configuration.
//!
//! Bundles the per-component configurations into one package that can be
//! loaded from TOML. Every field has a default, so an empty file (or no file
//! at all) yields the tuned defaults.
//!
//! ```toml
//! contact = "555-0100"
//!
//! [detector]
//! threshold = 25.0
//!
//! [countdown]
//! duration_ms = 30000
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::alert_sequence::CountdownConfig;
use crate::error::{Result, SentinelError};
use crate::escalation::EscalationConfig;
use crate::impact_detection::DetectorConfig;
use crate::signal::FilterConfig;

/// Complete sentinel configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    /// Emergency contact used for detected and simulated alerts.
    pub contact: Option<String>,

    /// Gravity filter parameters.
    pub filter: FilterConfig,

    /// Impact threshold.
    pub detector: DetectorConfig,

    /// Countdown timing.
    pub countdown: CountdownConfig,

    /// Message template.
    pub escalation: EscalationConfig,
}

impl SentinelConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: SentinelConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        let alpha = self.filter.alpha;
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(SentinelError::Config(format!(
                "filter.alpha must be in (0, 1), got {}",
                alpha
            )));
        }
        if !(self.detector.threshold > 0.0) {
            return Err(SentinelError::Config(format!(
                "detector.threshold must be positive, got {}",
                self.detector.threshold
            )));
        }
        if self.countdown.tick_interval_ms == 0 {
            return Err(SentinelError::Config(
                "countdown.tick_interval_ms must be non-zero".to_string(),
            ));
        }
        if self.countdown.duration_ms == 0 {
            return Err(SentinelError::Config(
                "countdown.duration_ms must be non-zero".to_string(),
            ));
        }
        if self.escalation.coordinate_precision < 6 {
            return Err(SentinelError::Config(format!(
                "escalation.coordinate_precision must be at least 6, got {}",
                self.escalation.coordinate_precision
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SentinelConfig::default();
        assert_eq!(config.filter.alpha, 0.8);
        assert_eq!(config.detector.threshold, 25.0);
        assert_eq!(config.countdown.duration_ms, 30_000);
        assert_eq!(config.countdown.tick_interval_ms, 1_000);
        assert_eq!(config.escalation.coordinate_precision, 6);
        assert!(config.contact.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = SentinelConfig::from_toml_str("").unwrap();
        assert_eq!(config.detector.threshold, 25.0);
    }

    #[test]
    fn test_partial_override() {
        let config = SentinelConfig::from_toml_str(
            r#"
            contact = "555-0100"

            [detector]
            threshold = 18.5

            [countdown]
            duration_ms = 10000
            "#,
        )
        .unwrap();
        assert_eq!(config.contact.as_deref(), Some("555-0100"));
        assert_eq!(config.detector.threshold, 18.5);
        assert_eq!(config.countdown.duration_ms, 10_000);
        assert_eq!(config.countdown.tick_interval_ms, 1_000);
        assert_eq!(config.filter.alpha, 0.8);
    }

    #[test]
    fn test_invalid_alpha_rejected() {
        let err = SentinelConfig::from_toml_str("[filter]\nalpha = 1.0\n").unwrap_err();
        assert!(matches!(err, SentinelError::Config(_)));
    }

    #[test]
    fn test_low_precision_rejected() {
        let err = SentinelConfig::from_toml_str("[escalation]\ncoordinate_precision = 3\n")
            .unwrap_err();
        assert!(err.to_string().contains("coordinate_precision"));
    }

    #[test]
    fn test_malformed_toml() {
        let err = SentinelConfig::from_toml_str("[detector\nthreshold = ").unwrap_err();
        assert!(matches!(err, SentinelError::ConfigParse(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = SentinelConfig::load("/nonexistent/crash-sentinel.toml").unwrap_err();
        assert!(matches!(err, SentinelError::Io(_)));
    }
}
