//! Checker and engine configuration.
//!
//! Both structs have sensible defaults and can be read from JSON. Missing
//! fields fall back to their defaults.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::checker::Severity;
use crate::error::{DmError, DmResult};
use crate::parser::ANCHOR_KEYWORDS;

/// Settings for a single rule check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerConfig {
    /// Anchor keyword to schema root name.
    ///
    /// Keys must be one of [`ANCHOR_KEYWORDS`], the only words a condition
    /// can open with; only the root each one maps to is configurable.
    pub anchors: BTreeMap<String, String>,
    /// Emit advisories for patterns not connected to any schema root.
    pub report_unanchored: bool,
    /// Severity for problems found only on negated paths.
    pub negated_severity: Severity,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        let anchors = [("state", "state"), ("impasse", "impasse")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            anchors,
            report_unanchored: true,
            negated_severity: Severity::Warning,
        }
    }
}

impl CheckerConfig {
    /// Root name an anchor keyword refers to.
    #[must_use]
    pub fn root_for(&self, keyword: &str) -> Option<&str> {
        self.anchors.get(keyword).map(String::as_str)
    }

    /// Rejects anchor keys no rule can write.
    pub fn validate(&self) -> DmResult<()> {
        if let Some(key) = self.anchors.keys().find(|k| !ANCHOR_KEYWORDS.contains(&k.as_str())) {
            return Err(DmError::Config {
                message: format!(
                    "unknown anchor keyword '{key}' (expected one of: {})",
                    ANCHOR_KEYWORDS.join(", ")
                ),
            });
        }
        Ok(())
    }
}

/// Settings for [`crate::engine::CheckEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub checker: CheckerConfig,
    /// Background check workers; 0 checks on the calling thread.
    pub workers: usize,
    /// Maximum queued background checks.
    pub queue_capacity: usize,
    /// Buffered events per diagnostic subscriber.
    pub stream_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            checker: CheckerConfig::default(),
            workers: 0,
            queue_capacity: 1024,
            stream_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Parses a JSON config.
    pub fn from_json_str(s: &str) -> DmResult<Self> {
        let config: Self = serde_json::from_str(s).map_err(|e| DmError::Config {
            message: format!("parse config: {e}"),
        })?;
        config.checker.validate()?;
        Ok(config)
    }

    /// Reads a JSON config file.
    pub fn from_path(path: impl AsRef<Path>) -> DmResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.workers, 0);
        assert_eq!(config.checker.root_for("state"), Some("state"));
        assert_eq!(config.checker.root_for("impasse"), Some("impasse"));
        assert_eq!(config.checker.negated_severity, Severity::Warning);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(r#"{"workers": 4, "checker": {"report_unanchored": false}}"#).unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.queue_capacity, 1024);
        assert!(!config.checker.report_unanchored);
        assert_eq!(config.checker.root_for("state"), Some("state"));
    }

    #[test]
    fn test_custom_anchor() {
        let config =
            EngineConfig::from_json_str(r#"{"checker": {"anchors": {"state": "top-state"}}}"#).unwrap();
        assert_eq!(config.checker.root_for("state"), Some("top-state"));
        assert_eq!(config.checker.root_for("impasse"), None);
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dmcheck.json");
        std::fs::write(&path, r#"{"stream_capacity": 8}"#).unwrap();
        assert_eq!(EngineConfig::from_path(&path).unwrap().stream_capacity, 8);
        assert!(EngineConfig::from_json_str("nope").is_err());
    }

    #[test]
    fn test_unknown_anchor_keyword_rejected() {
        let err = EngineConfig::from_json_str(r#"{"checker": {"anchors": {"goal": "state"}}}"#).unwrap_err();
        assert!(matches!(err, DmError::Config { .. }));
        assert!(err.to_string().contains("'goal'"));

        let config = EngineConfig::from_json_str(r#"{"checker": {"anchors": {"impasse": "sub"}}}"#).unwrap();
        assert_eq!(config.checker.root_for("impasse"), Some("sub"));
        assert!(CheckerConfig::default().validate().is_ok());
    }
}
