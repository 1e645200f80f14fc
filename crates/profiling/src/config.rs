//! Profiler configuration

use crate::error::ProfileResult;
use property::UnresolvedPolicy;
use serde::{Deserialize, Serialize};

/// Configuration shared by every profile a factory constructs.
///
/// ```rust
/// use profiling::ProfilerConfig;
///
/// let config = ProfilerConfig::from_json(r#"{"maxDepth": 8, "unresolvedPolicy": {"substitute": "?"}}"#).unwrap();
/// assert!(config.enabled);
/// assert_eq!(config.max_depth, 8);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfilerConfig {
    /// Master switch; when off every profile is inactive
    pub enabled: bool,
    /// Profiles nested deeper than this are inactive
    pub max_depth: usize,
    /// How message templates treat unresolved tokens
    pub unresolved_policy: UnresolvedPolicy,
    /// Forward contained failures (hooks, predicates, expansion) to the sink
    pub report_failures: bool,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_depth: 100,
            unresolved_policy: UnresolvedPolicy::Fail,
            report_failures: true,
        }
    }
}

impl ProfilerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// A configuration with profiling switched off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> ProfileResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_unresolved_policy(mut self, policy: UnresolvedPolicy) -> Self {
        self.unresolved_policy = policy;
        self
    }

    pub fn with_report_failures(mut self, report: bool) -> Self {
        self.report_failures = report;
        self
    }
}
