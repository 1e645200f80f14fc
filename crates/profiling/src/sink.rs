//! Message sinks
//!
//! The engine only renders messages and reports; where they end up is the
//! sink's business. [`TracingSink`] forwards everything to `tracing`,
//! [`MemorySink`] keeps it for inspection.

use crate::accumulator::AccumulationSnapshot;
use crate::node::{ProfileId, ProfileKind, ProfileNode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

// =============================================================================
// Records
// =============================================================================

/// Everything a stopped profile reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileReport {
    pub id: ProfileId,
    pub kind: ProfileKind,
    pub name: Option<String>,
    /// Rendered message
    pub message: String,
    /// Nesting depth, 0 for a root profile
    pub depth: usize,
    pub outer_id: Option<ProfileId>,
    pub outer_name: Option<String>,
    /// Time between start and stop
    #[serde(with = "duration_serde")]
    pub elapsed: Duration,
    /// Lines appended while the profile was running (buffered profiles)
    pub lines: Vec<String>,
    /// Running total after this profile folded in its measurement
    pub accumulated: Option<AccumulationSnapshot>,
    /// Wall-clock time the profile started
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl ProfileReport {
    /// Render as indented text, one line for the header and one per
    /// appended line.
    pub fn to_text(&self) -> String {
        let indent = "  ".repeat(self.depth);
        let mut out = format!("{}{} ({:?})", indent, self.title(), self.elapsed);
        if let Some(acc) = &self.accumulated {
            out.push_str(&format!(
                " [count: {}, total: {:?}, mean: {:?}]",
                acc.count,
                acc.total,
                acc.mean()
            ));
        }
        for line in &self.lines {
            out.push('\n');
            out.push_str(&indent);
            out.push_str("  ");
            out.push_str(line);
        }
        out
    }

    fn title(&self) -> String {
        match (&self.name, self.message.is_empty()) {
            (Some(name), false) => format!("{}: {}", name, self.message),
            (Some(name), true) => name.clone(),
            (None, _) => self.message.clone(),
        }
    }
}

/// Where inside the instrumentation a contained failure happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "action", rename_all = "camelCase")]
pub enum FailureStage {
    Condition,
    Expansion,
    StartHook(String),
    StopHook(String),
    Nesting,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Condition => f.write_str("condition"),
            Self::Expansion => f.write_str("expansion"),
            Self::StartHook(name) => write!(f, "start hook '{}'", name),
            Self::StopHook(name) => write!(f, "stop hook '{}'", name),
            Self::Nesting => f.write_str("nesting"),
        }
    }
}

/// A failure that was caught at the instrumentation boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentationFailure {
    pub profile: Option<ProfileId>,
    pub stage: FailureStage,
    pub detail: String,
}

impl InstrumentationFailure {
    pub fn new(profile: Option<ProfileId>, stage: FailureStage, detail: impl Into<String>) -> Self {
        Self {
            profile,
            stage,
            detail: detail.into(),
        }
    }
}

// =============================================================================
// Sinks
// =============================================================================

/// Receives rendered profile output.
pub trait MessageSink: Send + Sync {
    /// A profile stopped.
    fn report(&self, report: &ProfileReport);

    /// A line appended to a plain profile while it runs.
    fn line(&self, _profile: &ProfileNode, _text: &str) {}

    /// A contained instrumentation failure.
    fn failure(&self, _failure: &InstrumentationFailure) {}
}

/// Forwards reports to `tracing` under the `profiling` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl MessageSink for TracingSink {
    fn report(&self, report: &ProfileReport) {
        tracing::info!(
            target: "profiling",
            id = report.id.as_u64(),
            name = report.name.as_deref().unwrap_or(""),
            depth = report.depth,
            elapsed_us = report.elapsed.as_micros() as u64,
            "{}",
            report.to_text()
        );
    }

    fn line(&self, profile: &ProfileNode, text: &str) {
        tracing::info!(
            target: "profiling",
            id = profile.id().as_u64(),
            name = profile.label(),
            "{}",
            text
        );
    }

    fn failure(&self, failure: &InstrumentationFailure) {
        tracing::warn!(
            target: "profiling",
            profile = failure.profile.map(|p| p.as_u64()),
            stage = %failure.stage,
            "instrumentation failure: {}",
            failure.detail
        );
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl MessageSink for NullSink {
    fn report(&self, _report: &ProfileReport) {}
}

/// Keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    reports: Mutex<Vec<ProfileReport>>,
    lines: Mutex<Vec<(ProfileId, String)>>,
    failures: Mutex<Vec<InstrumentationFailure>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<ProfileReport> {
        lock(&self.reports).clone()
    }

    pub fn lines(&self) -> Vec<(ProfileId, String)> {
        lock(&self.lines).clone()
    }

    pub fn failures(&self) -> Vec<InstrumentationFailure> {
        lock(&self.failures).clone()
    }

    /// Reports whose name matches.
    pub fn reports_named(&self, name: &str) -> Vec<ProfileReport> {
        lock(&self.reports)
            .iter()
            .filter(|r| r.name.as_deref() == Some(name))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.reports).clear();
        lock(&self.lines).clear();
        lock(&self.failures).clear();
    }

    /// Export collected reports as pretty JSON.
    pub fn export_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&*lock(&self.reports))
    }
}

impl MessageSink for MemorySink {
    fn report(&self, report: &ProfileReport) {
        lock(&self.reports).push(report.clone());
    }

    fn line(&self, profile: &ProfileNode, text: &str) {
        lock(&self.lines).push((profile.id(), text.to_string()));
    }

    fn failure(&self, failure: &InstrumentationFailure) {
        lock(&self.failures).push(failure.clone());
    }
}

// =============================================================================
// Serde helpers for Duration
// =============================================================================

pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_nanos() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let nanos = u64::deserialize(deserializer)?;
        Ok(Duration::from_nanos(nanos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(depth: usize, lines: Vec<String>) -> ProfileReport {
        ProfileReport {
            id: ProfileId::from_raw(7),
            kind: ProfileKind::Buffered,
            name: Some("LoadUser".to_string()),
            message: "Loading 42".to_string(),
            depth,
            outer_id: None,
            outer_name: None,
            elapsed: Duration::from_millis(3),
            lines,
            accumulated: None,
            started_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_report_text() {
        let text = report(1, vec!["step one".to_string()]).to_text();
        assert_eq!(text, "  LoadUser: Loading 42 (3ms)\n    step one");
    }

    #[test]
    fn test_report_text_without_name() {
        let mut r = report(0, Vec::new());
        r.name = None;
        assert_eq!(r.to_text(), "Loading 42 (3ms)");
    }

    #[test]
    fn test_memory_sink_collects() {
        let sink = MemorySink::new();
        sink.report(&report(0, Vec::new()));
        sink.failure(&InstrumentationFailure::new(None, FailureStage::Condition, "boom"));

        assert_eq!(sink.reports().len(), 1);
        assert_eq!(sink.reports_named("LoadUser").len(), 1);
        assert_eq!(sink.failures()[0].detail, "boom");

        let json = sink.export_json().unwrap();
        assert!(json.contains("\"message\": \"Loading 42\""));
        assert!(json.contains("\"elapsed\": 3000000"));

        sink.clear();
        assert!(sink.reports().is_empty());
        assert!(sink.failures().is_empty());
    }

    #[test]
    fn test_failure_stage_display() {
        assert_eq!(FailureStage::StopHook("flush".into()).to_string(), "stop hook 'flush'");
        assert_eq!(FailureStage::Expansion.to_string(), "expansion");
    }

    #[test]
    fn test_report_serialization_roundtrip() {
        let r = report(2, vec!["a".into()]);
        let json = serde_json::to_string(&r).unwrap();
        let parsed: ProfileReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, r.id);
        assert_eq!(parsed.elapsed, r.elapsed);
        assert_eq!(parsed.lines, r.lines);
    }
}
