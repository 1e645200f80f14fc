//! Live profile instances
//!
//! A [`Profile`] is one of three variants sharing a single interface:
//!
//! - [`InactiveProfile`]: the condition was false. Start and stop do no work.
//! - [`PlainProfile`]: reports once, when it stops.
//! - [`BufferedProfile`]: folds its measurements into a total shared by
//!   every profile with the same accumulation key, and keeps appended lines
//!   until it stops.
//!
//! Every profile moves through `Created -> Started -> Stopped`. Stopped is
//! terminal. [`ProfileGuard`] ties the lifecycle to a lexical scope.

use crate::accumulator::{AccumulationSnapshot, Accumulator};
use crate::clock::Clock;
use crate::context::ProfileContext;
use crate::descriptor::{Action, HookContext, HookPhase, ProfileDescriptor};
use crate::error::{ProfileError, ProfileResult};
use crate::node::{ProfileId, ProfileKind, ProfileNode};
use crate::sink::{FailureStage, InstrumentationFailure, MessageSink, ProfileReport};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::ops::{Deref, DerefMut};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle state of a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileState {
    Created,
    Started,
    Stopped,
}

// =============================================================================
// Shared instrumentation
// =============================================================================

/// Collaborators every active profile reports through.
#[derive(Clone)]
pub(crate) struct Instruments {
    pub(crate) sink: Arc<dyn MessageSink>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) accumulator: Arc<Accumulator>,
    pub(crate) report_failures: bool,
}

impl Instruments {
    /// Record a failure caught at the instrumentation boundary.
    pub(crate) fn contain(&self, failure: InstrumentationFailure) {
        tracing::debug!(
            target: "profiling",
            profile = failure.profile.map(|p| p.as_u64()),
            stage = %failure.stage,
            detail = %failure.detail,
            "contained instrumentation failure"
        );
        if self.report_failures {
            self.sink.failure(&failure);
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

// =============================================================================
// Active core
// =============================================================================

/// State shared by the plain and buffered variants.
struct ActiveCore {
    node: Arc<ProfileNode>,
    descriptor: Arc<ProfileDescriptor>,
    context: ProfileContext,
    instruments: Instruments,
    state: ProfileState,
    started_at: Duration,
    started_wall: chrono::DateTime<chrono::Utc>,
}

impl ActiveCore {
    fn new(
        node: Arc<ProfileNode>,
        descriptor: Arc<ProfileDescriptor>,
        context: ProfileContext,
        instruments: Instruments,
    ) -> Self {
        Self {
            node,
            descriptor,
            context,
            instruments,
            state: ProfileState::Created,
            started_at: Duration::ZERO,
            started_wall: chrono::Utc::now(),
        }
    }

    fn start(&mut self) -> ProfileResult<()> {
        match self.state {
            ProfileState::Created => {}
            ProfileState::Started => return Err(ProfileError::AlreadyStarted(self.node.id())),
            ProfileState::Stopped => return Err(ProfileError::AlreadyStopped(self.node.id())),
        }

        // Pushed before the hooks so profiles opened by a hook nest under this one
        self.state = ProfileState::Started;
        self.context.push(Arc::clone(&self.node));
        let descriptor = Arc::clone(&self.descriptor);
        self.run_actions(HookPhase::Start, descriptor.start_actions(), Duration::ZERO);

        self.started_wall = chrono::Utc::now();
        self.started_at = self.instruments.clock.now();

        tracing::trace!(
            target: "profiling",
            profile = %self.node.id(),
            name = self.node.label(),
            depth = self.node.depth(),
            "profile started"
        );
        Ok(())
    }

    /// Move to `Stopped`. Returns the elapsed time if the profile was
    /// running, `None` if it had already stopped.
    fn begin_stop(&mut self) -> ProfileResult<Option<Duration>> {
        match self.state {
            ProfileState::Stopped => Ok(None),
            ProfileState::Created => {
                self.state = ProfileState::Stopped;
                Err(ProfileError::NotStarted(self.node.id()))
            }
            ProfileState::Started => {
                self.state = ProfileState::Stopped;
                Ok(Some(self.elapsed()))
            }
        }
    }

    /// Run stop hooks, emit the report, and leave the nesting stack.
    fn finish_stop(&self, report: ProfileReport) -> ProfileResult<()> {
        let descriptor = Arc::clone(&self.descriptor);
        self.run_actions(HookPhase::Stop, descriptor.stop_actions(), report.elapsed);
        self.instruments.sink.report(&report);

        tracing::trace!(
            target: "profiling",
            profile = %self.node.id(),
            name = self.node.label(),
            elapsed_us = report.elapsed.as_micros() as u64,
            "profile stopped"
        );

        if let Err(err) = self.context.pop(&self.node) {
            self.instruments.contain(InstrumentationFailure::new(
                Some(self.node.id()),
                FailureStage::Nesting,
                err.to_string(),
            ));
            return Err(err);
        }
        Ok(())
    }

    fn elapsed(&self) -> Duration {
        match self.state {
            ProfileState::Created => Duration::ZERO,
            _ => self.instruments.clock.since(self.started_at),
        }
    }

    fn run_actions(&self, phase: HookPhase, actions: &[Action], elapsed: Duration) {
        if actions.is_empty() {
            return;
        }

        let cx = HookContext {
            phase,
            profile: &self.node,
            outer: self.node.outer(),
            elapsed,
        };

        for action in actions {
            let detail = match panic::catch_unwind(AssertUnwindSafe(|| action.invoke(&cx))) {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => format!("{:#}", err),
                Err(payload) => panic_message(payload.as_ref()),
            };
            let stage = match phase {
                HookPhase::Start => FailureStage::StartHook(action.name().to_string()),
                HookPhase::Stop => FailureStage::StopHook(action.name().to_string()),
            };
            self.instruments
                .contain(InstrumentationFailure::new(Some(self.node.id()), stage, detail));
        }
    }

    fn report(&self, elapsed: Duration, lines: Vec<String>, accumulated: Option<AccumulationSnapshot>) -> ProfileReport {
        let outer = self.node.outer();
        ProfileReport {
            id: self.node.id(),
            kind: self.node.kind(),
            name: self.node.name().map(str::to_string),
            message: self.node.message().to_string(),
            depth: self.node.depth(),
            outer_id: self.node.outer_id(),
            outer_name: outer.and_then(|o| o.name().map(str::to_string)),
            elapsed,
            lines,
            accumulated,
            started_at: self.started_wall,
        }
    }
}

// =============================================================================
// Variants
// =============================================================================

/// A profile whose condition was false.
pub struct InactiveProfile {
    descriptor: Arc<ProfileDescriptor>,
    state: ProfileState,
}

impl InactiveProfile {
    pub(crate) fn new(descriptor: Arc<ProfileDescriptor>) -> Self {
        Self {
            descriptor,
            state: ProfileState::Created,
        }
    }
}

/// A profile that reports once, when it stops.
pub struct PlainProfile {
    core: ActiveCore,
}

impl PlainProfile {
    fn stop(&mut self) -> ProfileResult<()> {
        let Some(elapsed) = self.core.begin_stop()? else {
            return Ok(());
        };
        let report = self.core.report(elapsed, Vec::new(), None);
        self.core.finish_stop(report)
    }
}

/// A profile that accumulates into a shared total and buffers its lines.
pub struct BufferedProfile {
    core: ActiveCore,
    key: String,
    lines: Vec<String>,
    last_lap: Duration,
}

impl BufferedProfile {
    /// Key of the shared total this profile folds into.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Lines appended so far.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Fold the time since the last lap (or start) into the shared total
    /// without stopping. Returns `None` unless the profile is running.
    pub fn lap(&mut self) -> Option<AccumulationSnapshot> {
        if self.core.state != ProfileState::Started {
            return None;
        }
        let now = self.core.instruments.clock.now();
        let sample = now.saturating_sub(self.last_lap);
        self.last_lap = now;
        Some(self.core.instruments.accumulator.record(&self.key, sample))
    }

    /// Fold an externally measured sample into the shared total.
    ///
    /// Like [`lap`](Self::lap), only while the profile is running; a
    /// stopped profile is released and folds nothing more.
    pub fn record(&self, sample: Duration) -> Option<AccumulationSnapshot> {
        if self.core.state != ProfileState::Started {
            return None;
        }
        Some(self.core.instruments.accumulator.record(&self.key, sample))
    }

    /// Current value of the shared total.
    pub fn snapshot(&self) -> Option<AccumulationSnapshot> {
        self.core.instruments.accumulator.snapshot(&self.key)
    }

    fn start(&mut self) -> ProfileResult<()> {
        self.core.start()?;
        self.last_lap = self.core.started_at;
        Ok(())
    }

    fn stop(&mut self) -> ProfileResult<()> {
        let Some(elapsed) = self.core.begin_stop()? else {
            return Ok(());
        };
        let now = self.core.started_at + elapsed;
        let sample = now.saturating_sub(self.last_lap);
        let snapshot = self.core.instruments.accumulator.record(&self.key, sample);
        let lines = std::mem::take(&mut self.lines);
        let report = self.core.report(elapsed, lines, Some(snapshot));
        self.core.finish_stop(report)
    }
}

// =============================================================================
// Profile
// =============================================================================

/// A live profile instance.
pub enum Profile {
    Inactive(InactiveProfile),
    Plain(PlainProfile),
    Buffered(BufferedProfile),
}

impl Profile {
    pub(crate) fn inactive(descriptor: Arc<ProfileDescriptor>) -> Self {
        Self::Inactive(InactiveProfile::new(descriptor))
    }

    pub(crate) fn active(
        node: Arc<ProfileNode>,
        descriptor: Arc<ProfileDescriptor>,
        context: ProfileContext,
        instruments: Instruments,
    ) -> Self {
        let buffered = descriptor.is_buffered();
        let key = descriptor.accumulation_key();
        let core = ActiveCore::new(node, descriptor, context, instruments);
        if buffered {
            Self::Buffered(BufferedProfile {
                core,
                key,
                lines: Vec::new(),
                last_lap: Duration::ZERO,
            })
        } else {
            Self::Plain(PlainProfile { core })
        }
    }

    fn core(&self) -> Option<&ActiveCore> {
        match self {
            Self::Inactive(_) => None,
            Self::Plain(p) => Some(&p.core),
            Self::Buffered(b) => Some(&b.core),
        }
    }

    fn descriptor(&self) -> &ProfileDescriptor {
        match self {
            Self::Inactive(i) => &i.descriptor,
            Self::Plain(p) => &p.core.descriptor,
            Self::Buffered(b) => &b.core.descriptor,
        }
    }

    /// Begin measuring. Runs start hooks and makes this the innermost
    /// profile of its context. No-op for inactive profiles.
    pub fn start(&mut self) -> ProfileResult<()> {
        match self {
            Self::Inactive(_) => Ok(()),
            Self::Plain(p) => p.core.start(),
            Self::Buffered(b) => b.start(),
        }
    }

    /// Stop measuring. Runs stop hooks, reports, and restores the previous
    /// innermost profile. Calling it again is a no-op.
    pub fn stop(&mut self) -> ProfileResult<()> {
        match self {
            Self::Inactive(i) => {
                i.state = ProfileState::Stopped;
                Ok(())
            }
            Self::Plain(p) => p.stop(),
            Self::Buffered(b) => b.stop(),
        }
    }

    /// Attach a line of output to this profile.
    ///
    /// Plain profiles forward it immediately, buffered profiles emit it with
    /// their report, inactive profiles drop it.
    pub fn append(&mut self, line: impl Into<String>) {
        match self {
            Self::Inactive(_) => {}
            Self::Plain(p) => {
                if p.core.state != ProfileState::Stopped {
                    let line: String = line.into();
                    p.core.instruments.sink.line(&p.core.node, &line);
                }
            }
            Self::Buffered(b) => {
                if b.core.state != ProfileState::Stopped {
                    b.lines.push(line.into());
                }
            }
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Inactive(_))
    }

    pub fn kind(&self) -> ProfileKind {
        match self {
            Self::Inactive(_) => ProfileKind::Inactive,
            Self::Plain(_) => ProfileKind::Plain,
            Self::Buffered(_) => ProfileKind::Buffered,
        }
    }

    pub fn state(&self) -> ProfileState {
        match self {
            Self::Inactive(i) => i.state,
            Self::Plain(p) => p.core.state,
            Self::Buffered(b) => b.core.state,
        }
    }

    pub fn id(&self) -> Option<ProfileId> {
        self.core().map(|c| c.node.id())
    }

    pub fn name(&self) -> Option<&str> {
        self.descriptor().name()
    }

    /// The rendered message. Always empty for inactive profiles.
    pub fn message(&self) -> &str {
        self.core().map_or("", |c| c.node.message())
    }

    /// The shared node, used as an explicit outer profile for other
    /// constructions.
    pub fn node(&self) -> Option<&Arc<ProfileNode>> {
        self.core().map(|c| &c.node)
    }

    /// The enclosing profile, if any and still alive.
    pub fn outer(&self) -> Option<Arc<ProfileNode>> {
        self.core().and_then(|c| c.node.outer())
    }

    /// Time since start, zero if not started.
    pub fn elapsed(&self) -> Duration {
        self.core().map_or(Duration::ZERO, ActiveCore::elapsed)
    }

    pub fn is_delayed_start(&self) -> bool {
        self.descriptor().is_delayed_start()
    }

    pub fn as_buffered(&self) -> Option<&BufferedProfile> {
        match self {
            Self::Buffered(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_buffered_mut(&mut self) -> Option<&mut BufferedProfile> {
        match self {
            Self::Buffered(b) => Some(b),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profile")
            .field("kind", &self.kind())
            .field("id", &self.id())
            .field("name", &self.name())
            .field("message", &self.message())
            .field("state", &self.state())
            .finish()
    }
}

// =============================================================================
// Scoped Profile Guard
// =============================================================================

/// RAII guard that starts a profile on creation and stops it when dropped.
///
/// Delayed-start profiles are left in `Created` and must be started through
/// the guard.
#[derive(Debug)]
pub struct ProfileGuard {
    profile: Profile,
}

impl ProfileGuard {
    pub(crate) fn new(mut profile: Profile) -> Self {
        if !profile.is_delayed_start() {
            // A fresh profile is always in `Created`
            let _ = profile.start();
        }
        Self { profile }
    }

    /// Stop now and surface any usage error instead of logging it.
    pub fn finish(mut self) -> ProfileResult<()> {
        self.profile.stop()
    }
}

impl Deref for ProfileGuard {
    type Target = Profile;

    fn deref(&self) -> &Profile {
        &self.profile
    }
}

impl DerefMut for ProfileGuard {
    fn deref_mut(&mut self) -> &mut Profile {
        &mut self.profile
    }
}

impl Drop for ProfileGuard {
    fn drop(&mut self) {
        match self.profile.stop() {
            Ok(()) | Err(ProfileError::NotStarted(_)) => {}
            Err(err) => tracing::warn!(target: "profiling", "profile release failed: {}", err),
        }
    }
}
