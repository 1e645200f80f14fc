//! Profile construction
//!
//! The factory turns a descriptor and a target into a live [`Profile`]:
//!
//! 1. master switch and activation condition
//! 2. depth limit
//! 3. message expansion (active profiles only)
//! 4. variant selection (plain or buffered)
//! 5. nesting under the explicit outer profile, or the context's innermost
//!
//! Construction never fails. Anything that goes wrong inside the
//! instrumentation degrades the profile instead of reaching the caller.

use crate::accumulator::{global_accumulator, Accumulator};
use crate::clock::{Clock, SystemClock};
use crate::config::ProfilerConfig;
use crate::context::ProfileContext;
use crate::descriptor::ProfileDescriptor;
use crate::node::{ProfileKind, ProfileNode};
use crate::profile::{panic_message, Instruments, Profile, ProfileGuard};
use crate::sink::{FailureStage, InstrumentationFailure, MessageSink, TracingSink};
use property::{Expander, PropertyReplacer, PropertySource, Template};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Builds profiles from descriptors.
#[derive(Clone)]
pub struct ProfileFactory {
    config: ProfilerConfig,
    expander: Expander,
    instruments: Instruments,
}

impl ProfileFactory {
    /// A factory reporting to `tracing`, timing with the system clock and
    /// accumulating into the global accumulator.
    pub fn new(config: ProfilerConfig) -> Self {
        Self {
            expander: Expander::new().with_policy(config.unresolved_policy.clone()),
            instruments: Instruments {
                sink: Arc::new(TracingSink),
                clock: Arc::new(SystemClock::new()),
                accumulator: Arc::clone(global_accumulator()),
                report_failures: config.report_failures,
            },
            config,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn MessageSink>) -> Self {
        self.instruments.sink = sink;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.instruments.clock = clock;
        self
    }

    pub fn with_accumulator(mut self, accumulator: Arc<Accumulator>) -> Self {
        self.instruments.accumulator = accumulator;
        self
    }

    /// Add a custom property replacer used when rendering messages.
    pub fn with_replacer(mut self, replacer: impl PropertyReplacer + 'static) -> Self {
        self.expander = self.expander.with_replacer(replacer);
        self
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    pub fn accumulator(&self) -> &Arc<Accumulator> {
        &self.instruments.accumulator
    }

    /// Construct a profile without starting it.
    ///
    /// `outer` overrides nesting; without it the profile nests under the
    /// innermost active profile of `context`.
    pub fn construct_profile(
        &self,
        descriptor: &Arc<ProfileDescriptor>,
        target: Option<&dyn PropertySource>,
        outer: Option<&Arc<ProfileNode>>,
        context: &ProfileContext,
    ) -> Profile {
        if !self.config.enabled || !self.is_condition_met(descriptor, target) {
            return Profile::inactive(Arc::clone(descriptor));
        }

        let outer = outer.cloned().or_else(|| context.current());
        let depth = outer.as_ref().map_or(0, |o| o.depth() + 1);
        if depth >= self.config.max_depth {
            tracing::warn!(
                target: "profiling",
                name = descriptor.name().unwrap_or(""),
                depth,
                max_depth = self.config.max_depth,
                "profile nested too deep; constructed inactive"
            );
            return Profile::inactive(Arc::clone(descriptor));
        }

        let message = match descriptor.message() {
            Some(template) => self.render_message(template, target),
            None => String::new(),
        };

        let kind = if descriptor.is_buffered() {
            ProfileKind::Buffered
        } else {
            ProfileKind::Plain
        };

        let node = Arc::new(ProfileNode::new(
            kind,
            descriptor.name().map(str::to_string),
            message,
            Some(context.id()),
            outer.as_ref(),
        ));

        tracing::debug!(
            target: "profiling",
            profile = %node.id(),
            kind = ?kind,
            name = node.label(),
            outer = ?node.outer_id(),
            context = %context.id(),
            "profile constructed"
        );

        Profile::active(node, Arc::clone(descriptor), context.clone(), self.instruments.clone())
    }

    /// Construct and start a profile bound to the returned guard.
    pub fn enter(
        &self,
        descriptor: &Arc<ProfileDescriptor>,
        target: Option<&dyn PropertySource>,
        context: &ProfileContext,
    ) -> ProfileGuard {
        ProfileGuard::new(self.construct_profile(descriptor, target, None, context))
    }

    /// Like [`enter`](Self::enter) with an explicit outer profile.
    pub fn enter_nested(
        &self,
        descriptor: &Arc<ProfileDescriptor>,
        target: Option<&dyn PropertySource>,
        outer: &Arc<ProfileNode>,
        context: &ProfileContext,
    ) -> ProfileGuard {
        ProfileGuard::new(self.construct_profile(descriptor, target, Some(outer), context))
    }

    fn is_condition_met(&self, descriptor: &ProfileDescriptor, target: Option<&dyn PropertySource>) -> bool {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| descriptor.condition().evaluate(target)));
        let detail = match outcome {
            Ok(Ok(met)) => return met,
            Ok(Err(err)) => format!("{:#}", err),
            Err(payload) => panic_message(payload.as_ref()),
        };

        self.instruments.contain(InstrumentationFailure::new(
            None,
            FailureStage::Condition,
            format!("{}: {}", descriptor.name().unwrap_or("<unnamed>"), detail),
        ));
        false
    }

    fn render_message(&self, template: &Template, target: Option<&dyn PropertySource>) -> String {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.expander.render(target, template)));
        let detail = match outcome {
            Ok(Ok(text)) => return text,
            Ok(Err(err)) => err.to_string(),
            Err(payload) => panic_message(payload.as_ref()),
        };

        self.instruments.contain(InstrumentationFailure::new(
            None,
            FailureStage::Expansion,
            detail.clone(),
        ));
        degraded_message(template, &detail)
    }
}

impl Default for ProfileFactory {
    fn default() -> Self {
        Self::new(ProfilerConfig::default())
    }
}

/// Best-effort message for a template that failed to expand.
fn degraded_message(template: &Template, detail: &str) -> String {
    format!("{} [expansion failed: {}]", template.source(), detail)
}
