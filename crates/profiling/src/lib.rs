//! Declarative Scope Profiling
//!
//! This crate measures and reports the duration of annotated code regions.
//! Each region is described once by a [`ProfileDescriptor`]; every entry into
//! the region constructs a [`Profile`] from it. It supports:
//!
//! - Conditional activation, evaluated against the target object
//! - Message templates expanded from the target's properties
//! - Hierarchical nesting per execution context (thread or tokio task)
//! - Buffered profiles that fold measurements into shared running totals
//! - Start and stop hooks whose failures never reach the profiled code
//! - Pluggable sinks and clocks
//!
//! # Example
//!
//! ```rust
//! use profiling::{ProfileDescriptor, ProfileContext, ProfileFactory, ProfilerConfig};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let factory = ProfileFactory::new(ProfilerConfig::default());
//! let descriptor = Arc::new(
//!     ProfileDescriptor::builder()
//!         .name("LoadUser")
//!         .message("Loading {UserId}")
//!         .build()
//!         .unwrap(),
//! );
//!
//! let target = json!({"UserId": 42});
//! let cx = ProfileContext::new();
//! {
//!     let guard = factory.enter(&descriptor, Some(&target), &cx);
//!     assert_eq!(guard.message(), "Loading 42");
//!     // ... profiled work ...
//! }
//! assert!(cx.is_empty());
//! ```
//!
//! # Modules
//!
//! - [`descriptor`] - Descriptors, conditions and hooks
//! - [`factory`] - Profile construction
//! - [`profile`] - Profile variants and the scope guard
//! - [`context`] - Execution contexts and nesting
//! - [`accumulator`] - Shared running totals for buffered profiles
//! - [`sink`] - Report and failure sinks
//! - [`registry`] - Call-site registry and the `Profiler` front end

pub mod accumulator;
mod clock;
mod config;
pub mod context;
pub mod descriptor;
mod error;
pub mod factory;
mod node;
pub mod profile;
pub mod registry;
pub mod sink;

pub use accumulator::{global_accumulator, AccumulationSnapshot, Accumulator};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ProfilerConfig;
pub use context::ProfileContext;
pub use descriptor::{Action, Condition, DescriptorSpec, HookContext, HookPhase, ProfileDescriptor, ProfileDescriptorBuilder};
pub use error::{ProfileError, ProfileResult};
pub use factory::ProfileFactory;
pub use node::{ContextId, ProfileId, ProfileKind, ProfileNode};
pub use profile::{BufferedProfile, InactiveProfile, PlainProfile, Profile, ProfileGuard, ProfileState};
pub use registry::{ProfileRegistry, ProfileScope, Profiler};
pub use sink::{FailureStage, InstrumentationFailure, MemorySink, MessageSink, NullSink, ProfileReport, TracingSink};

pub use property::{PropertyPath, PropertyReplacer, PropertySource, UnresolvedPolicy};

/// Open the profiles registered for a call-site key until the end of the
/// enclosing block.
///
/// Unknown keys are logged and ignored.
#[macro_export]
macro_rules! profile_scope {
    ($profiler:expr, $key:expr) => {
        let _profile_scope = $crate::__enter_or_warn(&$profiler, $key, None);
    };
    ($profiler:expr, $key:expr, $target:expr) => {
        let _profile_scope = $crate::__enter_or_warn(&$profiler, $key, Some($target as &dyn $crate::PropertySource));
    };
}

#[doc(hidden)]
pub fn __enter_or_warn(profiler: &Profiler, key: &str, target: Option<&dyn PropertySource>) -> Option<ProfileScope> {
    match profiler.enter(key, target) {
        Ok(scope) => Some(scope),
        Err(err) => {
            tracing::warn!(target: "profiling", key, "{}", err);
            None
        }
    }
}
