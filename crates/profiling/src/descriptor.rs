//! Profile descriptors
//!
//! A descriptor is the declarative half of a profile: when to activate, what
//! to call it, what message to render, and which hooks to run. Descriptors
//! are built once at registration time and shared by every profile
//! constructed from them.
//!
//! # Example
//!
//! ```rust
//! use profiling::{Action, Condition, ProfileDescriptor};
//!
//! let descriptor = ProfileDescriptor::builder()
//!     .name("LoadUser")
//!     .message("Loading {UserId}")
//!     .condition(Condition::when(|target| target.is_some()))
//!     .on_stop(Action::new("log", |cx| {
//!         println!("{} took {:?}", cx.profile.label(), cx.elapsed);
//!         Ok(())
//!     }))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(descriptor.name(), Some("LoadUser"));
//! ```

use crate::error::ProfileResult;
use crate::node::ProfileNode;
use property::{PropertySource, Template};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Condition
// =============================================================================

type Predicate = dyn Fn(Option<&dyn PropertySource>) -> anyhow::Result<bool> + Send + Sync;

/// Activation gate of a descriptor.
#[derive(Clone)]
pub enum Condition {
    Static(bool),
    Predicate(Arc<Predicate>),
}

impl Condition {
    /// An infallible predicate evaluated against the target.
    pub fn when<F>(predicate: F) -> Self
    where
        F: Fn(Option<&dyn PropertySource>) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(
            move |target: Option<&dyn PropertySource>| -> anyhow::Result<bool> {
                Ok(predicate(target))
            },
        ))
    }

    /// A predicate that may fail; failure counts as "inactive".
    pub fn try_when<F>(predicate: F) -> Self
    where
        F: Fn(Option<&dyn PropertySource>) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(predicate))
    }

    /// Evaluate against a target. Panics inside the predicate are not caught
    /// here; the factory does that.
    pub fn evaluate(&self, target: Option<&dyn PropertySource>) -> anyhow::Result<bool> {
        match self {
            Self::Static(value) => Ok(*value),
            Self::Predicate(predicate) => predicate(target),
        }
    }
}

impl Default for Condition {
    fn default() -> Self {
        Self::Static(true)
    }
}

impl From<bool> for Condition {
    fn from(value: bool) -> Self {
        Self::Static(value)
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(value) => f.debug_tuple("Static").field(value).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

// =============================================================================
// Actions
// =============================================================================

/// Which lifecycle edge a hook runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookPhase {
    Start,
    Stop,
}

/// What a hook gets to see.
#[derive(Debug)]
pub struct HookContext<'a> {
    pub phase: HookPhase,
    pub profile: &'a ProfileNode,
    /// The enclosing profile, if still alive
    pub outer: Option<Arc<ProfileNode>>,
    /// Time since start; zero on the start edge
    pub elapsed: Duration,
}

type Hook = dyn Fn(&HookContext<'_>) -> anyhow::Result<()> + Send + Sync;

/// A named start or stop hook.
#[derive(Clone)]
pub struct Action {
    name: String,
    hook: Arc<Hook>,
}

impl Action {
    pub fn new<F>(name: impl Into<String>, hook: F) -> Self
    where
        F: Fn(&HookContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            hook: Arc::new(hook),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn invoke(&self, cx: &HookContext<'_>) -> anyhow::Result<()> {
        (self.hook)(cx)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action").field("name", &self.name).finish()
    }
}

// =============================================================================
// Descriptor
// =============================================================================

static NEXT_DESCRIPTOR_ID: AtomicU64 = AtomicU64::new(1);

/// Immutable specification that profile instances are constructed from.
#[derive(Debug, Clone)]
pub struct ProfileDescriptor {
    id: u64,
    condition: Condition,
    name: Option<String>,
    message: Option<Template>,
    start_actions: Vec<Action>,
    stop_actions: Vec<Action>,
    buffered: bool,
    delayed_start: bool,
}

impl ProfileDescriptor {
    pub fn builder() -> ProfileDescriptorBuilder {
        ProfileDescriptorBuilder::default()
    }

    /// Key of the running total buffered profiles of this descriptor share.
    ///
    /// The name, else the unexpanded template, else a key unique to this
    /// descriptor. Never depends on the target.
    pub fn accumulation_key(&self) -> String {
        match (&self.name, &self.message) {
            (Some(name), _) => name.clone(),
            (None, Some(template)) => template.source().to_string(),
            (None, None) => format!("descriptor-{}", self.id),
        }
    }

    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The unexpanded message template, if any.
    pub fn message(&self) -> Option<&Template> {
        self.message.as_ref()
    }

    pub fn start_actions(&self) -> &[Action] {
        &self.start_actions
    }

    pub fn stop_actions(&self) -> &[Action] {
        &self.stop_actions
    }

    pub fn is_buffered(&self) -> bool {
        self.buffered
    }

    /// Delayed profiles are not started by scoped acquisition.
    pub fn is_delayed_start(&self) -> bool {
        self.delayed_start
    }
}

impl Default for ProfileDescriptor {
    fn default() -> Self {
        Self {
            id: NEXT_DESCRIPTOR_ID.fetch_add(1, Ordering::Relaxed),
            condition: Condition::default(),
            name: None,
            message: None,
            start_actions: Vec::new(),
            stop_actions: Vec::new(),
            buffered: false,
            delayed_start: false,
        }
    }
}

/// Builder for [`ProfileDescriptor`].
#[derive(Debug, Default)]
pub struct ProfileDescriptorBuilder {
    condition: Condition,
    name: Option<String>,
    message: Option<String>,
    start_actions: Vec<Action>,
    stop_actions: Vec<Action>,
    buffered: bool,
    delayed_start: bool,
}

impl ProfileDescriptorBuilder {
    pub fn condition(mut self, condition: impl Into<Condition>) -> Self {
        self.condition = condition.into();
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn message(mut self, template: impl Into<String>) -> Self {
        self.message = Some(template.into());
        self
    }

    pub fn on_start(mut self, action: Action) -> Self {
        self.start_actions.push(action);
        self
    }

    pub fn on_stop(mut self, action: Action) -> Self {
        self.stop_actions.push(action);
        self
    }

    pub fn buffered(mut self, buffered: bool) -> Self {
        self.buffered = buffered;
        self
    }

    pub fn delayed_start(mut self, delayed: bool) -> Self {
        self.delayed_start = delayed;
        self
    }

    /// Validate the template and freeze the descriptor.
    pub fn build(self) -> ProfileResult<ProfileDescriptor> {
        let message = match self.message {
            Some(text) if !text.is_empty() => Some(Template::parse(&text)?),
            _ => None,
        };

        Ok(ProfileDescriptor {
            id: NEXT_DESCRIPTOR_ID.fetch_add(1, Ordering::Relaxed),
            condition: self.condition,
            name: self.name,
            message,
            start_actions: self.start_actions,
            stop_actions: self.stop_actions,
            buffered: self.buffered,
            delayed_start: self.delayed_start,
        })
    }
}

/// Declarative descriptor form, loadable from configuration.
///
/// Hooks and predicates cannot be expressed here; `enabled` becomes a
/// static condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorSpec {
    /// Call-site key the descriptor is registered under
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub buffered: bool,
    #[serde(default)]
    pub delayed_start: bool,
}

fn default_enabled() -> bool {
    true
}

impl DescriptorSpec {
    pub fn into_descriptor(self) -> ProfileResult<(String, ProfileDescriptor)> {
        let mut builder = ProfileDescriptor::builder()
            .condition(self.enabled)
            .buffered(self.buffered)
            .delayed_start(self.delayed_start);
        if let Some(name) = self.name {
            builder = builder.name(name);
        }
        if let Some(message) = self.message {
            builder = builder.message(message);
        }
        Ok((self.key, builder.build()?))
    }
}
