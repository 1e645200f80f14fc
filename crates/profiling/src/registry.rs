//! Call-site registry and the `Profiler` front end
//!
//! Descriptors are registered once, at process start, under a stable
//! call-site key. A key may carry several descriptors; entering the key
//! opens one profile per descriptor, each nested in the previous one.

use crate::config::ProfilerConfig;
use crate::context::ProfileContext;
use crate::descriptor::{DescriptorSpec, ProfileDescriptor};
use crate::error::{ProfileError, ProfileResult};
use crate::factory::ProfileFactory;
use crate::node::ProfileNode;
use crate::profile::{Profile, ProfileGuard, ProfileState};
use property::PropertySource;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

/// Maps call-site keys to their descriptors.
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    entries: HashMap<String, Vec<Arc<ProfileDescriptor>>>,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a JSON array of [`DescriptorSpec`]s.
    pub fn from_json(json: &str) -> ProfileResult<Self> {
        let specs: Vec<DescriptorSpec> = serde_json::from_str(json)?;
        let mut registry = Self::new();
        registry.load_specs(specs)?;
        Ok(registry)
    }

    /// Register declarative specs; returns how many were added.
    pub fn load_specs(&mut self, specs: Vec<DescriptorSpec>) -> ProfileResult<usize> {
        let count = specs.len();
        for spec in specs {
            let (key, descriptor) = spec.into_descriptor()?;
            self.register(key, descriptor);
        }
        Ok(count)
    }

    /// Append a descriptor to `key` and return the shared handle.
    pub fn register(&mut self, key: impl Into<String>, descriptor: ProfileDescriptor) -> Arc<ProfileDescriptor> {
        let descriptor = Arc::new(descriptor);
        self.register_shared(key, Arc::clone(&descriptor));
        descriptor
    }

    /// Attach an existing descriptor to another call site.
    pub fn register_shared(&mut self, key: impl Into<String>, descriptor: Arc<ProfileDescriptor>) {
        let key = key.into();
        tracing::debug!(
            target: "profiling",
            key = key.as_str(),
            name = descriptor.name().unwrap_or(""),
            "descriptor registered"
        );
        self.entries.entry(key).or_default().push(descriptor);
    }

    /// Descriptors for `key` in registration order (empty if unknown).
    pub fn descriptors(&self, key: &str) -> &[Arc<ProfileDescriptor>] {
        self.entries.get(key).map_or(&[], Vec::as_slice)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of registered keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The profiles opened for one call-site key.
///
/// Releases them innermost first when dropped, by their position on the
/// context's stack. A delayed profile started late sits above the profiles
/// opened after it and is released before them.
#[derive(Debug)]
pub struct ProfileScope {
    guards: Vec<ProfileGuard>,
    context: ProfileContext,
}

impl ProfileScope {
    /// Number of profiles in the scope, active or not.
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    /// Profiles outermost first.
    pub fn profiles(&self) -> impl Iterator<Item = &Profile> {
        self.guards.iter().map(|g| &**g)
    }

    pub fn innermost(&self) -> Option<&Profile> {
        self.guards.last().map(|g| &**g)
    }

    pub fn innermost_mut(&mut self) -> Option<&mut Profile> {
        self.guards.last_mut().map(|g| &mut **g)
    }

    /// The profile opened for the `index`-th descriptor of the key, used to
    /// start delayed profiles.
    pub fn profile_mut(&mut self, index: usize) -> Option<&mut Profile> {
        self.guards.get_mut(index).map(|g| &mut **g)
    }

    /// Release every profile now, returning the first usage error.
    pub fn finish(mut self) -> ProfileResult<()> {
        let mut first_err = None;
        for guard in self.take_in_release_order() {
            if let Err(err) = guard.finish() {
                if !matches!(err, ProfileError::NotStarted(_)) {
                    first_err.get_or_insert(err);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Guards ordered topmost on the stack first; unstarted ones last.
    fn take_in_release_order(&mut self) -> Vec<ProfileGuard> {
        let stack = self.context.stack();
        let mut guards: Vec<_> = std::mem::take(&mut self.guards).into_iter().rev().collect();
        guards.sort_by_key(|g| Reverse(g.id().and_then(|id| stack.iter().position(|s| *s == id))));
        guards
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        for guard in self.take_in_release_order() {
            drop(guard);
        }
    }
}

/// Registry plus factory: the entry point for declaring call sites.
///
/// ```rust
/// use profiling::{ProfileDescriptor, Profiler, ProfilerConfig};
/// use serde_json::json;
///
/// let mut profiler = Profiler::new(ProfilerConfig::default());
/// profiler.register(
///     "users::load",
///     ProfileDescriptor::builder().name("LoadUser").message("Loading {UserId}").build().unwrap(),
/// );
///
/// let target = json!({"UserId": 42});
/// let scope = profiler.enter("users::load", Some(&target)).unwrap();
/// assert_eq!(scope.innermost().unwrap().message(), "Loading 42");
/// ```
#[derive(Clone)]
pub struct Profiler {
    registry: ProfileRegistry,
    factory: ProfileFactory,
}

impl Profiler {
    pub fn new(config: ProfilerConfig) -> Self {
        Self {
            registry: ProfileRegistry::new(),
            factory: ProfileFactory::new(config),
        }
    }

    pub fn with_registry(mut self, registry: ProfileRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_factory(mut self, factory: ProfileFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn register(&mut self, key: impl Into<String>, descriptor: ProfileDescriptor) -> Arc<ProfileDescriptor> {
        self.registry.register(key, descriptor)
    }

    pub fn registry(&self) -> &ProfileRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ProfileRegistry {
        &mut self.registry
    }

    pub fn factory(&self) -> &ProfileFactory {
        &self.factory
    }

    /// Open the profiles registered for `key` on the ambient context.
    ///
    /// Under tokio, wrap each task in [`ProfileContext::scope`]; an unscoped
    /// task shares its worker thread's stack with every other unscoped task
    /// there, so a task suspended inside a profile becomes the outer profile
    /// of whatever those tasks open.
    pub fn enter(&self, key: &str, target: Option<&dyn PropertySource>) -> ProfileResult<ProfileScope> {
        self.enter_in(&ProfileContext::ambient(), key, target)
    }

    /// Open the profiles registered for `key` on an explicit context.
    ///
    /// Each profile nests under the last one in the scope that actually
    /// started; delayed and inactive profiles are skipped as parents.
    pub fn enter_in(
        &self,
        context: &ProfileContext,
        key: &str,
        target: Option<&dyn PropertySource>,
    ) -> ProfileResult<ProfileScope> {
        let descriptors = self.registry.descriptors(key);
        if descriptors.is_empty() {
            return Err(ProfileError::UnknownKey(key.to_string()));
        }

        let mut guards = Vec::with_capacity(descriptors.len());
        let mut parent: Option<Arc<ProfileNode>> = None;
        for descriptor in descriptors {
            let guard = match &parent {
                Some(outer) => self.factory.enter_nested(descriptor, target, outer, context),
                None => self.factory.enter(descriptor, target, context),
            };
            if guard.state() == ProfileState::Started {
                parent = guard.node().cloned();
            }
            guards.push(guard);
        }
        Ok(ProfileScope {
            guards,
            context: context.clone(),
        })
    }
}
