//! Shared identity of a live profile

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_PROFILE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a profile instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileId(u64);

impl ProfileId {
    pub(crate) fn next() -> Self {
        Self(NEXT_PROFILE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of an execution context (one nesting stack).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(pub(crate) u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// Which variant a profile was built as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    Inactive,
    Plain,
    Buffered,
}

/// The shared, immutable part of an active profile.
///
/// Nodes form the parent chain: each holds a weak reference to its outer
/// node, so a child never keeps its parent alive.
#[derive(Debug)]
pub struct ProfileNode {
    id: ProfileId,
    kind: ProfileKind,
    name: Option<String>,
    message: String,
    depth: usize,
    context: Option<ContextId>,
    outer: Option<Weak<ProfileNode>>,
    outer_id: Option<ProfileId>,
}

impl ProfileNode {
    pub(crate) fn new(
        kind: ProfileKind,
        name: Option<String>,
        message: String,
        context: Option<ContextId>,
        outer: Option<&Arc<ProfileNode>>,
    ) -> Self {
        Self {
            id: ProfileId::next(),
            kind,
            name,
            message,
            depth: outer.map_or(0, |o| o.depth + 1),
            context,
            outer: outer.map(Arc::downgrade),
            outer_id: outer.map(|o| o.id),
        }
    }

    pub fn id(&self) -> ProfileId {
        self.id
    }

    pub fn kind(&self) -> ProfileKind {
        self.kind
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The rendered message (empty for inactive profiles).
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Nesting depth; a root profile has depth 0.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The context this profile resolved its nesting against.
    pub fn context(&self) -> Option<ContextId> {
        self.context
    }

    /// The enclosing profile, if it is still alive.
    pub fn outer(&self) -> Option<Arc<ProfileNode>> {
        self.outer.as_ref().and_then(Weak::upgrade)
    }

    /// Id of the enclosing profile, even if it has since been dropped.
    pub fn outer_id(&self) -> Option<ProfileId> {
        self.outer_id
    }

    /// A label for logs: the name if there is one, else the message.
    pub fn label(&self) -> &str {
        match &self.name {
            Some(name) => name,
            None => &self.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = ProfileId::next();
        let b = ProfileId::next();
        assert_ne!(a, b);
        assert_eq!(ProfileId::from_raw(9).to_string(), "#9");
    }

    #[test]
    fn test_outer_chain_is_weak() {
        let outer = Arc::new(ProfileNode::new(ProfileKind::Plain, Some("outer".into()), String::new(), None, None));
        let inner = ProfileNode::new(ProfileKind::Plain, None, "inner msg".into(), None, Some(&outer));

        assert_eq!(inner.depth(), 1);
        assert_eq!(inner.outer().unwrap().id(), outer.id());
        assert_eq!(inner.label(), "inner msg");

        let outer_id = outer.id();
        drop(outer);
        assert!(inner.outer().is_none());
        assert_eq!(inner.outer_id(), Some(outer_id));
    }
}
