//! Execution contexts and the nesting stack
//!
//! Every execution context owns one stack of active profiles. A profile
//! constructed without an explicit outer profile nests under the top of its
//! context's stack. Stacks are never shared, so nesting never crosses from
//! one context into another.
//!
//! Contexts are plain handles: tests create independent ones with
//! [`ProfileContext::new`], call sites normally use
//! [`ProfileContext::ambient`], which resolves to the calling thread's
//! context (or the enclosing tokio task's, with the `tokio` feature).

use crate::error::{ProfileError, ProfileResult};
use crate::node::{ContextId, ProfileId, ProfileNode};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_CONTEXT: ProfileContext = ProfileContext::new();
}

#[cfg(feature = "tokio")]
tokio::task_local! {
    static TASK_CONTEXT: ProfileContext;
}

struct ContextInner {
    id: ContextId,
    stack: Mutex<Vec<Arc<ProfileNode>>>,
}

/// Handle to one execution context's nesting stack.
///
/// Cloning the handle shares the stack.
#[derive(Clone)]
pub struct ProfileContext {
    inner: Arc<ContextInner>,
}

impl ProfileContext {
    /// Create a fresh, empty context.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id: ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)),
                stack: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The context of the calling task or thread.
    ///
    /// A tokio task outside [`scope`](Self::scope) gets its worker thread's
    /// context, which every other unscoped task on that worker shares.
    pub fn ambient() -> Self {
        #[cfg(feature = "tokio")]
        {
            if let Ok(cx) = TASK_CONTEXT.try_with(Clone::clone) {
                return cx;
            }
            if tokio::runtime::Handle::try_current().is_ok() {
                tracing::debug!(
                    target: "profiling::context",
                    "no task context in scope, falling back to the worker thread's context"
                );
            }
        }
        THREAD_CONTEXT.with(Clone::clone)
    }

    /// Run a future with `self` as the ambient context of the task.
    #[cfg(feature = "tokio")]
    pub async fn scope<F: std::future::Future>(self, future: F) -> F::Output {
        TASK_CONTEXT.scope(self, future).await
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<ProfileNode>>> {
        // Only this context's owner touches the stack; the lock is uncontended
        self.inner
            .stack
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The innermost active profile, if any.
    pub fn current(&self) -> Option<Arc<ProfileNode>> {
        self.lock().last().cloned()
    }

    /// Make `node` the innermost active profile.
    pub fn push(&self, node: Arc<ProfileNode>) {
        tracing::trace!(
            target: "profiling::context",
            context = %self.id(),
            profile = %node.id(),
            "push"
        );
        self.lock().push(node);
    }

    /// Remove `node`, which must be the innermost active profile.
    ///
    /// If `node` is further down the stack, only its own entry is removed
    /// and `UnbalancedStop` is returned. If it is not on the stack at all,
    /// nothing is removed.
    pub fn pop(&self, node: &ProfileNode) -> ProfileResult<()> {
        let mut stack = self.lock();
        let top = stack.last().map(|n| n.id());

        if top == Some(node.id()) {
            stack.pop();
            tracing::trace!(
                target: "profiling::context",
                context = %self.id(),
                profile = %node.id(),
                "pop"
            );
            return Ok(());
        }

        match stack.iter().rposition(|n| n.id() == node.id()) {
            Some(pos) => {
                stack.remove(pos);
                tracing::warn!(
                    target: "profiling::context",
                    context = %self.id(),
                    profile = %node.id(),
                    innermost = ?top,
                    "profile released out of order; removed its own entry"
                );
            }
            None => {
                tracing::warn!(
                    target: "profiling::context",
                    context = %self.id(),
                    profile = %node.id(),
                    "profile released but not active in this context"
                );
            }
        }

        Err(ProfileError::UnbalancedStop {
            profile: node.id(),
            top,
        })
    }

    /// Number of active profiles.
    pub fn depth(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, id: ProfileId) -> bool {
        self.lock().iter().any(|n| n.id() == id)
    }

    /// Ids of the active profiles, outermost first.
    pub fn stack(&self) -> Vec<ProfileId> {
        self.lock().iter().map(|n| n.id()).collect()
    }
}

impl Default for ProfileContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProfileContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfileContext")
            .field("id", &self.id())
            .field("stack", &self.stack())
            .finish()
    }
}
