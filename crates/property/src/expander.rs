//! Property expansion

use crate::error::{ExpandError, ExpandResult};
use crate::source::{member, PropertySource};
use crate::template::{PropertyPath, Segment, Template};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// What to do with a token that does not resolve.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedPolicy {
    /// Fail the whole expansion with a descriptive error
    #[default]
    Fail,
    /// Replace the token with the given marker text
    Substitute(String),
}

/// A custom replacer consulted before member lookup.
///
/// Returning `Some` claims the token; `None` passes it on to the next
/// replacer and finally to the target itself.
pub trait PropertyReplacer: Send + Sync {
    fn replace(&self, target: Option<&dyn PropertySource>, path: &PropertyPath) -> Option<String>;
}

impl<F> PropertyReplacer for F
where
    F: Fn(Option<&dyn PropertySource>, &PropertyPath) -> Option<String> + Send + Sync,
{
    fn replace(&self, target: Option<&dyn PropertySource>, path: &PropertyPath) -> Option<String> {
        self(target, path)
    }
}

/// Expands templates against targets.
#[derive(Clone, Default)]
pub struct Expander {
    policy: UnresolvedPolicy,
    replacers: Vec<Arc<dyn PropertyReplacer>>,
}

impl fmt::Debug for Expander {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expander")
            .field("policy", &self.policy)
            .field("replacers", &self.replacers.len())
            .finish()
    }
}

impl Expander {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the unresolved-token policy.
    pub fn with_policy(mut self, policy: UnresolvedPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Append a custom replacer to the chain.
    pub fn with_replacer(mut self, replacer: impl PropertyReplacer + 'static) -> Self {
        self.replacers.push(Arc::new(replacer));
        self
    }

    pub fn policy(&self) -> &UnresolvedPolicy {
        &self.policy
    }

    /// Parse and render a template in one step.
    pub fn expand(&self, target: Option<&dyn PropertySource>, template: &str) -> ExpandResult<String> {
        if template.is_empty() {
            return Ok(String::new());
        }
        let parsed = Template::parse(template)?;
        self.render(target, &parsed)
    }

    /// Render an already parsed template.
    pub fn render(&self, target: Option<&dyn PropertySource>, template: &Template) -> ExpandResult<String> {
        let mut out = String::with_capacity(template.source().len());

        for segment in template.segments() {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Token(path) => match self.resolve(target, path, template) {
                    Ok(text) => out.push_str(&text),
                    Err(err) => match &self.policy {
                        UnresolvedPolicy::Fail => return Err(err),
                        UnresolvedPolicy::Substitute(marker) => out.push_str(marker),
                    },
                },
            }
        }

        Ok(out)
    }

    fn resolve(
        &self,
        target: Option<&dyn PropertySource>,
        path: &PropertyPath,
        template: &Template,
    ) -> ExpandResult<String> {
        for replacer in &self.replacers {
            if let Some(text) = replacer.replace(target, path) {
                return Ok(text);
            }
        }

        let target = target.ok_or_else(|| ExpandError::MissingTarget {
            path: path.to_string(),
            template: template.source().to_string(),
        })?;

        let unresolved = |segment: &str| ExpandError::Unresolved {
            segment: segment.to_string(),
            path: path.to_string(),
            template: template.source().to_string(),
        };

        let root = path.root();
        let mut current = target.property(root).ok_or_else(|| unresolved(root))?;
        for segment in &path.segments()[1..] {
            current = member(&current, segment)
                .cloned()
                .ok_or_else(|| unresolved(segment))?;
        }

        Ok(value_to_string(&current))
    }
}

/// Expand `template` against `target` with the default (failing) policy.
///
/// An empty template yields an empty string. `target` may be `None` only if
/// the template has no tokens.
pub fn expand(target: Option<&dyn PropertySource>, template: &str) -> ExpandResult<String> {
    Expander::new().expand(target, template)
}

/// Render a resolved value as message text.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}
