//! Property Expansion
//!
//! Renders message templates by resolving `{Property.Path}` tokens against a
//! live target object:
//! - `PropertySource` abstracts the target's readable members
//! - `Template` parses and validates template text
//! - `Expander` renders templates with a configurable unresolved-token policy
//!   and a chain of custom replacers
//!
//! # Example
//!
//! ```rust
//! use property::{expand, Expander, UnresolvedPolicy};
//! use serde_json::json;
//!
//! let target = json!({"User": {"Id": 42}});
//! assert_eq!(expand(Some(&target), "Loading {User.Id}").unwrap(), "Loading 42");
//!
//! let lenient = Expander::new().with_policy(UnresolvedPolicy::Substitute("?".into()));
//! assert_eq!(lenient.expand(Some(&target), "{User.Name}").unwrap(), "?");
//! ```

mod error;
mod expander;
mod source;
mod template;

pub use error::{ExpandError, ExpandResult};
pub use expander::{expand, value_to_string, Expander, PropertyReplacer, UnresolvedPolicy};
pub use source::{PropertySource, Serialized};
pub use template::{PropertyPath, Segment, Template};

/// Re-export so callers can build targets without naming serde_json directly
pub use serde_json::Value;
