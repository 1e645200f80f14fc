//! Error types for template expansion

use thiserror::Error;

/// Errors that can occur while parsing or expanding a template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpandError {
    /// A path segment did not resolve against the current value
    #[error("unresolved property '{segment}' in '{{{path}}}' (template: \"{template}\")")]
    Unresolved {
        segment: String,
        path: String,
        template: String,
    },

    /// The template references a property but no target was supplied
    #[error("no target to resolve '{{{path}}}' against (template: \"{template}\")")]
    MissingTarget { path: String, template: String },

    /// An opening brace without a matching close
    #[error("unterminated token at byte {position} (template: \"{template}\")")]
    Unterminated { position: usize, template: String },

    /// A closing brace that is neither escaped nor closing a token
    #[error("unmatched '}}' at byte {position} (template: \"{template}\")")]
    UnmatchedClose { position: usize, template: String },

    /// An empty token or an empty path segment
    #[error("empty property path at byte {position} (template: \"{template}\")")]
    EmptyToken { position: usize, template: String },
}

impl ExpandError {
    /// The original template text the error refers to.
    pub fn template(&self) -> &str {
        match self {
            Self::Unresolved { template, .. }
            | Self::MissingTarget { template, .. }
            | Self::Unterminated { template, .. }
            | Self::UnmatchedClose { template, .. }
            | Self::EmptyToken { template, .. } => template,
        }
    }

    /// Whether this is a syntax error (as opposed to a resolution failure).
    pub fn is_syntax(&self) -> bool {
        matches!(
            self,
            Self::Unterminated { .. } | Self::UnmatchedClose { .. } | Self::EmptyToken { .. }
        )
    }
}

/// Result type for expansion operations.
pub type ExpandResult<T> = Result<T, ExpandError>;
