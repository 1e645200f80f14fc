//! Error types for the profiling engine.
//!
//! Only call-site usage mistakes end up here. Failures inside the
//! instrumentation itself (predicates, expansion, hooks) are contained and
//! reported through the message sink instead.

use crate::node::ProfileId;
use thiserror::Error;

/// Usage errors surfaced to profiling call sites.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// `start` called on a profile that is already running
    #[error("profile {0} was already started")]
    AlreadyStarted(ProfileId),

    /// `start` called on a profile that has been stopped
    #[error("profile {0} was already stopped and cannot be restarted")]
    AlreadyStopped(ProfileId),

    /// `stop` called on an active profile that was never started
    #[error("profile {0} was stopped before it was started")]
    NotStarted(ProfileId),

    /// A profile was released while it was not the innermost active profile
    #[error("unbalanced stop: profile {profile} released while {} was innermost", fmt_top(.top))]
    UnbalancedStop {
        profile: ProfileId,
        top: Option<ProfileId>,
    },

    /// No descriptors registered for a call-site key
    #[error("no profile registered for '{0}'")]
    UnknownKey(String),

    /// A descriptor's message template is malformed
    #[error("invalid message template: {0}")]
    InvalidTemplate(#[from] property::ExpandError),

    /// Failed to parse configuration or descriptor specs
    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

fn fmt_top(top: &Option<ProfileId>) -> String {
    match top {
        Some(id) => id.to_string(),
        None => "nothing".to_string(),
    }
}

/// Result type for profiling operations.
pub type ProfileResult<T> = Result<T, ProfileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProfileError::AlreadyStarted(ProfileId::from_raw(3));
        assert_eq!(err.to_string(), "profile #3 was already started");

        let err = ProfileError::UnbalancedStop {
            profile: ProfileId::from_raw(1),
            top: Some(ProfileId::from_raw(2)),
        };
        assert_eq!(
            err.to_string(),
            "unbalanced stop: profile #1 released while #2 was innermost"
        );

        let err = ProfileError::UnbalancedStop {
            profile: ProfileId::from_raw(1),
            top: None,
        };
        assert_eq!(
            err.to_string(),
            "unbalanced stop: profile #1 released while nothing was innermost"
        );
    }

    #[test]
    fn test_config_error_conversion() {
        let json_err = serde_json::from_str::<()>("not json").unwrap_err();
        let err: ProfileError = json_err.into();
        assert!(matches!(err, ProfileError::Config(_)));
    }

    #[test]
    fn test_template_error_conversion() {
        let err: ProfileError = property::Template::parse("{oops").unwrap_err().into();
        assert!(matches!(err, ProfileError::InvalidTemplate(_)));
    }
}
