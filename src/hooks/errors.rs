//! Error handling for the aspects system

use std::fmt;
use std::error::Error;

use crate::hooks::Position;

/// Result type for registration, removal and configuration
pub type HookResult<T> = Result<T, AspectError>;

/// Result type for intercepted calls. Handler faults travel through dispatch unchanged.
pub type CallResult<T> = anyhow::Result<T>;

/// Aspects error types
#[derive(Debug)]
pub enum AspectError {
    /// Member is deny-listed, or a teardown member hooked at the wrong position
    MemberNotEligible {
        member: String,
        reason: String,
    },

    /// Scope does not expose the member
    MemberNotFound {
        scope: String,
        member: String,
    },

    /// A type-scoped hook on this member already exists elsewhere in the class hierarchy
    ConflictingHierarchyHook {
        member: String,
        existing: Vec<String>,
    },

    /// Handler declared a shape the member cannot satisfy
    SignatureIncompatible {
        member: String,
        reason: String,
    },

    /// The redirection provider refused to install
    RedirectionInstallFailed {
        member: String,
        reason: String,
    },

    /// Handler was already deregistered
    AlreadyRemoved {
        member: String,
    },

    /// Object that owned the handler no longer exists
    OwnerDeallocated {
        member: String,
    },

    /// Invalid configuration
    InvalidConfiguration(String),

    /// TOML parse error
    Toml(toml::de::Error),

    /// Serialization error
    SerializationError(serde_json::Error),

    /// IO error
    IoError(std::io::Error),
}

impl AspectError {
    /// Create a deny-list error
    pub fn not_eligible(member: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MemberNotEligible {
            member: member.into(),
            reason: reason.into(),
        }
    }

    /// Create a teardown-position error
    pub fn teardown_position(member: impl Into<String>, position: Position) -> Self {
        Self::MemberNotEligible {
            member: member.into(),
            reason: format!("only 'before' is allowed when hooking teardown, got '{}'", position),
        }
    }

    /// Create an incompatible signature error
    pub fn incompatible(member: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SignatureIncompatible {
            member: member.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    /// Whether this error reports a removal that had nothing left to remove
    pub fn is_removal_noop(&self) -> bool {
        matches!(self, Self::AlreadyRemoved { .. } | Self::OwnerDeallocated { .. })
    }
}

impl fmt::Display for AspectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MemberNotEligible { member, reason } => {
                write!(f, "Member '{}' cannot be hooked: {}", member, reason)
            }
            Self::MemberNotFound { scope, member } => {
                write!(f, "Unable to find member '{}' on {}", member, scope)
            }
            Self::ConflictingHierarchyHook { member, existing } => write!(
                f,
                "Member '{}' already hooked in class hierarchy ({}). A method can only be hooked once per class hierarchy",
                member,
                existing.join(", ")
            ),
            Self::SignatureIncompatible { member, reason } => {
                write!(f, "Handler signature incompatible with '{}': {}", member, reason)
            }
            Self::RedirectionInstallFailed { member, reason } => {
                write!(f, "Failed to install redirection for '{}': {}", member, reason)
            }
            Self::AlreadyRemoved { member } => {
                write!(f, "Aspect on '{}' was already removed", member)
            }
            Self::OwnerDeallocated { member } => {
                write!(f, "Unable to remove aspect on '{}': owning object already deallocated", member)
            }
            Self::InvalidConfiguration(msg) => write!(f, "Invalid configuration: {}", msg),
            Self::Toml(e) => write!(f, "TOML error: {}", e),
            Self::SerializationError(e) => write!(f, "Serialization error: {}", e),
            Self::IoError(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl Error for AspectError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Toml(e) => Some(e),
            Self::SerializationError(e) => Some(e),
            Self::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for AspectError {
    fn from(error: toml::de::Error) -> Self {
        Self::Toml(error)
    }
}

impl From<serde_json::Error> for AspectError {
    fn from(error: serde_json::Error) -> Self {
        Self::SerializationError(error)
    }
}

impl From<std::io::Error> for AspectError {
    fn from(error: std::io::Error) -> Self {
        Self::IoError(error)
    }
}
