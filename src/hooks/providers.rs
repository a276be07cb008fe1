//! Collaborator contracts consumed by the interceptor
//!
//! The interceptor never touches method tables itself. It asks a [`Redirector`] to route
//! future calls of a member through a [`CallInterceptor`], a [`SignatureProvider`] for the
//! member's shape, an [`ArgumentBoxer`] for reportable arguments and a [`TypeHierarchy`]
//! for superclass links. [`crate::runtime::Runtime`] implements all four.

use std::fmt;
use std::sync::Weak;

use serde_json::Value;

use crate::hooks::{CallResult, Invocation, Scope, ScopeRef, Signature};
use crate::runtime::ClassId;

/// Entry point a redirected call lands in
pub trait CallInterceptor: Send + Sync {
    fn intercept(&self, invocation: &Invocation) -> CallResult<Value>;
}

/// Proof of an installed redirection, handed back on uninstall
#[derive(Debug, Clone)]
pub struct RedirectionHandle {
    id: u64,
    scope: ScopeRef,
    member: String,
}

impl RedirectionHandle {
    pub fn new(id: u64, scope: ScopeRef, member: impl Into<String>) -> Self {
        Self {
            id,
            scope,
            member: member.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn scope(&self) -> &ScopeRef {
        &self.scope
    }

    pub fn member(&self) -> &str {
        &self.member
    }
}

/// Reason a redirection could not be installed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectError(pub String);

impl fmt::Display for RedirectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for RedirectError {}

/// Installs and removes call-site redirections.
///
/// After `install`, calls of `member` within `scope` must reach `entry`, and the original
/// implementation must stay reachable through the [`Invocation`] handed to it.
pub trait Redirector: Send + Sync {
    fn install(
        &self,
        scope: &Scope,
        member: &str,
        entry: Weak<dyn CallInterceptor>,
    ) -> Result<RedirectionHandle, RedirectError>;

    fn uninstall(&self, handle: &RedirectionHandle);

    /// Member the object model sends to an object right before disposing it
    fn teardown_member(&self) -> Option<&str> {
        None
    }
}

/// Reports the call signature of members
pub trait SignatureProvider: Send + Sync {
    /// `None` when the scope does not expose the member
    fn member_signature(&self, scope: &Scope, member: &str) -> Option<Signature>;
}

/// Materializes reportable argument values from an in-flight call
pub trait ArgumentBoxer: Send + Sync {
    fn box_arguments(&self, invocation: &Invocation) -> Vec<Value>;
}

/// Superclass links of the type system
pub trait TypeHierarchy: Send + Sync {
    fn superclass(&self, class: ClassId) -> Option<ClassId>;

    fn type_name(&self, class: ClassId) -> String;

    /// `class` followed by every ancestor up to the root
    fn lineage(&self, class: ClassId) -> Vec<ClassId> {
        let mut lineage = vec![class];
        let mut current = class;
        while let Some(parent) = self.superclass(current) {
            lineage.push(parent);
            current = parent;
        }
        lineage
    }
}
