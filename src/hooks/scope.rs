//! Hook scopes: a whole class or one object

use std::fmt;
use std::sync::{Arc, Weak};

use crate::runtime::{ClassId, Object};

/// Domain a hook applies to
#[derive(Clone)]
pub enum Scope {
    /// Every instance of the class and of its subclasses
    Class(ClassId),
    /// A single object
    Instance(Arc<Object>),
}

impl Scope {
    /// Class whose method table resolves the member for this scope
    pub fn class(&self) -> ClassId {
        match self {
            Self::Class(class) => *class,
            Self::Instance(object) => object.class(),
        }
    }

    pub fn is_class(&self) -> bool {
        matches!(self, Self::Class(_))
    }

    /// Non-owning form kept by identifiers and redirection handles
    pub fn downgrade(&self) -> ScopeRef {
        match self {
            Self::Class(class) => ScopeRef::Class(*class),
            Self::Instance(object) => ScopeRef::Instance {
                object: Arc::downgrade(object),
                object_id: object.id(),
                class: object.class(),
            },
        }
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Class(class) => write!(f, "Scope::Class({})", class),
            Self::Instance(object) => write!(f, "Scope::Instance(#{})", object.id()),
        }
    }
}

/// Weak counterpart of [`Scope`]
#[derive(Debug, Clone)]
pub enum ScopeRef {
    Class(ClassId),
    Instance {
        object: Weak<Object>,
        object_id: u64,
        class: ClassId,
    },
}

impl ScopeRef {
    pub fn upgrade(&self) -> Option<Scope> {
        match self {
            Self::Class(class) => Some(Scope::Class(*class)),
            Self::Instance { object, .. } => object.upgrade().map(Scope::Instance),
        }
    }

    pub fn class(&self) -> ClassId {
        match self {
            Self::Class(class) => *class,
            Self::Instance { class, .. } => *class,
        }
    }
}

impl fmt::Display for ScopeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Class(class) => write!(f, "class {}", class),
            Self::Instance { object_id, class, .. } => write!(f, "object #{} of class {}", object_id, class),
        }
    }
}
