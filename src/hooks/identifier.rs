//! Registered handlers and the tokens that remove them

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::hooks::{
    AspectError, AspectHandler, AspectInfo, AspectOptions, AspectsContainer, HandlerSignature,
    HookResult, Interceptor, ScopeRef,
};

/// One handler registered on a (scope, member) pair
pub struct AspectIdentifier {
    id: Uuid,
    member: String,
    options: AspectOptions,
    scope: ScopeRef,
    handler: Arc<dyn AspectHandler>,
    signature: HandlerSignature,
    container: Weak<AspectsContainer>,
    engine: Weak<Interceptor>,
    fired: AtomicBool,
    registered_at: DateTime<Utc>,
}

impl AspectIdentifier {
    pub(crate) fn new(
        member: impl Into<String>,
        options: AspectOptions,
        scope: ScopeRef,
        handler: Arc<dyn AspectHandler>,
        container: Weak<AspectsContainer>,
        engine: Weak<Interceptor>,
    ) -> Self {
        let signature = handler.signature();
        Self {
            id: Uuid::new_v4(),
            member: member.into(),
            options,
            scope,
            handler,
            signature,
            container,
            engine,
            fired: AtomicBool::new(false),
            registered_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn member(&self) -> &str {
        &self.member
    }

    pub fn options(&self) -> AspectOptions {
        self.options
    }

    pub fn scope(&self) -> &ScopeRef {
        &self.scope
    }

    pub fn handler(&self) -> &Arc<dyn AspectHandler> {
        &self.handler
    }

    pub fn handler_name(&self) -> &str {
        self.handler.name()
    }

    pub fn signature(&self) -> &HandlerSignature {
        &self.signature
    }

    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    pub(crate) fn container(&self) -> &Weak<AspectsContainer> {
        &self.container
    }

    /// Decide whether this handler runs for the call. An automatic-removal handler is
    /// admitted at most once, even across concurrent dispatches.
    pub(crate) fn admit(&self, info: &AspectInfo<'_>) -> bool {
        if !self.handler.should_run(info) {
            return false;
        }
        if self.options.automatic_removal {
            return !self.fired.swap(true, Ordering::AcqRel);
        }
        true
    }

    /// Whether an automatic-removal handler has already been admitted once
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

impl fmt::Debug for AspectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AspectIdentifier")
            .field("id", &self.id)
            .field("member", &self.member)
            .field("handler", &self.handler.name())
            .field("options", &self.options)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Opaque token returned by registration; removes the aspect again
#[derive(Debug, Clone)]
pub struct AspectToken {
    identifier: Arc<AspectIdentifier>,
}

impl AspectToken {
    pub(crate) fn new(identifier: Arc<AspectIdentifier>) -> Self {
        Self { identifier }
    }

    pub fn id(&self) -> Uuid {
        self.identifier.id()
    }

    pub fn member(&self) -> &str {
        self.identifier.member()
    }

    pub fn identifier(&self) -> &Arc<AspectIdentifier> {
        &self.identifier
    }

    /// Deregister the aspect. Returns `true` when this call removed it.
    pub fn remove(&self) -> bool {
        match self.try_remove() {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(member = self.member(), error = %e, "Aspect removal was a no-op");
                false
            }
        }
    }

    /// Deregister the aspect, reporting why nothing was removed
    pub fn try_remove(&self) -> HookResult<()> {
        let engine = self
            .identifier
            .engine
            .upgrade()
            .ok_or_else(|| AspectError::AlreadyRemoved {
                member: self.identifier.member.clone(),
            })?;
        engine.remove_identifier(&self.identifier)
    }
}
