//! Aspect handler trait and closure adapter

use crate::hooks::{AspectInfo, CallResult, HandlerSignature};

/// A handler attached before, instead of, or after a member
pub trait AspectHandler: Send + Sync {
    /// Execute the handler. An error propagates unchanged to the caller of the member.
    fn execute(&self, info: &AspectInfo<'_>) -> CallResult<()>;

    /// Get the handler name
    fn name(&self) -> &str;

    /// Shape the handler expects, checked against the member when it is registered
    fn signature(&self) -> HandlerSignature {
        HandlerSignature::context_only()
    }

    /// Check if the handler should run for this call. Skipped handlers do not count as
    /// fired for automatic removal.
    fn should_run(&self, _info: &AspectInfo<'_>) -> bool {
        true
    }
}

/// Handler backed by a closure
pub struct FnHandler<F> {
    name: String,
    signature: HandlerSignature,
    body: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&AspectInfo<'_>) -> CallResult<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, body: F) -> Self {
        Self {
            name: name.into(),
            signature: HandlerSignature::context_only(),
            body,
        }
    }

    /// Declare the member arguments (and optionally return kind) the closure relies on
    pub fn with_signature(mut self, signature: HandlerSignature) -> Self {
        self.signature = signature;
        self
    }
}

impl<F> AspectHandler for FnHandler<F>
where
    F: Fn(&AspectInfo<'_>) -> CallResult<()> + Send + Sync,
{
    fn execute(&self, info: &AspectInfo<'_>) -> CallResult<()> {
        (self.body)(info)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn signature(&self) -> HandlerSignature {
        self.signature.clone()
    }
}

/// Shorthand for [`FnHandler::new`]
pub fn handler_fn<F>(name: impl Into<String>, body: F) -> FnHandler<F>
where
    F: Fn(&AspectInfo<'_>) -> CallResult<()> + Send + Sync,
{
    FnHandler::new(name, body)
}
