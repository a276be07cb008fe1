//! Call payload and the per-call context handed to handlers

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use anyhow::anyhow;
use serde_json::Value;

use crate::hooks::{ArgumentBoxer, CallResult};
use crate::runtime::{Implementation, Object};

/// One in-flight call: receiver, member, raw arguments and the implementation the call
/// would have reached without interception.
pub struct Invocation {
    target: Arc<Object>,
    member: String,
    arguments: Vec<Value>,
    original: Option<Implementation>,
    return_value: Mutex<Option<Value>>,
}

impl Invocation {
    pub fn new(
        target: Arc<Object>,
        member: impl Into<String>,
        arguments: Vec<Value>,
        original: Option<Implementation>,
    ) -> Self {
        Self {
            target,
            member: member.into(),
            arguments,
            original,
            return_value: Mutex::new(None),
        }
    }

    pub fn target(&self) -> &Arc<Object> {
        &self.target
    }

    pub fn member(&self) -> &str {
        &self.member
    }

    /// Arguments exactly as the caller passed them
    pub fn raw_arguments(&self) -> &[Value] {
        &self.arguments
    }

    pub fn has_original(&self) -> bool {
        self.original.is_some()
    }

    /// Run the original implementation and store its result as the return value
    pub fn invoke(&self) -> CallResult<Value> {
        let original = self
            .original
            .as_ref()
            .ok_or_else(|| anyhow!("no original implementation of '{}' to invoke", self.member))?;

        let value = original(&self.target, &self.arguments)?;
        self.set_return_value(value.clone());
        Ok(value)
    }

    pub fn return_value(&self) -> Option<Value> {
        self.slot().clone()
    }

    pub fn set_return_value(&self, value: Value) {
        *self.slot() = Some(value);
    }

    /// Return value the caller receives; `null` when nothing produced one
    pub fn take_return_value(&self) -> Value {
        self.slot().take().unwrap_or(Value::Null)
    }

    fn slot(&self) -> MutexGuard<'_, Option<Value>> {
        self.return_value
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("target", &self.target.id())
            .field("member", &self.member)
            .field("arguments", &self.arguments)
            .field("has_original", &self.has_original())
            .finish()
    }
}

/// Context passed to handlers during one dispatch.
///
/// Borrowed from the dispatch that created it and cannot outlive it. Boxed arguments are
/// produced on first access and cached for the remaining handlers of the same call.
pub struct AspectInfo<'a> {
    invocation: &'a Invocation,
    boxer: &'a dyn ArgumentBoxer,
    arguments: OnceLock<Vec<Value>>,
}

impl<'a> AspectInfo<'a> {
    pub fn new(invocation: &'a Invocation, boxer: &'a dyn ArgumentBoxer) -> Self {
        Self {
            invocation,
            boxer,
            arguments: OnceLock::new(),
        }
    }

    /// The object currently being called
    pub fn subject(&self) -> &Arc<Object> {
        self.invocation.target()
    }

    /// The original call payload
    pub fn original_invocation(&self) -> &Invocation {
        self.invocation
    }

    pub fn member(&self) -> &str {
        self.invocation.member()
    }

    /// Boxed method arguments
    pub fn arguments(&self) -> &[Value] {
        self.arguments
            .get_or_init(|| self.boxer.box_arguments(self.invocation))
    }

    pub fn argument(&self, index: usize) -> Option<&Value> {
        self.arguments().get(index)
    }

    /// Call through to the original implementation (typically from an `instead` handler)
    pub fn invoke_original(&self) -> CallResult<Value> {
        self.invocation.invoke()
    }

    pub fn return_value(&self) -> Option<Value> {
        self.invocation.return_value()
    }

    pub fn set_return_value(&self, value: Value) {
        self.invocation.set_return_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Method, Runtime};
    use crate::hooks::{Signature, ValueKind};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBoxer {
        calls: AtomicUsize,
    }

    impl ArgumentBoxer for CountingBoxer {
        fn box_arguments(&self, invocation: &Invocation) -> Vec<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            invocation.raw_arguments().to_vec()
        }
    }

    fn echo_invocation() -> Invocation {
        let runtime = Runtime::new();
        let class = runtime.define_class("Echo", None).unwrap();
        let method = Method::new(
            Signature::new(vec![ValueKind::String], ValueKind::String),
            |_obj, args| Ok(args[0].clone()),
        );
        runtime.add_method(class, "echo", method.clone()).unwrap();
        let object = runtime.instantiate(class).unwrap();
        Invocation::new(object, "echo", vec![json!("hello")], Some(method.implementation()))
    }

    #[test]
    fn test_arguments_boxed_once() {
        let invocation = echo_invocation();
        let boxer = CountingBoxer { calls: AtomicUsize::new(0) };
        let info = AspectInfo::new(&invocation, &boxer);

        assert_eq!(boxer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(info.arguments(), &[json!("hello")]);
        assert_eq!(info.argument(0), Some(&json!("hello")));
        assert_eq!(boxer.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invoke_original_sets_return_value() {
        let invocation = echo_invocation();
        let boxer = CountingBoxer { calls: AtomicUsize::new(0) };
        let info = AspectInfo::new(&invocation, &boxer);

        assert!(info.return_value().is_none());
        assert_eq!(info.invoke_original().unwrap(), json!("hello"));
        assert_eq!(info.return_value(), Some(json!("hello")));

        info.set_return_value(json!("override"));
        assert_eq!(invocation.take_return_value(), json!("override"));
        assert_eq!(invocation.take_return_value(), Value::Null);
    }

    #[test]
    fn test_invoke_without_original() {
        let runtime = Runtime::new();
        let class = runtime.define_class("Empty", None).unwrap();
        let object = runtime.instantiate(class).unwrap();
        let invocation = Invocation::new(object, "missing", Vec::new(), None);

        let err = invocation.invoke().unwrap_err();
        assert!(err.to_string().contains("missing"));
    }
}
