//! In-process dynamic object model
//!
//! Classes with single inheritance and per-class method tables, objects, and
//! message sending through [`Runtime::send`]. Each send resolves the implementation
//! through the class chain, then checks per-object and per-class redirect slots; a
//! redirected call is handed to the installed [`CallInterceptor`] together with the
//! implementation it would otherwise have run.

mod object;

pub use self::object::Object;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock, Weak};

use anyhow::{anyhow, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hooks::{
    ArgumentBoxer, CallInterceptor, CallResult, Invocation, RedirectError, RedirectionHandle,
    Redirector, Scope, ScopeRef, Signature, SignatureProvider, TypeHierarchy,
};
use self::object::Redirect;

/// Member sent to an object right before it is disposed
pub const TEARDOWN_MEMBER: &str = "dealloc";

/// Index of a class in the runtime's class table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClassId(pub(crate) u32);

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Body of a method
pub type Implementation = Arc<dyn Fn(&Arc<Object>, &[Value]) -> CallResult<Value> + Send + Sync>;

/// A method: declared signature plus implementation
#[derive(Clone)]
pub struct Method {
    signature: Signature,
    implementation: Implementation,
}

impl Method {
    pub fn new<F>(signature: Signature, body: F) -> Self
    where
        F: Fn(&Arc<Object>, &[Value]) -> CallResult<Value> + Send + Sync + 'static,
    {
        Self {
            signature,
            implementation: Arc::new(body),
        }
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn implementation(&self) -> Implementation {
        self.implementation.clone()
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

struct ClassEntry {
    name: String,
    superclass: Option<ClassId>,
    methods: RwLock<HashMap<String, Method>>,
    redirects: RwLock<HashMap<String, Redirect>>,
}

/// The class table and message dispatcher
pub struct Runtime {
    classes: RwLock<Vec<Arc<ClassEntry>>>,
    names: RwLock<HashMap<String, ClassId>>,
    next_object_id: AtomicU64,
    next_redirect_id: AtomicU64,
}

impl Runtime {
    /// Create an empty runtime
    pub fn new() -> Self {
        Self {
            classes: RwLock::new(Vec::new()),
            names: RwLock::new(HashMap::new()),
            next_object_id: AtomicU64::new(1),
            next_redirect_id: AtomicU64::new(1),
        }
    }

    /// Process-wide runtime, empty until classes are defined
    pub fn global() -> &'static Arc<Runtime> {
        static GLOBAL: OnceLock<Arc<Runtime>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(Runtime::new()))
    }

    /// Define a new class
    pub fn define_class(&self, name: impl Into<String>, superclass: Option<ClassId>) -> CallResult<ClassId> {
        let name = name.into();
        let mut names = self.names.write().map_err(|_| anyhow!("class table lock poisoned"))?;
        let mut classes = self.classes.write().map_err(|_| anyhow!("class table lock poisoned"))?;

        if names.contains_key(&name) {
            bail!("class '{}' already defined", name);
        }
        if let Some(parent) = superclass {
            if parent.0 as usize >= classes.len() {
                bail!("unknown superclass {} for '{}'", parent, name);
            }
        }

        let id = ClassId(classes.len() as u32);
        classes.push(Arc::new(ClassEntry {
            name: name.clone(),
            superclass,
            methods: RwLock::new(HashMap::new()),
            redirects: RwLock::new(HashMap::new()),
        }));
        names.insert(name, id);

        tracing::debug!(class = %id, superclass = ?superclass, "Class defined");
        Ok(id)
    }

    /// Add or replace a method on a class
    pub fn add_method(&self, class: ClassId, name: impl Into<String>, method: Method) -> CallResult<()> {
        let entry = self.entry(class).ok_or_else(|| anyhow!("unknown class {}", class))?;
        entry
            .methods
            .write()
            .map_err(|_| anyhow!("method table lock poisoned"))?
            .insert(name.into(), method);
        Ok(())
    }

    pub fn class_named(&self, name: &str) -> Option<ClassId> {
        self.names.read().ok()?.get(name).copied()
    }

    pub fn class_name(&self, class: ClassId) -> Option<String> {
        self.entry(class).map(|entry| entry.name.clone())
    }

    pub fn superclass_of(&self, class: ClassId) -> Option<ClassId> {
        self.entry(class).and_then(|entry| entry.superclass)
    }

    /// Whether `class` is `ancestor` or inherits from it
    pub fn is_kind_of(&self, class: ClassId, ancestor: ClassId) -> bool {
        self.lineage(class).contains(&ancestor)
    }

    /// Allocate a new object of `class`
    pub fn instantiate(&self, class: ClassId) -> CallResult<Arc<Object>> {
        if self.entry(class).is_none() {
            bail!("unknown class {}", class);
        }
        let id = self.next_object_id.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(Object::new(id, class)))
    }

    /// Find the implementation `class` uses for `member`, walking up the class chain
    pub fn resolve_method(&self, class: ClassId, member: &str) -> Option<Method> {
        let mut current = Some(class);
        while let Some(id) = current {
            let entry = self.entry(id)?;
            if let Some(method) = entry.methods.read().ok()?.get(member) {
                return Some(method.clone());
            }
            current = entry.superclass;
        }
        None
    }

    pub fn responds_to(&self, class: ClassId, member: &str) -> bool {
        self.resolve_method(class, member).is_some()
    }

    /// Send `member` to `receiver`
    pub fn send(&self, receiver: &Arc<Object>, member: &str, arguments: Vec<Value>) -> CallResult<Value> {
        let original = self
            .resolve_method(receiver.class(), member)
            .map(|method| method.implementation());

        let redirect = receiver
            .redirect_for(member)
            .or_else(|| self.class_redirect(receiver.class(), member));

        let invocation = Invocation::new(receiver.clone(), member, arguments, original);

        if let Some(interceptor) = redirect.and_then(|r| r.entry.upgrade()) {
            return interceptor.intercept(&invocation);
        }

        if !invocation.has_original() {
            let class = self.class_name(receiver.class()).unwrap_or_default();
            bail!("{} (object #{}) does not respond to '{}'", class, receiver.id(), member);
        }
        invocation.invoke()
    }

    /// Send the teardown member (when the class responds to it) and release the object
    pub fn dispose(&self, object: Arc<Object>) -> CallResult<()> {
        if self.responds_to(object.class(), TEARDOWN_MEMBER) {
            self.send(&object, TEARDOWN_MEMBER, Vec::new())?;
        }
        drop(object);
        Ok(())
    }

    /// Whether calls of `member` on instances of `class` are redirected at class level
    pub fn is_class_redirected(&self, class: ClassId, member: &str) -> bool {
        self.class_redirect(class, member).is_some()
    }

    fn class_redirect(&self, class: ClassId, member: &str) -> Option<Redirect> {
        let mut current = Some(class);
        while let Some(id) = current {
            let entry = self.entry(id)?;
            if let Some(redirect) = entry.redirects.read().ok()?.get(member) {
                return Some(redirect.clone());
            }
            current = entry.superclass;
        }
        None
    }

    fn entry(&self, class: ClassId) -> Option<Arc<ClassEntry>> {
        self.classes.read().ok()?.get(class.0 as usize).cloned()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Redirector for Runtime {
    fn install(
        &self,
        scope: &Scope,
        member: &str,
        entry: Weak<dyn CallInterceptor>,
    ) -> Result<RedirectionHandle, RedirectError> {
        if !self.responds_to(scope.class(), member) {
            return Err(RedirectError(format!("no implementation of '{}' to redirect", member)));
        }

        let id = self.next_redirect_id.fetch_add(1, Ordering::Relaxed);
        let redirect = Redirect { id, entry };

        match scope {
            Scope::Class(class) => {
                let class_entry = self
                    .entry(*class)
                    .ok_or_else(|| RedirectError(format!("unknown class {}", class)))?;
                let mut redirects = class_entry
                    .redirects
                    .write()
                    .map_err(|_| RedirectError("redirect table lock poisoned".to_string()))?;
                if routes_elsewhere(redirects.get(member), &redirect.entry) {
                    return Err(RedirectError(format!("'{}' is already redirected by another interceptor", member)));
                }
                redirects.insert(member.to_string(), redirect);
            }
            Scope::Instance(object) => {
                if routes_elsewhere(object.redirect_for(member).as_ref(), &redirect.entry) {
                    return Err(RedirectError(format!("'{}' is already redirected by another interceptor", member)));
                }
                object.set_redirect(member, redirect);
            }
        }

        tracing::trace!(member, redirect = id, "Redirection installed");
        Ok(RedirectionHandle::new(id, scope.downgrade(), member))
    }

    fn uninstall(&self, handle: &RedirectionHandle) {
        match handle.scope() {
            ScopeRef::Class(class) => {
                if let Some(entry) = self.entry(*class) {
                    if let Ok(mut redirects) = entry.redirects.write() {
                        if redirects.get(handle.member()).map(|r| r.id) == Some(handle.id()) {
                            redirects.remove(handle.member());
                        }
                    }
                }
            }
            ScopeRef::Instance { object, .. } => {
                if let Some(object) = object.upgrade() {
                    object.clear_redirect(handle.member(), handle.id());
                }
            }
        }
        tracing::trace!(member = handle.member(), redirect = handle.id(), "Redirection removed");
    }

    fn teardown_member(&self) -> Option<&str> {
        Some(TEARDOWN_MEMBER)
    }
}

/// Whether an existing redirect still routes to a live interceptor other than `entry`
fn routes_elsewhere(existing: Option<&Redirect>, entry: &Weak<dyn CallInterceptor>) -> bool {
    existing.is_some_and(|r| r.entry.strong_count() > 0 && !r.entry.ptr_eq(entry))
}

impl SignatureProvider for Runtime {
    fn member_signature(&self, scope: &Scope, member: &str) -> Option<Signature> {
        self.resolve_method(scope.class(), member)
            .map(|method| method.signature().clone())
    }
}

impl ArgumentBoxer for Runtime {
    fn box_arguments(&self, invocation: &Invocation) -> Vec<Value> {
        invocation.raw_arguments().to_vec()
    }
}

impl TypeHierarchy for Runtime {
    fn superclass(&self, class: ClassId) -> Option<ClassId> {
        self.superclass_of(class)
    }

    fn type_name(&self, class: ClassId) -> String {
        self.class_name(class).unwrap_or_else(|| class.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::ValueKind;
    use serde_json::json;

    fn greeting_runtime() -> (Runtime, ClassId, ClassId) {
        let runtime = Runtime::new();
        let animal = runtime.define_class("Animal", None).unwrap();
        let dog = runtime.define_class("Dog", Some(animal)).unwrap();
        runtime
            .add_method(
                animal,
                "greet",
                Method::new(
                    Signature::new(vec![ValueKind::String], ValueKind::String),
                    |_obj, args| Ok(json!(format!("hello {}", args[0].as_str().unwrap_or("")))),
                ),
            )
            .unwrap();
        (runtime, animal, dog)
    }

    #[test]
    fn test_define_class_twice() {
        let runtime = Runtime::new();
        runtime.define_class("Animal", None).unwrap();
        assert!(runtime.define_class("Animal", None).is_err());
        assert!(runtime.define_class("Ghost", Some(ClassId(42))).is_err());
    }

    #[test]
    fn test_inherited_send() {
        let (runtime, animal, dog) = greeting_runtime();
        let rex = runtime.instantiate(dog).unwrap();

        assert!(runtime.is_kind_of(dog, animal));
        assert!(!runtime.is_kind_of(animal, dog));
        assert_eq!(runtime.send(&rex, "greet", vec![json!("bob")]).unwrap(), json!("hello bob"));
        assert_eq!(runtime.lineage(dog), vec![dog, animal]);
    }

    #[test]
    fn test_unknown_member() {
        let (runtime, _animal, dog) = greeting_runtime();
        let rex = runtime.instantiate(dog).unwrap();

        let err = runtime.send(&rex, "fly", Vec::new()).unwrap_err();
        assert!(err.to_string().contains("does not respond to 'fly'"));
    }

    #[test]
    fn test_override_in_subclass() {
        let (runtime, _animal, dog) = greeting_runtime();
        runtime
            .add_method(
                dog,
                "greet",
                Method::new(Signature::new(vec![ValueKind::String], ValueKind::String), |_obj, _args| {
                    Ok(json!("woof"))
                }),
            )
            .unwrap();
        let rex = runtime.instantiate(dog).unwrap();
        assert_eq!(runtime.send(&rex, "greet", vec![json!("bob")]).unwrap(), json!("woof"));
    }

    #[test]
    fn test_install_requires_implementation() {
        struct Nothing;
        impl CallInterceptor for Nothing {
            fn intercept(&self, _invocation: &Invocation) -> CallResult<Value> {
                Ok(Value::Null)
            }
        }

        let (runtime, animal, _dog) = greeting_runtime();
        let target: Arc<dyn CallInterceptor> = Arc::new(Nothing);
        let result = runtime.install(&Scope::Class(animal), "fly", Arc::downgrade(&target));
        assert!(result.is_err());

        let handle = runtime
            .install(&Scope::Class(animal), "greet", Arc::downgrade(&target))
            .unwrap();
        assert!(runtime.is_class_redirected(animal, "greet"));
        runtime.uninstall(&handle);
        assert!(!runtime.is_class_redirected(animal, "greet"));
    }
}
