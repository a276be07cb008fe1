//! Objects of the dynamic runtime

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock, Weak};

use serde_json::{Map, Value};

use crate::hooks::CallInterceptor;
use crate::runtime::ClassId;

/// Redirect slot for one member
#[derive(Clone)]
pub(crate) struct Redirect {
    pub(crate) id: u64,
    pub(crate) entry: Weak<dyn CallInterceptor>,
}

/// An instance of a runtime class.
///
/// Besides instance variables an object carries per-object redirect slots and typed
/// extension storage, so state attached by other subsystems lives and dies with it.
pub struct Object {
    id: u64,
    class: ClassId,
    ivars: RwLock<Map<String, Value>>,
    redirects: RwLock<HashMap<String, Redirect>>,
    extensions: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl Object {
    pub(crate) fn new(id: u64, class: ClassId) -> Self {
        Self {
            id,
            class,
            ivars: RwLock::new(Map::new()),
            redirects: RwLock::new(HashMap::new()),
            extensions: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn class(&self) -> ClassId {
        self.class
    }

    /// Get an instance variable
    pub fn get_ivar(&self, key: &str) -> Option<Value> {
        self.ivars.read().ok()?.get(key).cloned()
    }

    /// Set an instance variable
    pub fn set_ivar(&self, key: impl Into<String>, value: Value) {
        if let Ok(mut ivars) = self.ivars.write() {
            ivars.insert(key.into(), value);
        }
    }

    /// Get typed extension state, if any was attached
    pub fn extension<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let extensions = self.extensions.lock().ok()?;
        let value = extensions.get(&TypeId::of::<T>())?.clone();
        value.downcast::<T>().ok()
    }

    /// Get typed extension state, attaching a fresh value first when absent
    pub fn extension_or_insert_with<T, F>(&self, init: F) -> Arc<T>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let mut extensions = self
            .extensions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let slot = extensions
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Arc::new(init()) as Arc<dyn Any + Send + Sync>)
            .clone();

        match slot.downcast::<T>() {
            Ok(value) => value,
            // keyed by TypeId, so the stored value always has type T
            Err(_) => unreachable!("extension slot holds a foreign type"),
        }
    }

    pub(crate) fn redirect_for(&self, member: &str) -> Option<Redirect> {
        self.redirects.read().ok()?.get(member).cloned()
    }

    pub(crate) fn set_redirect(&self, member: &str, redirect: Redirect) {
        if let Ok(mut redirects) = self.redirects.write() {
            redirects.insert(member.to_string(), redirect);
        }
    }

    pub(crate) fn clear_redirect(&self, member: &str, id: u64) {
        if let Ok(mut redirects) = self.redirects.write() {
            if redirects.get(member).map(|r| r.id) == Some(id) {
                redirects.remove(member);
            }
        }
    }

    /// Whether calls of `member` on this object are currently redirected
    pub fn is_redirected(&self, member: &str) -> bool {
        self.redirect_for(member).is_some()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.id)
            .field("class", &self.class)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ivars() {
        let object = Object::new(1, ClassId(0));
        assert_eq!(object.get_ivar("name"), None);

        object.set_ivar("name", json!("rex"));
        assert_eq!(object.get_ivar("name"), Some(json!("rex")));
    }

    #[test]
    fn test_extensions() {
        #[derive(Debug, PartialEq)]
        struct Counter(u32);

        let object = Object::new(1, ClassId(0));
        assert!(object.extension::<Counter>().is_none());

        let first = object.extension_or_insert_with(|| Counter(1));
        let second = object.extension_or_insert_with(|| Counter(2));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*object.extension::<Counter>().unwrap(), Counter(1));
    }
}
