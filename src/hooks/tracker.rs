//! Class-hierarchy bookkeeping for type-scoped hooks
//!
//! Every class that has a type-scoped hook on some member, or a descendant with one,
//! gets a node keyed by its [`ClassId`]. Nodes link to their parent by id only. A member
//! may carry a type-scoped hook on at most one class per inheritance line, otherwise an
//! instance of the subclass would pass through two redirections and run the original
//! implementation twice.

use std::collections::{HashMap, HashSet};

use crate::hooks::{AspectError, HookResult, TypeHierarchy};
use crate::runtime::ClassId;

/// Tracker entry for one class
#[derive(Debug, Clone)]
pub struct ScopeNode {
    class: ClassId,
    parent: Option<ClassId>,
    hooked: HashSet<String>,
    descendants: HashMap<String, HashSet<ClassId>>,
}

impl ScopeNode {
    fn new(class: ClassId, parent: Option<ClassId>) -> Self {
        Self {
            class,
            parent,
            hooked: HashSet::new(),
            descendants: HashMap::new(),
        }
    }

    pub fn class(&self) -> ClassId {
        self.class
    }

    pub fn parent(&self) -> Option<ClassId> {
        self.parent
    }

    /// Members hooked directly on this class
    pub fn hooked_members(&self) -> impl Iterator<Item = &str> {
        self.hooked.iter().map(String::as_str)
    }

    /// Descendant classes with a hook on `member`
    pub fn descendants_hooking(&self, member: &str) -> Vec<ClassId> {
        let mut classes: Vec<ClassId> = self
            .descendants
            .get(member)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        classes.sort();
        classes
    }

    fn is_unused(&self) -> bool {
        self.hooked.is_empty() && self.descendants.is_empty()
    }
}

/// Arena of [`ScopeNode`]s
#[derive(Debug, Default)]
pub struct ScopeTracker {
    nodes: HashMap<ClassId, ScopeNode>,
}

impl ScopeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with a conflict if `class` may not take a type-scoped hook on `member`.
    /// Re-hooking a class that already holds the hook is allowed.
    pub fn check_hook(&self, hierarchy: &dyn TypeHierarchy, class: ClassId, member: &str) -> HookResult<()> {
        if let Some(node) = self.nodes.get(&class) {
            let descendants = node.descendants_hooking(member);
            if !descendants.is_empty() {
                return Err(AspectError::ConflictingHierarchyHook {
                    member: member.to_string(),
                    existing: descendants.into_iter().map(|c| hierarchy.type_name(c)).collect(),
                });
            }
        }

        if let Some(ancestor) = self.hooked_ancestor(hierarchy, class, member) {
            return Err(AspectError::ConflictingHierarchyHook {
                member: member.to_string(),
                existing: vec![hierarchy.type_name(ancestor)],
            });
        }

        Ok(())
    }

    /// Record a type-scoped hook of `member` on `class`
    pub fn register_hook(&mut self, hierarchy: &dyn TypeHierarchy, class: ClassId, member: &str) -> HookResult<()> {
        self.check_hook(hierarchy, class, member)?;

        let mut current = Some(class);
        while let Some(id) = current {
            let parent = hierarchy.superclass(id);
            let node = self.nodes.entry(id).or_insert_with(|| ScopeNode::new(id, parent));
            if id == class {
                node.hooked.insert(member.to_string());
            } else {
                node.descendants
                    .entry(member.to_string())
                    .or_default()
                    .insert(class);
            }
            current = parent;
        }

        Ok(())
    }

    /// Forget the hook of `member` on `class`, pruning nodes left with nothing to track
    pub fn unregister_hook(&mut self, class: ClassId, member: &str) {
        let mut current = Some(class);
        while let Some(id) = current {
            let Some(node) = self.nodes.get_mut(&id) else {
                break;
            };
            let parent = node.parent;

            if id == class {
                node.hooked.remove(member);
            } else if let Some(set) = node.descendants.get_mut(member) {
                set.remove(&class);
                if set.is_empty() {
                    node.descendants.remove(member);
                }
            }

            if node.is_unused() {
                self.nodes.remove(&id);
            }
            current = parent;
        }
    }

    /// Whether a strict descendant of `class` holds a type-scoped hook on `member`
    pub fn has_descendant_hook(&self, class: ClassId, member: &str) -> bool {
        self.nodes
            .get(&class)
            .map(|node| node.descendants.contains_key(member))
            .unwrap_or(false)
    }

    /// Whether a strict ancestor of `class` holds a type-scoped hook on `member`
    pub fn has_ancestor_hook(&self, hierarchy: &dyn TypeHierarchy, class: ClassId, member: &str) -> bool {
        self.hooked_ancestor(hierarchy, class, member).is_some()
    }

    /// Whether `class` itself holds a type-scoped hook on `member`
    pub fn is_hooked(&self, class: ClassId, member: &str) -> bool {
        self.nodes
            .get(&class)
            .map(|node| node.hooked.contains(member))
            .unwrap_or(false)
    }

    pub fn node(&self, class: ClassId) -> Option<&ScopeNode> {
        self.nodes.get(&class)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn hooked_ancestor(&self, hierarchy: &dyn TypeHierarchy, class: ClassId, member: &str) -> Option<ClassId> {
        let mut current = hierarchy.superclass(class);
        while let Some(id) = current {
            if self.is_hooked(id, member) {
                return Some(id);
            }
            current = hierarchy.superclass(id);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Runtime;

    struct Zoo {
        runtime: Runtime,
        animal: ClassId,
        dog: ClassId,
        puppy: ClassId,
        cat: ClassId,
    }

    fn zoo() -> Zoo {
        let runtime = Runtime::new();
        let animal = runtime.define_class("Animal", None).unwrap();
        let dog = runtime.define_class("Dog", Some(animal)).unwrap();
        let puppy = runtime.define_class("Puppy", Some(dog)).unwrap();
        let cat = runtime.define_class("Cat", Some(animal)).unwrap();
        Zoo { runtime, animal, dog, puppy, cat }
    }

    #[test]
    fn test_register_marks_ancestors() {
        let zoo = zoo();
        let mut tracker = ScopeTracker::new();

        tracker.register_hook(&zoo.runtime, zoo.puppy, "greet").unwrap();

        assert!(tracker.is_hooked(zoo.puppy, "greet"));
        assert!(tracker.has_descendant_hook(zoo.dog, "greet"));
        assert!(tracker.has_descendant_hook(zoo.animal, "greet"));
        assert!(!tracker.has_descendant_hook(zoo.puppy, "greet"));
        assert_eq!(tracker.node(zoo.animal).unwrap().descendants_hooking("greet"), vec![zoo.puppy]);
        assert_eq!(tracker.node(zoo.dog).unwrap().parent(), Some(zoo.animal));
        assert_eq!(tracker.node(zoo.puppy).unwrap().hooked_members().collect::<Vec<_>>(), vec!["greet"]);
        assert_eq!(tracker.node(zoo.dog).unwrap().hooked_members().count(), 0);
        assert_eq!(tracker.len(), 3);
    }

    #[test]
    fn test_conflicts_both_directions() {
        let zoo = zoo();
        let mut tracker = ScopeTracker::new();
        tracker.register_hook(&zoo.runtime, zoo.animal, "greet").unwrap();

        let err = tracker.register_hook(&zoo.runtime, zoo.dog, "greet").unwrap_err();
        match err {
            AspectError::ConflictingHierarchyHook { existing, .. } => assert_eq!(existing, vec!["Animal"]),
            other => panic!("unexpected error: {}", other),
        }
        assert!(tracker.has_ancestor_hook(&zoo.runtime, zoo.puppy, "greet"));
        assert!(!tracker.is_hooked(zoo.dog, "greet"));

        let mut tracker = ScopeTracker::new();
        tracker.register_hook(&zoo.runtime, zoo.dog, "greet").unwrap();
        assert!(tracker.register_hook(&zoo.runtime, zoo.animal, "greet").is_err());

        // siblings and other members are unaffected
        assert!(tracker.register_hook(&zoo.runtime, zoo.cat, "greet").is_ok());
        assert!(tracker.register_hook(&zoo.runtime, zoo.animal, "sleep").is_ok());
    }

    #[test]
    fn test_rehook_same_class() {
        let zoo = zoo();
        let mut tracker = ScopeTracker::new();
        tracker.register_hook(&zoo.runtime, zoo.dog, "greet").unwrap();
        assert!(tracker.register_hook(&zoo.runtime, zoo.dog, "greet").is_ok());
    }

    #[test]
    fn test_unregister_prunes() {
        let zoo = zoo();
        let mut tracker = ScopeTracker::new();
        tracker.register_hook(&zoo.runtime, zoo.puppy, "greet").unwrap();
        tracker.register_hook(&zoo.runtime, zoo.cat, "greet").unwrap();

        tracker.unregister_hook(zoo.puppy, "greet");
        assert!(tracker.node(zoo.puppy).is_none());
        assert!(tracker.node(zoo.dog).is_none());
        assert_eq!(tracker.node(zoo.animal).unwrap().descendants_hooking("greet"), vec![zoo.cat]);

        tracker.unregister_hook(zoo.cat, "greet");
        assert!(tracker.is_empty());

        // the line is free again
        assert!(tracker.register_hook(&zoo.runtime, zoo.animal, "greet").is_ok());
    }
}
