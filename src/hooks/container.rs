//! Handler chains for one hooked (scope, member) pair

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::hooks::{AspectIdentifier, Position};

/// Immutable list of handlers at one position
pub type AspectList = Arc<[Arc<AspectIdentifier>]>;

/// Tracks the before / instead / after handlers of one hooked member.
///
/// Lists are copy-on-write: a mutation swaps in a whole new list, so a dispatch keeps
/// iterating the snapshot it took even while handlers are added or removed.
pub struct AspectsContainer {
    before: RwLock<AspectList>,
    instead: RwLock<AspectList>,
    after: RwLock<AspectList>,
}

/// Point-in-time view of all three lists
#[derive(Clone)]
pub struct ContainerSnapshot {
    pub before: AspectList,
    pub instead: AspectList,
    pub after: AspectList,
}

impl ContainerSnapshot {
    pub fn handlers_for(&self, position: Position) -> &AspectList {
        match position {
            Position::Before => &self.before,
            Position::Instead => &self.instead,
            Position::After => &self.after,
        }
    }
}

impl AspectsContainer {
    pub fn new() -> Self {
        Self {
            before: RwLock::new(empty()),
            instead: RwLock::new(empty()),
            after: RwLock::new(empty()),
        }
    }

    /// Append a handler at `position`
    pub fn add(&self, aspect: Arc<AspectIdentifier>, position: Position) {
        let mut list = write(self.slot(position));
        let updated: Vec<Arc<AspectIdentifier>> = list
            .iter()
            .cloned()
            .chain(std::iter::once(aspect))
            .collect();
        *list = updated.into();
    }

    /// Remove a handler from whichever position holds it
    pub fn remove(&self, aspect: &Arc<AspectIdentifier>) -> bool {
        for position in Position::all() {
            let mut list = write(self.slot(position));
            if list.iter().any(|a| Arc::ptr_eq(a, aspect)) {
                let updated: Vec<Arc<AspectIdentifier>> = list
                    .iter()
                    .filter(|a| !Arc::ptr_eq(a, aspect))
                    .cloned()
                    .collect();
                *list = updated.into();
                return true;
            }
        }
        false
    }

    pub fn has_aspects(&self) -> bool {
        self.len() > 0
    }

    /// Total number of handlers across positions
    pub fn len(&self) -> usize {
        Position::all()
            .iter()
            .map(|position| read(self.slot(*position)).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_aspects()
    }

    pub fn handlers_for(&self, position: Position) -> AspectList {
        read(self.slot(position)).clone()
    }

    pub fn snapshot(&self) -> ContainerSnapshot {
        ContainerSnapshot {
            before: self.handlers_for(Position::Before),
            instead: self.handlers_for(Position::Instead),
            after: self.handlers_for(Position::After),
        }
    }

    fn slot(&self, position: Position) -> &RwLock<AspectList> {
        match position {
            Position::Before => &self.before,
            Position::Instead => &self.instead,
            Position::After => &self.after,
        }
    }
}

impl Default for AspectsContainer {
    fn default() -> Self {
        Self::new()
    }
}

fn empty() -> AspectList {
    Arc::from(Vec::new())
}

fn read(lock: &RwLock<AspectList>) -> RwLockReadGuard<'_, AspectList> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write(lock: &RwLock<AspectList>) -> RwLockWriteGuard<'_, AspectList> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{handler_fn, AspectOptions, ScopeRef};
    use crate::runtime::ClassId;
    use std::sync::Weak;

    fn identifier(container: &Arc<AspectsContainer>, name: &str, options: AspectOptions) -> Arc<AspectIdentifier> {
        Arc::new(AspectIdentifier::new(
            "greet",
            options,
            ScopeRef::Class(ClassId(0)),
            Arc::new(handler_fn(name, |_info| Ok(()))),
            Arc::downgrade(container),
            Weak::new(),
        ))
    }

    #[test]
    fn test_add_preserves_order() {
        let container = Arc::new(AspectsContainer::new());
        let first = identifier(&container, "first", AspectOptions::before());
        let second = identifier(&container, "second", AspectOptions::before());

        container.add(first.clone(), Position::Before);
        container.add(second.clone(), Position::Before);

        let before = container.handlers_for(Position::Before);
        let names: Vec<&str> = before.iter().map(|a| a.handler_name()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert!(Arc::ptr_eq(&before[0], &first));
        assert!(Arc::ptr_eq(&before[1], &second));
        assert!(container.handlers_for(Position::After).is_empty());
        assert_eq!(container.len(), 2);
    }

    #[test]
    fn test_remove() {
        let container = Arc::new(AspectsContainer::new());
        let aspect = identifier(&container, "only", AspectOptions::after());
        container.add(aspect.clone(), Position::After);

        assert!(container.has_aspects());
        assert!(container.remove(&aspect));
        assert!(!container.remove(&aspect));
        assert!(container.is_empty());
    }

    #[test]
    fn test_snapshot_isolated_from_mutation() {
        let container = Arc::new(AspectsContainer::new());
        let kept = identifier(&container, "kept", AspectOptions::instead());
        let added = identifier(&container, "added", AspectOptions::instead());
        container.add(kept.clone(), Position::Instead);

        let snapshot = container.snapshot();
        container.add(added, Position::Instead);
        container.remove(&kept);

        assert_eq!(snapshot.handlers_for(Position::Instead).len(), 1);
        assert!(Arc::ptr_eq(&snapshot.instead[0], &kept));
        assert_eq!(container.handlers_for(Position::Instead).len(), 1);
        assert!(!Arc::ptr_eq(&container.handlers_for(Position::Instead)[0], &kept));
    }
}
