//! Type-keyed state bag.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StateKey {
    type_id: TypeId,
    name: Option<String>,
}

impl StateKey {
    fn of<T: 'static>(name: Option<&str>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: name.map(str::to_string),
        }
    }
}

struct Entry {
    type_name: &'static str,
    value: Box<dyn Any + Send>,
}

/// Values stored by type, with an optional string key per type.
#[derive(Default)]
pub struct LocalState {
    entries: HashMap<StateKey, Entry>,
}

impl LocalState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T: Any + Send>(&self) -> Option<&T> {
        self.lookup(StateKey::of::<T>(None))
    }

    pub fn get_keyed<T: Any + Send>(&self, key: &str) -> Option<&T> {
        self.lookup(StateKey::of::<T>(Some(key)))
    }

    /// Store `value`, returning the previous value of the same type.
    pub fn put<T: Any + Send>(&mut self, value: T) -> Option<T> {
        self.store(StateKey::of::<T>(None), value)
    }

    pub fn put_keyed<T: Any + Send>(&mut self, key: &str, value: T) -> Option<T> {
        self.store(StateKey::of::<T>(Some(key)), value)
    }

    pub fn remove<T: Any + Send>(&mut self) -> Option<T> {
        self.take(StateKey::of::<T>(None))
    }

    pub fn remove_keyed<T: Any + Send>(&mut self, key: &str) -> Option<T> {
        self.take(StateKey::of::<T>(Some(key)))
    }

    /// The stored value of type `T`, inserting `init()` first if absent.
    pub fn get_or_insert_with<T: Any + Send>(&mut self, init: impl FnOnce() -> T) -> &mut T {
        let entry = self
            .entries
            .entry(StateKey::of::<T>(None))
            .or_insert_with(|| Entry {
                type_name: type_name::<T>(),
                value: Box::new(init()),
            });
        // The key's TypeId guarantees the stored type.
        match entry.value.downcast_mut::<T>() {
            Some(value) => value,
            None => unreachable!("state entry stored under the wrong type"),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Type names of the stored values, for diagnostics.
    pub fn type_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.values().map(|e| e.type_name).collect();
        names.sort_unstable();
        names
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn lookup<T: Any + Send>(&self, key: StateKey) -> Option<&T> {
        self.entries.get(&key)?.value.downcast_ref::<T>()
    }

    fn store<T: Any + Send>(&mut self, key: StateKey, value: T) -> Option<T> {
        let previous = self.entries.insert(
            key,
            Entry {
                type_name: type_name::<T>(),
                value: Box::new(value),
            },
        )?;
        previous.value.downcast::<T>().ok().map(|boxed| *boxed)
    }

    fn take<T: Any + Send>(&mut self, key: StateKey) -> Option<T> {
        let entry = self.entries.remove(&key)?;
        entry.value.downcast::<T>().ok().map(|boxed| *boxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Tenant(&'static str);

    #[test]
    fn test_put_get_remove() {
        let mut state = LocalState::new();
        assert!(state.put(Tenant("acme")).is_none());
        assert_eq!(state.get::<Tenant>(), Some(&Tenant("acme")));

        let previous = state.put(Tenant("globex"));
        assert_eq!(previous, Some(Tenant("acme")));

        assert_eq!(state.remove::<Tenant>(), Some(Tenant("globex")));
        assert!(state.is_empty());
    }

    #[test]
    fn test_keyed_entries_are_separate() {
        let mut state = LocalState::new();
        state.put(1u8);
        state.put_keyed("retries", 3u8);

        assert_eq!(state.get::<u8>(), Some(&1));
        assert_eq!(state.get_keyed::<u8>("retries"), Some(&3));
        assert_eq!(state.get_keyed::<u8>("other"), None);
        assert_eq!(state.remove_keyed::<u8>("retries"), Some(3));
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_get_or_insert_with_initializes_once() {
        let mut state = LocalState::new();
        *state.get_or_insert_with(|| 0usize) += 1;
        *state.get_or_insert_with(|| 100usize) += 1;

        assert_eq!(state.get::<usize>(), Some(&2));
        assert_eq!(state.type_names(), vec!["usize"]);
    }
}
