//! Name -> descriptor registry.
//!
//! The registry is an explicit object rather than ambient global state, so
//! independent registries can coexist (one per linked image, one per test).

use std::hash::Hash;

use ahash::RandomState;
use hashbrown::HashMap;

use crate::descriptor::TypeHandle;

pub type FastHashMap<K, V> = HashMap<K, V, RandomState>;

pub fn fast_hasher() -> RandomState {
    RandomState::with_seeds(0, 0, 0, 0)
}

pub fn fast_map_new<K: Eq + Hash, V>() -> FastHashMap<K, V> {
    HashMap::with_hasher(fast_hasher())
}

pub struct TypeRegistry {
    map: FastHashMap<String, TypeHandle>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            map: fast_map_new(),
        }
    }

    /// Insert under the descriptor's full name. Last write wins.
    pub fn register(&mut self, ty: TypeHandle) {
        self.map.insert(ty.full_name.clone(), ty);
    }

    pub fn get(&self, full_name: &str) -> Option<TypeHandle> {
        self.map.get(full_name).cloned()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::TypeDescriptor;

    #[test]
    fn register_then_get_by_full_name() {
        let mut reg = TypeRegistry::new();
        let dog = TypeDescriptor::builder("Tests", "Dog").build();
        reg.register(dog.clone());
        let found = reg.get("Tests.Dog").expect("registered");
        assert!(std::sync::Arc::ptr_eq(&found, &dog));
        assert!(reg.get("Tests.Cat").is_none());
    }

    #[test]
    fn last_registration_wins() {
        let mut reg = TypeRegistry::new();
        let first = TypeDescriptor::builder("Tests", "Dog").build();
        let second = TypeDescriptor::builder("Tests", "Dog").build();
        reg.register(first);
        reg.register(second.clone());
        assert_eq!(reg.len(), 1);
        let found = reg.get("Tests.Dog").expect("registered");
        assert!(std::sync::Arc::ptr_eq(&found, &second));
    }
}
