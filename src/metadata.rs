//! Class metadata store
//!
//! A process-wide map from `(class, key)` to an arbitrary value. Class
//! declarations (see [`Injectable::define`](crate::Injectable::define) and
//! [`ModuleClass::metadata`](crate::ModuleClass::metadata)) write to it the
//! first time the class is referenced; the scanner and the injector read it.
//!
//! Uses DashMap for lock-free concurrent access.

use ahash::RandomState;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::any::{Any, TypeId};
use std::sync::Arc;

/// Well-known metadata keys
pub mod keys {
    /// Constructor parameter tokens, in declaration order
    pub const PARAMTYPES: &str = "design:paramtypes";
    /// Explicit parameter token overrides by index
    pub const SELF_DECLARED_DEPS: &str = "self:paramtypes";
    /// Indices of optional constructor parameters
    pub const OPTIONAL_DEPS: &str = "optional:paramtypes";
    /// Property dependencies
    pub const PROPERTY_DEPS: &str = "self:properties_metadata";
    /// Declared scope and durability
    pub const SCOPE_OPTIONS: &str = "scope:options";
    pub const INJECTABLE_WATERMARK: &str = "__injectable__";
    pub const CONTROLLER_WATERMARK: &str = "__controller__";
    pub const CATCH_WATERMARK: &str = "__catch__";
    pub const ENTRY_PROVIDER_WATERMARK: &str = "__entryProvider__";
    pub const MODULE_WATERMARK: &str = "__module__";
    pub const GUARDS: &str = "__guards__";
    pub const INTERCEPTORS: &str = "__interceptors__";
    pub const EXCEPTION_FILTERS: &str = "__exceptionFilters__";
    pub const PIPES: &str = "__pipes__";
    /// Per-method enhancer declarations
    pub const METHODS: &str = "__methods__";
    /// Module imports, providers, controllers and exports
    pub const MODULE_METADATA: &str = "__module:metadata__";
    pub(crate) const CONSTRUCTOR: &str = "__constructor__";
    pub(crate) const LIFECYCLE_HOOKS: &str = "__lifecycle__";
    pub(crate) const DEFINED: &str = "__defined__";
}

type Entry = Arc<dyn Any + Send + Sync>;

/// Thread-safe `(class, key) -> value` store
pub struct MetadataStore {
    entries: DashMap<(TypeId, &'static str), Entry, RandomState>,
}

static GLOBAL: Lazy<MetadataStore> = Lazy::new(MetadataStore::new);

impl MetadataStore {
    /// Create an empty store
    #[inline]
    pub fn new() -> Self {
        Self {
            entries: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// The process-wide store used by class declarations
    #[inline]
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Attach `value` under `key` to `target`, replacing any previous value
    #[inline]
    pub fn define<V: Any + Send + Sync>(&self, target: TypeId, key: &'static str, value: V) {
        self.entries.insert((target, key), Arc::new(value));
    }

    /// Attach an already type-erased value; it reads back as its concrete type
    #[inline]
    pub(crate) fn define_erased(&self, target: TypeId, key: &'static str, value: Entry) {
        self.entries.insert((target, key), value);
    }

    /// Read a value, `None` if absent or of a different type
    #[inline]
    pub fn get<V: Any + Send + Sync>(&self, target: TypeId, key: &'static str) -> Option<Arc<V>> {
        let entry = self.entries.get(&(target, key))?.value().clone();
        entry.downcast::<V>().ok()
    }

    /// `true` if `key` is set on `target`
    #[inline]
    pub fn has(&self, target: TypeId, key: &'static str) -> bool {
        self.entries.contains_key(&(target, key))
    }

    /// Remove a value
    #[inline]
    pub fn remove(&self, target: TypeId, key: &'static str) -> bool {
        self.entries.remove(&(target, key)).is_some()
    }

    /// All keys set on `target`
    pub fn keys(&self, target: TypeId) -> Vec<&'static str> {
        self.entries
            .iter()
            .filter(|entry| entry.key().0 == target)
            .map(|entry| entry.key().1)
            .collect()
    }
}

impl Default for MetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore")
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// Read-only view over class metadata, registered as a provider in every
/// application so enhancers can inspect custom metadata
#[derive(Debug, Clone, Copy, Default)]
pub struct Reflector;

impl Reflector {
    /// Metadata stored under `key` on `class`
    #[inline]
    pub fn get<V: Any + Send + Sync>(&self, class: crate::Class, key: &'static str) -> Option<Arc<V>> {
        MetadataStore::global().get(class.id(), key)
    }

    /// First of `classes` (e.g. handler class then controller class) that has `key`
    pub fn get_all_and_override<V: Any + Send + Sync>(
        &self,
        key: &'static str,
        classes: &[crate::Class],
    ) -> Option<Arc<V>> {
        classes.iter().find_map(|class| self.get(*class, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Target;
    struct Other;

    #[test]
    fn test_define_and_get() {
        let store = MetadataStore::new();
        let id = TypeId::of::<Target>();
        store.define(id, "roles", vec!["admin".to_string()]);

        let roles = store.get::<Vec<String>>(id, "roles").unwrap();
        assert_eq!(roles.as_slice(), ["admin".to_string()]);
        assert!(store.get::<u32>(id, "roles").is_none());
        assert!(store.get::<Vec<String>>(TypeId::of::<Other>(), "roles").is_none());
    }

    #[test]
    fn test_keys_and_remove() {
        let store = MetadataStore::new();
        let id = TypeId::of::<Target>();
        store.define(id, keys::GUARDS, ());
        store.define(id, keys::PIPES, ());

        let mut found = store.keys(id);
        found.sort_unstable();
        assert_eq!(found, vec![keys::GUARDS, keys::PIPES]);

        assert!(store.remove(id, keys::GUARDS));
        assert!(!store.has(id, keys::GUARDS));
        assert!(!store.remove(id, keys::GUARDS));
    }
}
