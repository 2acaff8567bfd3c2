//! Instance wrappers
//!
//! An [`InstanceWrapper`] is the container's record of one registered
//! provider, controller or enhancer. It remembers how to build the instance,
//! its scope, the module hosting it, what it was found to depend on, and the
//! instances built so far.
//!
//! Each instance lives in an [`InstanceHost`]: a once-cell that is filled at
//! most once, so two concurrent resolutions of the same wrapper in the same
//! context share one construction.

use crate::injectable::{Class, EnhancerSubtype, Instance};
use crate::module::Module;
use crate::provider::{FactoryDependency, FactoryFn, Provider};
use crate::scope::{ContextId, Scope};
use crate::token::Token;
use crate::Result;
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::OnceCell;

// =============================================================================
// Instance host
// =============================================================================

/// Slot for one instance of a wrapper in one context.
///
/// A host is *resolved* once construction finished, even if no instance was
/// built (e.g. a request-scoped provider visited in the application-wide
/// context).
pub struct InstanceHost {
    cell: OnceCell<Option<Instance>>,
    pending: AtomicBool,
    waiting_on: Mutex<Vec<Weak<InstanceHost>>>,
}

impl InstanceHost {
    pub(crate) fn new() -> Self {
        Self {
            cell: OnceCell::new(),
            pending: AtomicBool::new(false),
            waiting_on: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn resolved(instance: Option<Instance>) -> Self {
        Self {
            cell: OnceCell::new_with(Some(instance)),
            pending: AtomicBool::new(false),
            waiting_on: Mutex::new(Vec::new()),
        }
    }

    /// The instance, if resolved and built
    #[inline]
    pub fn instance(&self) -> Option<Instance> {
        self.cell.get().cloned().flatten()
    }

    #[inline]
    pub fn is_resolved(&self) -> bool {
        self.cell.initialized()
    }

    /// `true` while a construction is in flight
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Record that the in-flight construction of this host waits for `other`
    pub(crate) fn wait_on(&self, other: &Arc<InstanceHost>) {
        self.waiting_on.lock().push(Arc::downgrade(other));
    }

    /// `true` if this host's construction waits, directly or through other
    /// pending hosts, on any of `targets`
    pub(crate) fn is_waiting_on_any(&self, targets: &[Arc<InstanceHost>]) -> bool {
        let mut seen: Vec<*const InstanceHost> = vec![self as *const _];
        let mut queue: Vec<Arc<InstanceHost>> = self.pending_waits();
        while let Some(next) = queue.pop() {
            if targets.iter().any(|target| Arc::ptr_eq(target, &next)) {
                return true;
            }
            let ptr = Arc::as_ptr(&next);
            if seen.contains(&ptr) {
                continue;
            }
            seen.push(ptr);
            queue.extend(next.pending_waits());
        }
        false
    }

    fn pending_waits(&self) -> Vec<Arc<InstanceHost>> {
        self.waiting_on
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|host| host.is_pending())
            .collect()
    }

    /// Fill the host with `build`'s output, or wait for the construction
    /// already in flight. A failed construction leaves the host unresolved.
    pub(crate) async fn get_or_build<F, Fut>(&self, build: F) -> Result<Option<Instance>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<Instance>>>,
    {
        let value = self
            .cell
            .get_or_try_init(|| async {
                self.pending.store(true, Ordering::Release);
                let _pending = PendingGuard(self);
                build().await
            })
            .await?;
        Ok(value.clone())
    }
}

struct PendingGuard<'a>(&'a InstanceHost);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.waiting_on.lock().clear();
        self.0.pending.store(false, Ordering::Release);
    }
}

impl fmt::Debug for InstanceHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceHost")
            .field("resolved", &self.is_resolved())
            .field("has_instance", &self.instance().is_some())
            .field("pending", &self.is_pending())
            .finish()
    }
}

// =============================================================================
// Wrapper
// =============================================================================

/// How a wrapper produces its instance
#[derive(Clone)]
pub(crate) enum WrapperKind {
    Class(Class),
    Value,
    Factory {
        factory: FactoryFn,
        inject: Vec<FactoryDependency>,
    },
    Alias(Token),
}

#[derive(Default)]
struct InstanceMetadata {
    dependencies: Vec<Option<Weak<InstanceWrapper>>>,
    properties: Vec<(&'static str, Weak<InstanceWrapper>)>,
    enhancers: Vec<Weak<InstanceWrapper>>,
}

/// The container's record of one provider, controller or enhancer
pub struct InstanceWrapper {
    id: u64,
    token: Token,
    name: String,
    kind: RwLock<WrapperKind>,
    scope: RwLock<Scope>,
    durable: RwLock<Option<bool>>,
    subtype: Option<EnhancerSubtype>,
    host: Weak<Module>,
    static_host: RwLock<Arc<InstanceHost>>,
    static_transient: DashMap<u64, Arc<InstanceHost>, RandomState>,
    metadata: RwLock<InstanceMetadata>,
    tree_static: RwLock<Option<bool>>,
    tree_durable: RwLock<Option<bool>>,
}

impl InstanceWrapper {
    pub(crate) fn from_provider(
        provider: &Provider,
        host: Weak<Module>,
        subtype: Option<EnhancerSubtype>,
    ) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);

        let token = provider.token().clone();
        let (kind, name, static_host) = match provider {
            Provider::Class { use_class, .. } => (
                WrapperKind::Class(*use_class),
                use_class.name().to_owned(),
                InstanceHost::new(),
            ),
            Provider::Value { use_value, .. } => (
                WrapperKind::Value,
                token.display_name(),
                InstanceHost::resolved(Some(use_value.clone())),
            ),
            Provider::Factory {
                use_factory,
                inject,
                ..
            } => (
                WrapperKind::Factory {
                    factory: use_factory.clone(),
                    inject: inject.clone(),
                },
                token.display_name(),
                InstanceHost::new(),
            ),
            Provider::Existing { use_existing, .. } => (
                WrapperKind::Alias(use_existing.clone()),
                token.display_name(),
                InstanceHost::new(),
            ),
        };

        Self {
            id: COUNTER.fetch_add(1, Ordering::Relaxed),
            token,
            name,
            kind: RwLock::new(kind),
            scope: RwLock::new(provider.scope().unwrap_or_default()),
            durable: RwLock::new(provider.is_durable()),
            subtype,
            host,
            static_host: RwLock::new(Arc::new(static_host)),
            static_transient: DashMap::with_hasher(RandomState::new()),
            metadata: RwLock::new(InstanceMetadata::default()),
            tree_static: RwLock::new(None),
            tree_durable: RwLock::new(None),
        }
    }

    /// Unique id of this wrapper
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn token(&self) -> &Token {
        &self.token
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn scope(&self) -> Scope {
        *self.scope.read()
    }

    #[inline]
    pub fn is_transient(&self) -> bool {
        self.scope() == Scope::Transient
    }

    #[inline]
    pub fn durable(&self) -> Option<bool> {
        *self.durable.read()
    }

    #[inline]
    pub fn subtype(&self) -> Option<EnhancerSubtype> {
        self.subtype
    }

    /// Module hosting this wrapper
    #[inline]
    pub fn host(&self) -> Option<Arc<Module>> {
        self.host.upgrade()
    }

    pub(crate) fn kind(&self) -> WrapperKind {
        self.kind.read().clone()
    }

    /// Class constructed by this wrapper, if any
    pub fn metatype(&self) -> Option<Class> {
        match &*self.kind.read() {
            WrapperKind::Class(class) => Some(*class),
            _ => None,
        }
    }

    pub fn is_alias(&self) -> bool {
        matches!(&*self.kind.read(), WrapperKind::Alias(_))
    }

    pub fn is_factory(&self) -> bool {
        matches!(&*self.kind.read(), WrapperKind::Factory { .. })
    }

    // -------------------------------------------------------------------------
    // Instances
    // -------------------------------------------------------------------------

    pub(crate) fn static_host(&self) -> Arc<InstanceHost> {
        self.static_host.read().clone()
    }

    /// The application-wide instance
    #[inline]
    pub fn instance(&self) -> Option<Instance> {
        self.static_host().instance()
    }

    /// `true` once the application-wide host is resolved
    #[inline]
    pub fn is_resolved(&self) -> bool {
        self.static_host().is_resolved()
    }

    /// Transient instances built in the application-wide context
    pub fn static_transient_instances(&self) -> Vec<Instance> {
        self.static_transient
            .iter()
            .filter_map(|entry| entry.value().instance())
            .collect()
    }

    /// Host for this wrapper in `context`, keyed by the consumer for transients
    pub(crate) fn instance_by_context_id(
        &self,
        context: &ContextId,
        inquirer_id: Option<u64>,
    ) -> Arc<InstanceHost> {
        if self.is_transient() {
            if let Some(inquirer) = inquirer_id {
                return if context.is_static() {
                    self.static_transient
                        .entry(inquirer)
                        .or_insert_with(|| Arc::new(InstanceHost::new()))
                        .clone()
                } else {
                    context.host(self.id, inquirer)
                };
            }
        }
        if context.is_static() || (!self.is_transient() && self.is_dependency_tree_static()) {
            return self.static_host();
        }
        context.host(self.id, 0)
    }

    /// Instance built for `context` (and `inquirer`, for transients)
    pub fn instance_for_context(
        &self,
        context: &ContextId,
        inquirer: Option<&InstanceWrapper>,
    ) -> Option<Instance> {
        self.instance_by_context_id(context, inquirer.map(InstanceWrapper::id))
            .instance()
    }

    /// Install a resolved instance for `context`
    pub(crate) fn set_instance_by_context_id(&self, context: &ContextId, instance: Instance) {
        let host = Arc::new(InstanceHost::resolved(Some(instance)));
        if context.is_static() {
            *self.static_host.write() = host;
        } else {
            context.replace_host((self.id, 0), host);
        }
    }

    /// Whether the injector should build an instance in `context`, or only
    /// settle the host without one
    pub(crate) fn should_construct(
        &self,
        context: &ContextId,
        inquirer: Option<&InstanceWrapper>,
    ) -> bool {
        if self.is_transient() {
            if !context.is_static() {
                return true;
            }
            return match inquirer {
                Some(inquirer) => {
                    self.is_dependency_tree_static() && inquirer.is_dependency_tree_static()
                }
                None => false,
            };
        }
        if context.is_static() {
            return self.is_dependency_tree_static();
        }
        true
    }

    // -------------------------------------------------------------------------
    // Dependency metadata
    // -------------------------------------------------------------------------

    pub(crate) fn add_ctor_metadata(&self, index: usize, wrapper: &Arc<InstanceWrapper>) {
        let mut metadata = self.metadata.write();
        if metadata.dependencies.len() <= index {
            metadata.dependencies.resize_with(index + 1, || None);
        }
        metadata.dependencies[index] = Some(Arc::downgrade(wrapper));
    }

    pub(crate) fn add_property_metadata(&self, key: &'static str, wrapper: &Arc<InstanceWrapper>) {
        let mut metadata = self.metadata.write();
        metadata.properties.retain(|(existing, _)| *existing != key);
        metadata.properties.push((key, Arc::downgrade(wrapper)));
    }

    pub(crate) fn add_enhancer_metadata(&self, wrapper: &Arc<InstanceWrapper>) {
        let mut metadata = self.metadata.write();
        let known = metadata
            .enhancers
            .iter()
            .any(|existing| existing.upgrade().is_some_and(|e| e.id == wrapper.id));
        if !known {
            metadata.enhancers.push(Arc::downgrade(wrapper));
        }
    }

    /// Enhancers attached to this wrapper
    pub fn enhancers(&self) -> Vec<Arc<InstanceWrapper>> {
        self.metadata
            .read()
            .enhancers
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Constructor and property dependencies resolved so far
    pub fn dependencies(&self) -> Vec<Arc<InstanceWrapper>> {
        let metadata = self.metadata.read();
        metadata
            .dependencies
            .iter()
            .flatten()
            .chain(metadata.properties.iter().map(|(_, wrapper)| wrapper))
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// `true` if neither this wrapper nor anything it depends on (including
    /// attached enhancers) is request scoped
    pub fn is_dependency_tree_static(&self) -> bool {
        if let Some(cached) = *self.tree_static.read() {
            return cached;
        }
        self.introspect_static(&mut Vec::new())
    }

    fn introspect_static(&self, lookup_registry: &mut Vec<u64>) -> bool {
        if let Some(cached) = *self.tree_static.read() {
            return cached;
        }
        if self.scope() == Scope::Request {
            *self.tree_static.write() = Some(false);
            return false;
        }
        if lookup_registry.contains(&self.id) {
            return true;
        }
        lookup_registry.push(self.id);

        let related: Vec<Arc<InstanceWrapper>> = self
            .dependencies()
            .into_iter()
            .chain(self.enhancers())
            .collect();
        let is_static = related
            .iter()
            .all(|wrapper| wrapper.introspect_static(lookup_registry));
        *self.tree_static.write() = Some(is_static);
        is_static
    }

    /// `true` if request-scoped instances of this tree may be shared through
    /// a durable context
    pub fn is_dependency_tree_durable(&self) -> bool {
        if let Some(cached) = *self.tree_durable.read() {
            return cached;
        }
        self.introspect_durable(&mut Vec::new())
    }

    fn introspect_durable(&self, lookup_registry: &mut Vec<u64>) -> bool {
        if let Some(cached) = *self.tree_durable.read() {
            return cached;
        }
        if self.scope() == Scope::Request {
            let durable = self.durable().unwrap_or(false);
            *self.tree_durable.write() = Some(durable);
            return durable;
        }
        if self.is_dependency_tree_static() {
            return false;
        }
        if lookup_registry.contains(&self.id) {
            return false;
        }
        lookup_registry.push(self.id);

        let related: Vec<Arc<InstanceWrapper>> = self
            .dependencies()
            .into_iter()
            .chain(self.enhancers())
            .collect();
        let is_non_durable = related.iter().any(|wrapper| {
            !wrapper.is_dependency_tree_static() && !wrapper.introspect_durable(lookup_registry)
        });
        *self.tree_durable.write() = Some(!is_non_durable);
        !is_non_durable
    }

    /// Replace how this wrapper builds its instance, keeping its identity
    pub(crate) fn merge_with(&self, provider: &Provider) {
        let fresh = Self::from_provider(provider, self.host.clone(), self.subtype);
        *self.kind.write() = fresh.kind.into_inner();
        *self.scope.write() = fresh.scope.into_inner();
        *self.durable.write() = fresh.durable.into_inner();
        *self.static_host.write() = fresh.static_host.into_inner();
        self.static_transient.clear();
        *self.metadata.write() = InstanceMetadata::default();
        *self.tree_static.write() = None;
        *self.tree_durable.write() = None;
    }
}

impl fmt::Debug for InstanceWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceWrapper")
            .field("id", &self.id)
            .field("token", &self.token)
            .field("scope", &self.scope())
            .field("subtype", &self.subtype)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Arguments, Injectable, InjectableDefinition};

    struct Config;
    impl Injectable for Config {
        fn construct(_: &mut Arguments) -> Result<Self> {
            Ok(Config)
        }
    }

    struct RequestState;
    impl Injectable for RequestState {
        fn define(def: &mut InjectableDefinition<Self>) {
            def.scope(Scope::Request).durable();
        }
        fn construct(_: &mut Arguments) -> Result<Self> {
            Ok(RequestState)
        }
    }

    struct Logger;
    impl Injectable for Logger {
        fn define(def: &mut InjectableDefinition<Self>) {
            def.scope(Scope::Transient);
        }
        fn construct(_: &mut Arguments) -> Result<Self> {
            Ok(Logger)
        }
    }

    fn wrapper(provider: Provider) -> Arc<InstanceWrapper> {
        Arc::new(InstanceWrapper::from_provider(&provider, Weak::new(), None))
    }

    #[test]
    fn test_value_wrapper_is_resolved() {
        let value = wrapper(Provider::value("PORT", 8080u16));
        assert!(value.is_resolved());
        assert_eq!(*value.instance().unwrap().downcast::<u16>().unwrap(), 8080);
        assert_eq!(value.scope(), Scope::Default);
    }

    #[test]
    fn test_tree_static_follows_request_dependencies() {
        let config = wrapper(Provider::class::<Config>());
        let state = wrapper(Provider::class::<RequestState>());
        let consumer = wrapper(Provider::use_class::<Config>("CONSUMER"));
        let plain = wrapper(Provider::use_class::<Config>("PLAIN"));

        consumer.add_ctor_metadata(0, &config);
        consumer.add_ctor_metadata(1, &state);
        plain.add_ctor_metadata(0, &config);

        assert!(config.is_dependency_tree_static());
        assert!(!state.is_dependency_tree_static());
        assert!(!consumer.is_dependency_tree_static());
        assert!(plain.is_dependency_tree_static());

        assert!(state.is_dependency_tree_durable());
        assert!(consumer.is_dependency_tree_durable());
        assert!(!plain.is_dependency_tree_durable());
    }

    #[test]
    fn test_enhancers_make_tree_non_static() {
        let controller = wrapper(Provider::use_class::<Config>("CONTROLLER"));
        let guard = wrapper(Provider::class::<RequestState>());
        controller.add_enhancer_metadata(&guard);
        controller.add_enhancer_metadata(&guard);
        assert_eq!(controller.enhancers().len(), 1);
        assert!(!controller.is_dependency_tree_static());
    }

    #[test]
    fn test_host_selection() {
        let ctx = ContextId::new();
        let static_ctx = ContextId::static_context();

        let config = wrapper(Provider::class::<Config>());
        assert!(Arc::ptr_eq(
            &config.instance_by_context_id(&ctx, None),
            &config.static_host()
        ));

        let state = wrapper(Provider::class::<RequestState>());
        let in_ctx = state.instance_by_context_id(&ctx, None);
        assert!(!Arc::ptr_eq(&in_ctx, &state.static_host()));
        assert!(Arc::ptr_eq(&in_ctx, &state.instance_by_context_id(&ctx, None)));

        let logger = wrapper(Provider::class::<Logger>());
        let for_a = logger.instance_by_context_id(&static_ctx, Some(1));
        let for_b = logger.instance_by_context_id(&static_ctx, Some(2));
        assert!(!Arc::ptr_eq(&for_a, &for_b));
        assert!(Arc::ptr_eq(
            &for_a,
            &logger.instance_by_context_id(&static_ctx, Some(1))
        ));
    }

    #[test]
    fn test_should_construct() {
        let ctx = ContextId::new();
        let static_ctx = ContextId::static_context();
        let config = wrapper(Provider::class::<Config>());
        let state = wrapper(Provider::class::<RequestState>());
        let logger = wrapper(Provider::class::<Logger>());

        assert!(config.should_construct(&static_ctx, None));
        assert!(!state.should_construct(&static_ctx, None));
        assert!(state.should_construct(&ctx, None));
        assert!(!logger.should_construct(&static_ctx, None));
        assert!(logger.should_construct(&static_ctx, Some(&config)));
        assert!(!logger.should_construct(&static_ctx, Some(&state)));
        assert!(logger.should_construct(&ctx, Some(&state)));
    }

    #[tokio::test]
    async fn test_host_builds_once() {
        let host = InstanceHost::new();
        let first = host
            .get_or_build(|| async { Ok(Some(Arc::new(1u8) as Instance)) })
            .await
            .unwrap();
        let second = host
            .get_or_build(|| async { Ok(Some(Arc::new(2u8) as Instance)) })
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first.unwrap(), &second.unwrap()));
        assert!(!host.is_pending());
    }

    #[tokio::test]
    async fn test_failed_build_leaves_host_unresolved() {
        let host = InstanceHost::new();
        let err = host
            .get_or_build(|| async { Err(crate::DiError::Internal("boom".into())) })
            .await;
        assert!(err.is_err());
        assert!(!host.is_resolved());
        assert!(!host.is_pending());
    }

    #[test]
    fn test_merge_with_keeps_identity() {
        let config = wrapper(Provider::class::<Config>());
        let id = config.id();
        config.merge_with(&Provider::value(Token::of::<Config>(), 5u8));
        assert_eq!(config.id(), id);
        assert!(config.is_resolved());
        assert!(config.metatype().is_none());
    }
}
