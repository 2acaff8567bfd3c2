//! The injector
//!
//! Resolves constructor parameters, property dependencies, factory inputs
//! and aliases for one [`InstanceWrapper`], recursively, then builds and
//! stores the instance in the host selected by the wrapper's scope and the
//! context id.
//!
//! Dependencies are looked up in the consuming module's own providers first,
//! then in the providers exported by its imports (following re-exported
//! modules). Global modules are reachable because they are linked into every
//! module's imports at scan time.

use crate::injectable::{Class, Dependency, Instance, PropertyDependency};
use crate::logging::{Logger, log_event};
use crate::module::Module;
use crate::provider::{FactoryDependency, Provider};
use crate::scope::{ContextId, HostComponentInfo};
use crate::token::{INQUIRER, REQUEST, Token};
use crate::wrapper::{InstanceHost, InstanceWrapper, WrapperKind};
use crate::{Arguments, DiError, Result};
use futures::FutureExt;
use futures::future::{BoxFuture, try_join_all};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// What a provider receives when it injects the [`INQUIRER`] token: the
/// class that asked for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InquirerInfo {
    pub token: Token,
    pub name: String,
}

impl InquirerInfo {
    fn of(wrapper: &InstanceWrapper) -> Self {
        Self {
            token: wrapper.token().clone(),
            name: wrapper.name().to_owned(),
        }
    }
}

/// One wrapper being resolved
#[derive(Clone)]
struct PathEntry {
    id: u64,
    name: String,
    host: Arc<InstanceHost>,
    /// Key of the transient instances built for this entry
    inquirer_key: u64,
}

/// Wrappers currently being resolved by one resolution chain, with the
/// hosts their instances are built into
#[derive(Clone, Default)]
struct ResolutionPath(Vec<PathEntry>);

impl ResolutionPath {
    fn contains(&self, id: u64) -> bool {
        self.0.iter().any(|entry| entry.id == id)
    }

    fn last_host(&self) -> Option<&Arc<InstanceHost>> {
        self.0.last().map(|entry| &entry.host)
    }

    fn inquirer_key(&self) -> Option<u64> {
        self.0.last().map(|entry| entry.inquirer_key)
    }

    fn hosts(&self) -> Vec<Arc<InstanceHost>> {
        self.0.iter().map(|entry| entry.host.clone()).collect()
    }

    fn with(&self, wrapper: &InstanceWrapper, host: Arc<InstanceHost>) -> Self {
        self.with_key(wrapper, host, wrapper.id())
    }

    fn with_key(
        &self,
        wrapper: &InstanceWrapper,
        host: Arc<InstanceHost>,
        inquirer_key: u64,
    ) -> Self {
        let mut path = self.0.clone();
        path.push(PathEntry {
            id: wrapper.id(),
            name: wrapper.name().to_owned(),
            host,
            inquirer_key,
        });
        Self(path)
    }

    fn circular(&self, name: &str) -> DiError {
        DiError::circular(
            self.0
                .iter()
                .map(|entry| entry.name.as_str())
                .chain(std::iter::once(name)),
        )
    }
}

/// Inquirer key for a build outside any registered host. Disjoint from
/// wrapper ids, so its transient dependencies get hosts of their own.
fn detached_key(wrapper: &InstanceWrapper, context: &ContextId) -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(1 << 63);

    if context.is_static() {
        return wrapper.id();
    }
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// One parameter to resolve
struct Param<'a> {
    dependency: &'a Dependency,
    optional: bool,
    slot: Slot,
}

#[derive(Clone, Copy)]
enum Slot {
    Index(usize),
    Property(&'static str),
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "index [{index}]"),
            Self::Property(key) => write!(f, "property [{key}]"),
        }
    }
}

/// Builds instances and satisfies their dependencies
pub struct Injector {
    logger: Logger,
}

impl Injector {
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }

    // =========================================================================
    // Entry points
    // =========================================================================

    /// Resolve `wrapper` in `context`, building it (and its dependencies) if
    /// its host is not resolved yet. Returns the instance of the host, which
    /// is `None` when the wrapper is not constructed in this context.
    pub fn load_instance(
        &self,
        wrapper: Arc<InstanceWrapper>,
        module: Arc<Module>,
        context: ContextId,
        inquirer: Option<Arc<InstanceWrapper>>,
    ) -> BoxFuture<'_, Result<Option<Instance>>> {
        self.load(wrapper, module, context, inquirer, ResolutionPath::default())
    }

    /// Resolve `wrapper` for a caller outside the graph. Transient wrappers
    /// yield a new instance on every call. Enhancers attached to the wrapper
    /// are loaded in the same context.
    pub async fn load_per_context(
        &self,
        wrapper: Arc<InstanceWrapper>,
        module: Arc<Module>,
        context: ContextId,
    ) -> Result<Option<Instance>> {
        let instance = if wrapper.is_transient() {
            let context = self.effective_context(&wrapper, context.clone());
            let module = wrapper.host().unwrap_or(module);
            let host = Arc::new(InstanceHost::new());
            let key = detached_key(&wrapper, &context);
            let path = ResolutionPath::default().with_key(&wrapper, host.clone(), key);
            host.get_or_build(|| self.instantiate(&wrapper, &module, &context, None, &path, true))
                .await?
        } else {
            self.load(
                wrapper.clone(),
                module,
                context.clone(),
                None,
                ResolutionPath::default(),
            )
            .await?
        };
        self.load_enhancers_per_context(&wrapper, &context).await?;
        Ok(instance)
    }

    /// Load every enhancer attached to `wrapper` in `context`
    pub async fn load_enhancers_per_context(
        &self,
        wrapper: &Arc<InstanceWrapper>,
        context: &ContextId,
    ) -> Result<()> {
        let loads = wrapper.enhancers().into_iter().filter_map(|enhancer| {
            let module = enhancer.host()?;
            Some(self.load(
                enhancer,
                module,
                context.clone(),
                Some(wrapper.clone()),
                ResolutionPath::default(),
            ))
        });
        try_join_all(loads).await?;
        Ok(())
    }

    /// Build `provider` against `module` without registering it anywhere
    pub async fn instantiate_detached(
        &self,
        provider: &Provider,
        module: &Arc<Module>,
        context: ContextId,
    ) -> Result<Option<Instance>> {
        let wrapper = Arc::new(InstanceWrapper::from_provider(
            provider,
            Arc::downgrade(module),
            None,
        ));
        self.link(&wrapper, module);
        let host = Arc::new(InstanceHost::new());
        let key = detached_key(&wrapper, &context);
        let path = ResolutionPath::default().with_key(&wrapper, host.clone(), key);
        host.get_or_build(|| self.instantiate(&wrapper, module, &context, None, &path, true))
            .await
    }

    /// Record the wrappers `wrapper` depends on without resolving them, so
    /// dependency tree introspection is complete before anything is built
    pub fn link(&self, wrapper: &Arc<InstanceWrapper>, module: &Arc<Module>) {
        let record = |slot: Slot, dependency: &Dependency| {
            let Some(token) = dependency.token() else {
                return;
            };
            if token.is_name(INQUIRER) {
                return;
            }
            if let Some((found, _)) = self.lookup_component(&token, wrapper, module) {
                match slot {
                    Slot::Index(index) => wrapper.add_ctor_metadata(index, &found),
                    Slot::Property(key) => wrapper.add_property_metadata(key, &found),
                }
            }
        };

        match wrapper.kind() {
            WrapperKind::Class(class) => {
                for (index, dependency) in class.constructor_dependencies().iter().enumerate() {
                    record(Slot::Index(index), dependency);
                }
                for property in class.property_dependencies().iter() {
                    record(Slot::Property(property.key), &property.dependency);
                }
            }
            WrapperKind::Factory { inject, .. } => {
                for (index, input) in inject.iter().enumerate() {
                    record(Slot::Index(index), &input.dependency);
                }
            }
            WrapperKind::Alias(target) => record(Slot::Index(0), &Dependency::Token(target)),
            WrapperKind::Value => {}
        }
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    fn load(
        &self,
        wrapper: Arc<InstanceWrapper>,
        module: Arc<Module>,
        context: ContextId,
        inquirer: Option<Arc<InstanceWrapper>>,
        path: ResolutionPath,
    ) -> BoxFuture<'_, Result<Option<Instance>>> {
        async move {
            let context = self.effective_context(&wrapper, context);
            let inquirer_key = inquirer
                .as_ref()
                .map(|inquirer| path.inquirer_key().unwrap_or_else(|| inquirer.id()));
            let host = wrapper.instance_by_context_id(&context, inquirer_key);
            if host.is_resolved() {
                return Ok(host.instance());
            }
            if path.contains(wrapper.id()) {
                return Err(path.circular(wrapper.name()));
            }
            // another chain is building this host; waiting is only safe if
            // that chain does not (transitively) wait on this one
            if let Some(requester) = path.last_host() {
                requester.wait_on(&host);
            }
            if host.is_pending() && host.is_waiting_on_any(&path.hosts()) {
                return Err(path.circular(wrapper.name()));
            }

            let module = wrapper.host().unwrap_or(module);
            let path = path.with(&wrapper, host.clone());
            host.get_or_build(|| {
                self.instantiate(&wrapper, &module, &context, inquirer.as_ref(), &path, false)
            })
            .await
        }
        .boxed()
    }

    /// The context `wrapper` lives in: a durable subtree may be redirected by
    /// the resolver attached to `context`
    fn effective_context(&self, wrapper: &InstanceWrapper, context: ContextId) -> ContextId {
        if context.is_static() {
            return context;
        }
        let Some(resolver) = context.resolver() else {
            return context;
        };
        let info = HostComponentInfo {
            token: wrapper.token().clone(),
            is_tree_durable: wrapper.is_dependency_tree_durable(),
        };
        resolver.resolve(&info).unwrap_or(context)
    }

    #[allow(clippy::too_many_arguments)]
    async fn instantiate(
        &self,
        wrapper: &Arc<InstanceWrapper>,
        module: &Arc<Module>,
        context: &ContextId,
        inquirer: Option<&Arc<InstanceWrapper>>,
        path: &ResolutionPath,
        force: bool,
    ) -> Result<Option<Instance>> {
        log_event!(
            self.logger,
            trace,
            token = %wrapper.token(),
            module = module.name(),
            context = context.id(),
            "Resolving instance"
        );

        let construct = |context: &ContextId| {
            force || wrapper.should_construct(context, inquirer.map(|inquirer| &**inquirer))
        };

        let instance = match wrapper.kind() {
            WrapperKind::Value => return Ok(wrapper.instance()),
            WrapperKind::Class(class) => {
                let dependencies = class.constructor_dependencies();
                let optional = class.optional_dependencies();
                let params: Vec<Param<'_>> = dependencies
                    .iter()
                    .enumerate()
                    .map(|(index, dependency)| Param {
                        dependency,
                        optional: optional.contains(&index),
                        slot: Slot::Index(index),
                    })
                    .collect();
                let values = self
                    .resolve_params(wrapper, module, context, inquirer, path, &params)
                    .await?;
                let properties = self
                    .resolve_properties(wrapper, module, context, inquirer, path, class)
                    .await?;
                if !construct(context) {
                    return Ok(None);
                }
                let constructor = class.constructor().ok_or_else(|| {
                    DiError::creation_failed(wrapper.name(), "class has no registered constructor")
                })?;
                (constructor.build)(Arguments::new(wrapper.name(), values), properties)?
            }
            WrapperKind::Factory { factory, inject } => {
                if wrapper.token().is_name(REQUEST) {
                    if let Some(payload) = context.payload() {
                        return Ok(Some(payload.clone()));
                    }
                }
                let params = factory_params(&inject);
                let values = self
                    .resolve_params(wrapper, module, context, inquirer, path, &params)
                    .await?;
                if !construct(context) {
                    return Ok(None);
                }
                factory(Arguments::new(wrapper.name(), values)).await?
            }
            WrapperKind::Alias(target) => {
                let dependency = Dependency::Token(target);
                let params = [Param {
                    dependency: &dependency,
                    optional: false,
                    slot: Slot::Index(0),
                }];
                let mut values = self
                    .resolve_params(wrapper, module, context, inquirer, path, &params)
                    .await?;
                if !construct(context) {
                    return Ok(None);
                }
                match values.pop().flatten() {
                    Some(instance) => instance,
                    None => return Err(DiError::unknown_element(wrapper.token())),
                }
            }
        };

        log_event!(
            self.logger,
            debug,
            token = %wrapper.token(),
            scope = %wrapper.scope(),
            context = context.id(),
            "Instance created"
        );
        Ok(Some(instance))
    }

    #[allow(clippy::too_many_arguments)]
    async fn resolve_params(
        &self,
        wrapper: &Arc<InstanceWrapper>,
        module: &Arc<Module>,
        context: &ContextId,
        inquirer: Option<&Arc<InstanceWrapper>>,
        path: &ResolutionPath,
        params: &[Param<'_>],
    ) -> Result<Vec<Option<Instance>>> {
        let resolutions = params.iter().map(|param| {
            self.resolve_single_param(wrapper, module, context, inquirer, path, param, params)
        });
        try_join_all(resolutions).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn resolve_properties(
        &self,
        wrapper: &Arc<InstanceWrapper>,
        module: &Arc<Module>,
        context: &ContextId,
        inquirer: Option<&Arc<InstanceWrapper>>,
        path: &ResolutionPath,
        class: Class,
    ) -> Result<Vec<(&'static str, Option<Instance>)>> {
        let properties = class.property_dependencies();
        let params: Vec<Param<'_>> = properties
            .iter()
            .map(|PropertyDependency { key, dependency, optional }| Param {
                dependency,
                optional: *optional,
                slot: Slot::Property(*key),
            })
            .collect();
        let values = self
            .resolve_params(wrapper, module, context, inquirer, path, &params)
            .await?;
        Ok(properties
            .iter()
            .map(|property| property.key)
            .zip(values)
            .collect())
    }

    #[allow(clippy::too_many_arguments)]
    async fn resolve_single_param(
        &self,
        wrapper: &Arc<InstanceWrapper>,
        module: &Arc<Module>,
        context: &ContextId,
        inquirer: Option<&Arc<InstanceWrapper>>,
        path: &ResolutionPath,
        param: &Param<'_>,
        signature: &[Param<'_>],
    ) -> Result<Option<Instance>> {
        let Some(token) = param.dependency.token() else {
            return Err(unknown_dependencies(wrapper, module, param, signature));
        };
        if token.is_name(INQUIRER) {
            return Ok(inquirer.map(|inquirer| Arc::new(InquirerInfo::of(inquirer)) as Instance));
        }

        let Some((dependency, dependency_module)) = self.lookup_component(&token, wrapper, module)
        else {
            if param.optional {
                return Ok(None);
            }
            return Err(unknown_dependencies(wrapper, module, param, signature));
        };

        match param.slot {
            Slot::Index(index) => wrapper.add_ctor_metadata(index, &dependency),
            Slot::Property(key) => wrapper.add_property_metadata(key, &dependency),
        }
        self.load(
            dependency,
            dependency_module,
            context.clone(),
            Some(wrapper.clone()),
            path.clone(),
        )
        .await
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Find the wrapper providing `token` to `wrapper` from `module`, along
    /// with the module hosting it
    pub fn lookup_component(
        &self,
        token: &Token,
        wrapper: &InstanceWrapper,
        module: &Arc<Module>,
    ) -> Option<(Arc<InstanceWrapper>, Arc<Module>)> {
        if token == wrapper.token() {
            return None;
        }
        if let Some(found) = module.get_provider_by_key(token) {
            return Some((found, module.clone()));
        }
        let mut registry = vec![module.id()];
        self.lookup_in_imports(module, token, &mut registry, false)
    }

    fn lookup_in_imports(
        &self,
        module: &Arc<Module>,
        token: &Token,
        registry: &mut Vec<u64>,
        traversing: bool,
    ) -> Option<(Arc<InstanceWrapper>, Arc<Module>)> {
        let mut children = module.imports();
        if traversing {
            children.retain(|child| module.has_export(&child.metatype().token()));
        }

        for related in children {
            if registry.contains(&related.id()) {
                continue;
            }
            registry.push(related.id());

            log_event!(
                self.logger,
                trace,
                token = %token,
                module = related.name(),
                "Looking for provider in imported module"
            );

            if !related.has_export(token) || !related.has_provider(token) {
                if let Some(found) = self.lookup_in_imports(&related, token, registry, true) {
                    return Some(found);
                }
                continue;
            }
            return related
                .get_provider_by_key(token)
                .map(|found| (found, related.clone()));
        }
        None
    }
}

impl fmt::Debug for Injector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Injector")
            .field("logger", &self.logger)
            .finish()
    }
}

fn factory_params(inject: &[FactoryDependency]) -> Vec<Param<'_>> {
    inject
        .iter()
        .enumerate()
        .map(|(index, input)| Param {
            dependency: &input.dependency,
            optional: input.optional,
            slot: Slot::Index(index),
        })
        .collect()
}

fn unknown_dependencies(
    wrapper: &InstanceWrapper,
    module: &Module,
    failed: &Param<'_>,
    signature: &[Param<'_>],
) -> DiError {
    let signature = match failed.slot {
        Slot::Index(failed_index) => signature
            .iter()
            .enumerate()
            .map(|(index, param)| {
                if index == failed_index {
                    "?".to_owned()
                } else {
                    param.dependency.describe()
                }
            })
            .collect::<Vec<_>>()
            .join(", "),
        Slot::Property(_) => "?".to_owned(),
    };
    DiError::UnknownDependencies {
        target: wrapper.name().to_owned(),
        signature,
        dependency: failed.dependency.describe(),
        position: failed.slot.to_string(),
        module: module.name().to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Injectable, InjectableDefinition, ModuleClass, ModuleMetadata, Scope};
    use std::sync::Weak;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TestModule;
    impl ModuleClass for TestModule {
        fn metadata(_: &mut ModuleMetadata) {}
    }

    struct SharedModule;
    impl ModuleClass for SharedModule {
        fn metadata(_: &mut ModuleMetadata) {}
    }

    fn module<M: ModuleClass>() -> Arc<Module> {
        let class = Class::module::<M>();
        Module::new(class.type_name().to_owned(), class, Weak::new(), Logger::disabled())
    }

    struct Database;
    impl Injectable for Database {
        fn construct(_: &mut Arguments) -> Result<Self> {
            Ok(Database)
        }
    }

    struct Repository {
        db: Arc<Database>,
    }
    impl Injectable for Repository {
        fn define(def: &mut InjectableDefinition<Self>) {
            def.param::<Database>();
        }
        fn construct(args: &mut Arguments) -> Result<Self> {
            Ok(Repository { db: args.next()? })
        }
    }

    static POOL_BUILDS: AtomicUsize = AtomicUsize::new(0);

    struct Pool;
    impl Injectable for Pool {
        fn construct(_: &mut Arguments) -> Result<Self> {
            POOL_BUILDS.fetch_add(1, Ordering::SeqCst);
            Ok(Pool)
        }
    }

    struct Client {
        pool: Arc<Pool>,
    }
    impl Injectable for Client {
        fn define(def: &mut InjectableDefinition<Self>) {
            def.param::<Pool>();
        }
        fn construct(args: &mut Arguments) -> Result<Self> {
            Ok(Client { pool: args.next()? })
        }
    }

    struct Cyclic;
    impl Injectable for Cyclic {
        fn define(def: &mut InjectableDefinition<Self>) {
            def.param_token("OTHER");
        }
        fn construct(_: &mut Arguments) -> Result<Self> {
            Ok(Cyclic)
        }
    }

    struct Other;
    impl Injectable for Other {
        fn define(def: &mut InjectableDefinition<Self>) {
            def.param::<Cyclic>();
        }
        fn construct(_: &mut Arguments) -> Result<Self> {
            Ok(Other)
        }
    }

    struct Consumer {
        missing: Option<Arc<String>>,
    }
    impl Injectable for Consumer {
        fn define(def: &mut InjectableDefinition<Self>) {
            def.param_token("MISSING").optional(0);
        }
        fn construct(args: &mut Arguments) -> Result<Self> {
            Ok(Consumer {
                missing: args.next_optional()?,
            })
        }
    }

    struct Broken;
    impl Injectable for Broken {
        fn define(def: &mut InjectableDefinition<Self>) {
            def.param::<Database>().param_token("MISSING");
        }
        fn construct(_: &mut Arguments) -> Result<Self> {
            Ok(Broken)
        }
    }

    struct Tracker;
    impl Injectable for Tracker {
        fn define(def: &mut InjectableDefinition<Self>) {
            def.scope(Scope::Transient).param_token(INQUIRER);
        }
        fn construct(args: &mut Arguments) -> Result<Self> {
            let inquirer = args.next_optional::<InquirerInfo>()?;
            assert!(inquirer.is_none() || inquirer.is_some_and(|i| i.name == "Host"));
            Ok(Tracker)
        }
    }

    struct Host {
        tracker: Arc<Tracker>,
    }
    impl Injectable for Host {
        fn define(def: &mut InjectableDefinition<Self>) {
            def.param::<Tracker>();
        }
        fn construct(args: &mut Arguments) -> Result<Self> {
            Ok(Host {
                tracker: args.next()?,
            })
        }
    }

    async fn load(injector: &Injector, module: &Arc<Module>, token: Token) -> Result<Option<Instance>> {
        let wrapper = module.get_provider_by_key(&token).unwrap();
        injector
            .load_instance(wrapper, module.clone(), ContextId::static_context(), None)
            .await
    }

    #[tokio::test]
    async fn test_resolves_constructor_dependencies_once() {
        let module = module::<TestModule>();
        module.add_provider(Provider::class::<Pool>(), None);
        module.add_provider(Provider::class::<Client>(), None);
        let injector = Injector::new(Logger::disabled());

        let client = load(&injector, &module, Token::of::<Client>())
            .await
            .unwrap()
            .unwrap();
        let pool = load(&injector, &module, Token::of::<Pool>())
            .await
            .unwrap()
            .unwrap();

        let client = client.downcast::<Client>().unwrap();
        let pool = pool.downcast::<Pool>().unwrap();
        assert!(Arc::ptr_eq(&client.pool, &pool));
        assert_eq!(POOL_BUILDS.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_detects_cycles() {
        let module = module::<TestModule>();
        module.add_provider(Provider::class::<Cyclic>(), None);
        module.add_provider(Provider::use_class::<Other>("OTHER"), None);
        let injector = Injector::new(Logger::disabled());

        let err = load(&injector, &module, Token::of::<Cyclic>())
            .await
            .unwrap_err();
        assert!(matches!(err, DiError::CircularDependency { .. }), "{err}");

        // a failed resolution leaves nothing half-built behind
        let wrapper = module.get_provider_by_key(&Token::of::<Cyclic>()).unwrap();
        assert!(!wrapper.is_resolved());
    }

    #[tokio::test]
    async fn test_unknown_dependency_names_position() {
        let module = module::<TestModule>();
        module.add_provider(Provider::class::<Database>(), None);
        module.add_provider(Provider::class::<Broken>(), None);
        let injector = Injector::new(Logger::disabled());

        let err = load(&injector, &module, Token::of::<Broken>())
            .await
            .unwrap_err();
        match err {
            DiError::UnknownDependencies {
                target,
                signature,
                dependency,
                position,
                module,
            } => {
                assert_eq!(target, "Broken");
                assert_eq!(signature, "Database, ?");
                assert_eq!(dependency, "MISSING");
                assert_eq!(position, "index [1]");
                assert_eq!(module, "TestModule");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_optional_dependency_missing() {
        let module = module::<TestModule>();
        module.add_provider(Provider::class::<Consumer>(), None);
        let injector = Injector::new(Logger::disabled());

        let consumer = load(&injector, &module, Token::of::<Consumer>())
            .await
            .unwrap()
            .unwrap()
            .downcast::<Consumer>()
            .unwrap();
        assert!(consumer.missing.is_none());
    }

    #[tokio::test]
    async fn test_lookup_follows_exports_only() {
        let app = module::<TestModule>();
        let shared = module::<SharedModule>();
        shared.add_provider(Provider::class::<Database>(), None);
        shared.add_provider(Provider::value("SECRET", 1u8), None);
        shared
            .add_exported_provider_or_module(&Token::of::<Database>().into())
            .unwrap();
        app.add_import(&shared);
        app.add_provider(Provider::class::<Repository>(), None);

        let injector = Injector::new(Logger::disabled());
        let repo = app.get_provider_by_key(&Token::of::<Repository>()).unwrap();
        let (found, host) = injector
            .lookup_component(&Token::of::<Database>(), &repo, &app)
            .unwrap();
        assert_eq!(found.token(), &Token::of::<Database>());
        assert_eq!(host.id(), shared.id());
        assert!(injector
            .lookup_component(&Token::from("SECRET"), &repo, &app)
            .is_none());

        assert!(load(&injector, &app, Token::of::<Repository>()).await.is_ok());
    }

    #[tokio::test]
    async fn test_transient_keyed_by_inquirer() {
        let module = module::<TestModule>();
        module.add_provider(Provider::class::<Tracker>(), None);
        module.add_provider(Provider::class::<Host>(), None);
        module.add_provider(Provider::use_class::<Host>("SECOND_HOST"), None);
        let injector = Injector::new(Logger::disabled());

        let first = load(&injector, &module, Token::of::<Host>())
            .await
            .unwrap()
            .unwrap()
            .downcast::<Host>()
            .unwrap();
        let second = load(&injector, &module, Token::from("SECOND_HOST"))
            .await
            .unwrap()
            .unwrap()
            .downcast::<Host>()
            .unwrap();
        assert!(!Arc::ptr_eq(&first.tracker, &second.tracker));

        let tracker = module.get_provider_by_key(&Token::of::<Tracker>()).unwrap();
        assert_eq!(tracker.static_transient_instances().len(), 2);
        assert!(tracker.instance().is_none());
    }

    #[tokio::test]
    async fn test_alias_shares_target_instance() {
        let module = module::<TestModule>();
        module.add_provider(Provider::class::<Database>(), None);
        module.add_provider(Provider::existing("DB", Token::of::<Database>()), None);
        let injector = Injector::new(Logger::disabled());

        let alias = load(&injector, &module, Token::from("DB")).await.unwrap().unwrap();
        let target = load(&injector, &module, Token::of::<Database>())
            .await
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&alias, &target));
    }

    #[tokio::test]
    async fn test_factory_receives_inputs() {
        let module = module::<TestModule>();
        module.add_provider(Provider::value("PORT", 8080u16), None);
        module.add_provider(
            Provider::factory(
                "URL",
                [FactoryDependency::required("PORT"), FactoryDependency::optional("HOST")],
                |mut args| async move {
                    let port = args.next::<u16>()?;
                    let host = args.next_optional::<String>()?;
                    Ok(format!("{}:{port}", host.as_deref().map_or("localhost", |h| h.as_str())))
                },
            ),
            None,
        );
        let injector = Injector::new(Logger::disabled());

        let url = load(&injector, &module, Token::from("URL"))
            .await
            .unwrap()
            .unwrap()
            .downcast::<String>()
            .unwrap();
        assert_eq!(url.as_str(), "localhost:8080");
    }
}
