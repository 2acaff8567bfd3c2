//! Application context
//!
//! [`ApplicationContext`] is the entry point for application code: it scans
//! the module graph rooted at one module, builds every application-wide
//! instance, and then hands out instances by token.
//!
//! # Example
//!
//! ```rust
//! use armature_di::{ApplicationContext, Arguments, Injectable, InjectableDefinition};
//! use armature_di::{ModuleClass, ModuleMetadata, Provider, Result};
//! use std::sync::Arc;
//!
//! struct Config;
//! impl Injectable for Config {
//!     fn construct(_: &mut Arguments) -> Result<Self> {
//!         Ok(Config)
//!     }
//! }
//!
//! struct Service {
//!     config: Arc<Config>,
//! }
//! impl Injectable for Service {
//!     fn define(def: &mut InjectableDefinition<Self>) {
//!         def.param::<Config>();
//!     }
//!     fn construct(args: &mut Arguments) -> Result<Self> {
//!         Ok(Service { config: args.next()? })
//!     }
//! }
//!
//! struct AppModule;
//! impl ModuleClass for AppModule {
//!     fn metadata(module: &mut ModuleMetadata) {
//!         module
//!             .provider(Provider::class::<Config>())
//!             .provider(Provider::class::<Service>());
//!     }
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let app = ApplicationContext::create::<AppModule>().await?;
//! let service = app.get::<Service>()?;
//! assert!(Arc::ptr_eq(&service.config, &app.get::<Config>()?));
//! # Ok::<(), armature_di::DiError>(())
//! # }).unwrap();
//! ```

use crate::config::ApplicationConfig;
use crate::container::Container;
use crate::hooks::{LifecyclePhase, call_module_hook};
use crate::injectable::{Class, Instance, downcast_instance};
use crate::injector::Injector;
use crate::instance_loader::InstanceLoader;
use crate::logging::{Logger, log_event};
use crate::module::{Module, ModuleClass, ModuleReference};
use crate::provider::Provider;
use crate::resolver::{GetOptions, IntrospectionResult, get_instances, resolve_instances};
use crate::scanner::{DependenciesScanner, ModuleOverride};
use crate::scope::{ContextId, ContextIdFactory, ContextIdStrategy};
use crate::token::Token;
use crate::{DiError, Result};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

// =============================================================================
// Builder
// =============================================================================

/// Options for bootstrapping an [`ApplicationContext`]
pub struct ApplicationContextBuilder {
    root: ModuleReference,
    logger: Logger,
    module_overrides: Vec<ModuleOverride>,
    provider_overrides: Vec<Provider>,
    context_id_strategy: Option<Arc<dyn ContextIdStrategy>>,
}

impl ApplicationContextBuilder {
    fn new(root: ModuleReference) -> Self {
        Self {
            root,
            logger: Logger::disabled(),
            module_overrides: Vec::new(),
            provider_overrides: Vec::new(),
            context_id_strategy: None,
        }
    }

    /// Emit bootstrap and resolution events through `logger`
    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Register `replacement` wherever `module` is imported
    pub fn override_module(
        mut self,
        module: impl Into<ModuleReference>,
        replacement: impl Into<ModuleReference>,
    ) -> Self {
        self.module_overrides
            .push(ModuleOverride::new(module, replacement));
        self
    }

    /// Replace the provider registered under `provider`'s token, in every
    /// module, before anything is instantiated
    pub fn override_provider(mut self, provider: Provider) -> Self {
        self.provider_overrides.push(provider);
        self
    }

    /// Strategy attaching a resolver to every context created by
    /// [`ApplicationContext::context_id_for_request`]
    pub fn context_id_strategy(mut self, strategy: impl ContextIdStrategy + 'static) -> Self {
        self.context_id_strategy = Some(Arc::new(strategy));
        self
    }

    /// Scan the module graph and build every application-wide instance
    pub async fn build(self) -> Result<ApplicationContext> {
        let started = Instant::now();
        log_event!(self.logger, info, "Starting application context");

        let config = Arc::new(ApplicationConfig::new());
        let container = Container::new(config, self.logger.clone());
        let scanner = DependenciesScanner::new(container.clone(), self.logger.clone());
        scanner.scan(&self.root, &self.module_overrides).await?;

        for provider in &self.provider_overrides {
            container.replace(provider.token(), provider)?;
            container.replace_injectable(provider.token(), provider)?;
        }

        let injector = Arc::new(Injector::new(self.logger.clone()));
        InstanceLoader::new(container.clone(), injector.clone(), self.logger.clone())
            .create_instances_of_dependencies()
            .await?;
        scanner.apply_application_providers();
        container.lock();

        log_event!(
            self.logger,
            info,
            modules = container.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Application context initialized"
        );

        Ok(ApplicationContext {
            container,
            injector,
            context_module: None,
            context_ids: ContextIdFactory::new(self.context_id_strategy, self.logger.clone()),
            initialized: Arc::new(AtomicBool::new(false)),
            closed: Arc::new(AtomicBool::new(false)),
            logger: self.logger,
        })
    }
}

impl fmt::Debug for ApplicationContextBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationContextBuilder")
            .field("logger", &self.logger)
            .field("module_overrides", &self.module_overrides)
            .field("provider_overrides", &self.provider_overrides.len())
            .field("context_id_strategy", &self.context_id_strategy.is_some())
            .finish()
    }
}

// =============================================================================
// Application context
// =============================================================================

/// A bootstrapped module graph.
///
/// Cloning is cheap; clones share the container. A context returned by
/// [`select`](Self::select) is bound to one module: its lookups are strict
/// unless [`GetOptions`] say otherwise.
#[derive(Clone)]
pub struct ApplicationContext {
    container: Arc<Container>,
    injector: Arc<Injector>,
    context_module: Option<Arc<Module>>,
    context_ids: ContextIdFactory,
    initialized: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    logger: Logger,
}

impl ApplicationContext {
    /// Options for bootstrapping the graph rooted at `root`
    pub fn builder(root: impl Into<ModuleReference>) -> ApplicationContextBuilder {
        ApplicationContextBuilder::new(root.into())
    }

    /// Bootstrap the graph rooted at `M` with default options
    pub async fn create<M: ModuleClass>() -> Result<Self> {
        Self::builder(ModuleReference::of::<M>()).build().await
    }

    // =========================================================================
    // Module selection
    // =========================================================================

    /// A context bound to the module `class` was registered as
    pub fn select(&self, class: Class) -> Result<Self> {
        let module = self
            .container
            .get_module_by_class(class)
            .ok_or_else(|| DiError::UnknownModule {
                module: class.name().to_owned(),
            })?;
        Ok(Self {
            context_module: Some(module),
            ..self.clone()
        })
    }

    /// Shorthand for [`select`](Self::select) with a module type
    pub fn select_module<M: ModuleClass>(&self) -> Result<Self> {
        self.select(Class::module::<M>())
    }

    /// The module this context is bound to, if any
    pub fn context_module(&self) -> Option<&Arc<Module>> {
        self.context_module.as_ref()
    }

    fn default_options(&self) -> GetOptions {
        GetOptions {
            strict: self.context_module.is_some(),
            each: false,
        }
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// The application-wide instance of `T`.
    ///
    /// Fails with [`DiError::InvalidClassScope`] for request and transient
    /// scoped providers; use [`resolve`](Self::resolve) for those.
    pub fn get<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        let token = Token::of::<T>();
        let instance = self.get_token(&token, self.default_options())?;
        downcast_instance(instance, token)
    }

    /// The application-wide instance registered under `token`; the last one
    /// if several modules provide it
    pub fn get_token(&self, token: &Token, options: GetOptions) -> Result<Instance> {
        self.get_all(token, options)?
            .pop()
            .ok_or_else(|| DiError::unknown_element(token.display_name()))
    }

    pub fn get_all(&self, token: &Token, options: GetOptions) -> Result<Vec<Instance>> {
        get_instances(
            self.container.instance_links(),
            token,
            self.context_module.as_deref(),
            options,
        )
    }

    /// Resolve `T` in `context`, or in a fresh context if none is given
    pub async fn resolve<T: Send + Sync + 'static>(&self, context: Option<ContextId>) -> Result<Arc<T>> {
        let token = Token::of::<T>();
        let instance = self
            .resolve_token(&token, context, self.default_options())
            .await?;
        downcast_instance(instance, token)
    }

    pub async fn resolve_token(
        &self,
        token: &Token,
        context: Option<ContextId>,
        options: GetOptions,
    ) -> Result<Instance> {
        self.resolve_all(token, context, options)
            .await?
            .pop()
            .ok_or_else(|| DiError::unknown_element(token.display_name()))
    }

    pub async fn resolve_all(
        &self,
        token: &Token,
        context: Option<ContextId>,
        options: GetOptions,
    ) -> Result<Vec<Instance>> {
        let context = context.unwrap_or_else(|| self.context_ids.create());
        log_event!(
            self.logger,
            trace,
            token = %token,
            context = context.id(),
            "Resolving"
        );
        resolve_instances(
            self.container.instance_links(),
            &self.injector,
            token,
            self.context_module.as_deref(),
            &context,
            options,
        )
        .await
    }

    /// Scope of the provider registered under `token`
    pub fn introspect(&self, token: &Token) -> Result<IntrospectionResult> {
        let link = self.container.instance_links().get(token, None)?;
        Ok(IntrospectionResult {
            scope: link.wrapper.scope(),
        })
    }

    // =========================================================================
    // Contexts
    // =========================================================================

    /// A fresh context with no request attached
    pub fn create_context_id(&self) -> ContextId {
        self.context_ids.create()
    }

    /// A fresh context carrying `request`, with the configured strategy's
    /// resolver attached
    pub fn context_id_for_request(&self, request: Instance) -> ContextId {
        self.context_ids.get_by_request(request)
    }

    /// Attach `request` to `context`; providers injecting
    /// [`REQUEST`](crate::REQUEST) receive it
    pub fn register_request_by_context_id(&self, request: Instance, context: &ContextId) {
        context.set_payload(request);
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    pub fn modules(&self) -> Vec<Arc<Module>> {
        self.container.get_modules()
    }

    pub fn application_config(&self) -> &Arc<ApplicationConfig> {
        self.container.application_config()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Run `on_module_init` then `on_application_bootstrap` hooks, deepest
    /// modules first. Runs once; later calls return immediately.
    pub async fn init(&self) -> Result<()> {
        if self.initialized.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let modules = self.modules_by_distance(true);
        for phase in [LifecyclePhase::ModuleInit, LifecyclePhase::ApplicationBootstrap] {
            for module in &modules {
                call_module_hook(module, phase, None).await?;
            }
        }
        log_event!(self.logger, info, "Application context started");
        Ok(())
    }

    /// Run `on_module_destroy`, `before_application_shutdown` and
    /// `on_application_shutdown` hooks, root module first. Runs once.
    pub async fn close(&self, signal: Option<&str>) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let modules = self.modules_by_distance(false);
        for module in &modules {
            call_module_hook(module, LifecyclePhase::ModuleDestroy, None).await?;
        }
        for phase in [
            LifecyclePhase::BeforeApplicationShutdown,
            LifecyclePhase::ApplicationShutdown,
        ] {
            for module in &modules {
                call_module_hook(module, phase, signal).await?;
            }
        }
        log_event!(self.logger, info, signal = signal, "Application context closed");
        Ok(())
    }

    fn modules_by_distance(&self, descending: bool) -> Vec<Arc<Module>> {
        let mut modules = self.container.get_modules();
        if descending {
            modules.sort_by_key(|module| std::cmp::Reverse(module.distance()));
        } else {
            modules.sort_by_key(|module| module.distance());
        }
        modules
    }
}

impl fmt::Debug for ApplicationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationContext")
            .field("modules", &self.container.len())
            .field(
                "context_module",
                &self.context_module.as_ref().map(|module| module.name()),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{OnApplicationShutdown, OnModuleInit};
    use crate::{Arguments, Injectable, InjectableDefinition, ModuleMetadata, Scope};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    static EVENTS: Mutex<Vec<String>> = Mutex::new(Vec::new());

    struct Storage;
    impl Injectable for Storage {
        fn define(def: &mut InjectableDefinition<Self>) {
            def.on_module_init().on_application_shutdown();
        }
        fn construct(_: &mut Arguments) -> Result<Self> {
            Ok(Storage)
        }
    }

    #[async_trait]
    impl OnModuleInit for Storage {
        async fn on_module_init(&self) -> Result<()> {
            EVENTS.lock().push("storage:init".to_owned());
            Ok(())
        }
    }

    #[async_trait]
    impl OnApplicationShutdown for Storage {
        async fn on_application_shutdown(&self, signal: Option<String>) -> Result<()> {
            EVENTS
                .lock()
                .push(format!("storage:shutdown:{}", signal.unwrap_or_default()));
            Ok(())
        }
    }

    struct Api;
    impl Injectable for Api {
        fn define(def: &mut InjectableDefinition<Self>) {
            def.param::<Storage>().on_module_init().on_application_shutdown();
        }
        fn construct(_: &mut Arguments) -> Result<Self> {
            Ok(Api)
        }
    }

    #[async_trait]
    impl OnModuleInit for Api {
        async fn on_module_init(&self) -> Result<()> {
            EVENTS.lock().push("api:init".to_owned());
            Ok(())
        }
    }

    #[async_trait]
    impl OnApplicationShutdown for Api {
        async fn on_application_shutdown(&self, signal: Option<String>) -> Result<()> {
            EVENTS
                .lock()
                .push(format!("api:shutdown:{}", signal.unwrap_or_default()));
            Ok(())
        }
    }

    struct RequestLog;
    impl Injectable for RequestLog {
        fn define(def: &mut InjectableDefinition<Self>) {
            def.scope(Scope::Request);
        }
        fn construct(_: &mut Arguments) -> Result<Self> {
            Ok(RequestLog)
        }
    }

    struct StorageModule;
    impl ModuleClass for StorageModule {
        fn metadata(module: &mut ModuleMetadata) {
            module
                .provider(Provider::class::<Storage>())
                .export(Token::of::<Storage>());
        }
    }

    struct ApiModule;
    impl ModuleClass for ApiModule {
        fn metadata(module: &mut ModuleMetadata) {
            module
                .import(ModuleReference::of::<StorageModule>())
                .provider(Provider::class::<Api>())
                .provider(Provider::class::<RequestLog>());
        }
    }

    struct UnusedModule;
    impl ModuleClass for UnusedModule {
        fn metadata(_: &mut ModuleMetadata) {}
    }

    #[tokio::test]
    async fn test_hooks_follow_module_distance() {
        let app = ApplicationContext::create::<ApiModule>().await.unwrap();
        app.init().await.unwrap();
        app.init().await.unwrap();
        app.close(Some("SIGTERM")).await.unwrap();

        let events = EVENTS.lock().clone();
        assert_eq!(
            events,
            [
                "storage:init",
                "api:init",
                "api:shutdown:SIGTERM",
                "storage:shutdown:SIGTERM",
            ]
        );
    }

    #[tokio::test]
    async fn test_select_binds_lookups_to_module() {
        let app = ApplicationContext::create::<ApiModule>().await.unwrap();

        let storage = app.select_module::<StorageModule>().unwrap();
        assert!(storage.get::<Storage>().is_ok());
        assert!(matches!(
            storage.get::<Api>(),
            Err(DiError::UnknownElement { .. })
        ));
        assert!(storage
            .get_token(&Token::of::<Api>(), GetOptions::default())
            .is_ok());

        assert!(matches!(
            app.select_module::<UnusedModule>(),
            Err(DiError::UnknownModule { .. })
        ));
    }

    #[tokio::test]
    async fn test_request_scoped_needs_resolve() {
        let app = ApplicationContext::create::<ApiModule>().await.unwrap();
        assert!(matches!(
            app.get::<RequestLog>(),
            Err(DiError::InvalidClassScope { .. })
        ));
        assert_eq!(
            app.introspect(&Token::of::<RequestLog>()).unwrap().scope,
            Scope::Request
        );

        let context = app.create_context_id();
        let first = app.resolve::<RequestLog>(Some(context.clone())).await.unwrap();
        let again = app.resolve::<RequestLog>(Some(context)).await.unwrap();
        let other = app.resolve::<RequestLog>(None).await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[tokio::test]
    async fn test_provider_override_before_instantiation() {
        let app = ApplicationContext::builder(ModuleReference::of::<StorageModule>())
            .override_provider(Provider::value(Token::of::<Storage>(), 7u32))
            .build()
            .await
            .unwrap();
        let value = app
            .get_token(&Token::of::<Storage>(), GetOptions::default())
            .unwrap();
        assert_eq!(*downcast_instance::<u32>(value, Token::of::<Storage>()).unwrap(), 7);
        assert!(app.container().is_locked());
    }
}
