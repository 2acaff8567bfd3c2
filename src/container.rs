//! Module registry
//!
//! The `Container` owns every [`Module`] of an application, keyed by the
//! module's structural token and kept in insertion order: the internal core
//! module first, then the root module, then everything the scanner reached.
//! After bootstrap the container is locked and further registrations fail
//! with [`DiError::Locked`].

use crate::compiler::{CompiledModule, ModuleCompiler};
use crate::config::ApplicationConfig;
use crate::injectable::{Class, EnhancerSubtype, Instance};
use crate::logging::{Logger, log_event};
use crate::metadata::Reflector;
use crate::module::{DynamicModule, Export, Module, ModuleClass, ModuleMetadata, ModuleReference};
use crate::provider::Provider;
use crate::resolver::InstanceLinksHost;
use crate::scope::Scope;
use crate::token::{REQUEST, Token};
use crate::wrapper::InstanceWrapper;
use crate::{DiError, Result};
use ahash::RandomState;
use dashmap::DashMap;
use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Result of [`Container::add_module`]
#[derive(Debug, Clone)]
pub struct ModuleInsertion {
    pub module: Arc<Module>,
    /// `false` if a module with the same token was already registered
    pub inserted: bool,
}

/// Registry of every module of one application
pub struct Container {
    this: Weak<Container>,
    modules: RwLock<IndexMap<String, Arc<Module>, RandomState>>,
    global_modules: RwLock<IndexMap<u64, Arc<Module>, RandomState>>,
    dynamic_metadata: DashMap<String, ModuleMetadata, RandomState>,
    compiler: ModuleCompiler,
    internal_core: OnceCell<Arc<Module>>,
    application_config: Arc<ApplicationConfig>,
    instance_links: OnceCell<InstanceLinksHost>,
    logger: Logger,
    locked: AtomicBool,
}

impl Container {
    /// Create an empty registry
    pub fn new(application_config: Arc<ApplicationConfig>, logger: Logger) -> Arc<Self> {
        log_event!(logger, debug, "Creating module container");

        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            modules: RwLock::new(IndexMap::with_hasher(RandomState::new())),
            global_modules: RwLock::new(IndexMap::with_hasher(RandomState::new())),
            dynamic_metadata: DashMap::with_hasher(RandomState::new()),
            compiler: ModuleCompiler::new(),
            internal_core: OnceCell::new(),
            application_config,
            instance_links: OnceCell::new(),
            logger,
            locked: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn compiler(&self) -> &ModuleCompiler {
        &self.compiler
    }

    #[inline]
    pub fn application_config(&self) -> &Arc<ApplicationConfig> {
        &self.application_config
    }

    #[inline]
    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    // =========================================================================
    // Modules
    // =========================================================================

    /// Register the module `reference` denotes, unless one with the same token
    /// is already registered
    pub async fn add_module(&self, reference: &ModuleReference, scope: &[Class]) -> Result<ModuleInsertion> {
        self.check_not_locked()?;
        let compiled = self.compiler.compile(reference, scope).await?;
        if let Some(module) = self.modules.read().get(&compiled.token) {
            return Ok(ModuleInsertion {
                module: module.clone(),
                inserted: false,
            });
        }
        Ok(self.set_module(compiled, None))
    }

    /// Register `new_module` under the token of `old_module`.
    ///
    /// An already registered module keeps its identity and takes the
    /// replacement's class and declarations.
    pub async fn replace_module(
        &self,
        old_module: &ModuleReference,
        new_module: &ModuleReference,
        scope: &[Class],
    ) -> Result<ModuleInsertion> {
        self.check_not_locked()?;
        let old = self.compiler.compile(old_module, scope).await?;
        let new = self.compiler.compile(new_module, scope).await?;

        log_event!(
            self.logger,
            debug,
            module = old.metatype.name(),
            replacement = new.metatype.name(),
            "Replacing module"
        );

        let existing = self.modules.read().get(&old.token).cloned();
        match existing {
            Some(module) => {
                module.reset_metatype(new.metatype);
                match new.dynamic {
                    Some(metadata) => {
                        self.dynamic_metadata.insert(old.token.clone(), metadata);
                    }
                    None => {
                        self.dynamic_metadata.remove(&old.token);
                    }
                }
                Ok(ModuleInsertion {
                    module,
                    inserted: false,
                })
            }
            None => Ok(self.set_module(new, Some(old.token))),
        }
    }

    fn set_module(&self, compiled: CompiledModule, token_override: Option<String>) -> ModuleInsertion {
        let CompiledModule {
            metatype,
            dynamic,
            token,
        } = compiled;
        let token = token_override.unwrap_or(token);

        let mut modules = self.modules.write();
        if let Some(module) = modules.get(&token) {
            return ModuleInsertion {
                module: module.clone(),
                inserted: false,
            };
        }

        let module = Module::new(token.clone(), metatype, self.this.clone(), self.logger.clone());
        let is_global = metatype.module_metadata().global
            || dynamic.as_ref().is_some_and(|metadata| metadata.global);
        if let Some(metadata) = dynamic {
            self.dynamic_metadata.insert(token.clone(), metadata);
        }
        if is_global {
            module.set_global();
            self.global_modules.write().insert(module.id(), module.clone());
        }
        modules.insert(token, module.clone());

        log_event!(
            self.logger,
            debug,
            module = metatype.name(),
            global = is_global,
            "Module registered"
        );

        ModuleInsertion {
            module,
            inserted: true,
        }
    }

    /// Modules in registration order
    pub fn get_modules(&self) -> Vec<Arc<Module>> {
        self.modules.read().values().cloned().collect()
    }

    pub fn get_module_by_key(&self, token: &str) -> Option<Arc<Module>> {
        self.modules.read().get(token).cloned()
    }

    /// First registered module whose class is `class`
    pub fn get_module_by_class(&self, class: Class) -> Option<Arc<Module>> {
        self.modules
            .read()
            .values()
            .find(|module| module.metatype() == class)
            .cloned()
    }

    /// Declarations supplied at the import site of a dynamic module
    pub fn get_dynamic_metadata_by_token(&self, token: &str) -> Option<ModuleMetadata> {
        self.dynamic_metadata
            .get(token)
            .map(|metadata| metadata.clone())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.modules.read().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.modules.read().is_empty()
    }

    // =========================================================================
    // Module contents
    // =========================================================================

    fn module(&self, token: &str) -> Result<Arc<Module>> {
        self.get_module_by_key(token)
            .ok_or_else(|| DiError::UnknownModule {
                module: token.to_owned(),
            })
    }

    pub fn add_provider(&self, provider: Provider, token: &str) -> Result<Token> {
        self.add_enhancer_provider(provider, token, None)
    }

    /// Register a provider that also acts as an application-level enhancer
    pub fn add_enhancer_provider(
        &self,
        provider: Provider,
        token: &str,
        subtype: Option<EnhancerSubtype>,
    ) -> Result<Token> {
        self.check_not_locked()?;
        let module = self.module(token)?;
        let key = module.add_provider(provider, subtype);
        log_event!(
            self.logger,
            trace,
            module = module.name(),
            token = %key,
            "Provider registered"
        );
        Ok(key)
    }

    pub fn add_injectable(
        &self,
        injectable: Provider,
        token: &str,
        subtype: EnhancerSubtype,
        host: Option<Class>,
    ) -> Result<Arc<InstanceWrapper>> {
        self.check_not_locked()?;
        Ok(self.module(token)?.add_injectable(injectable, subtype, host))
    }

    pub fn add_controller(&self, controller: Class, token: &str) -> Result<()> {
        self.check_not_locked()?;
        self.module(token)?.add_controller(controller);
        Ok(())
    }

    /// Link the module `related` denotes into the imports of module `token`
    pub async fn add_import(&self, related: &ModuleReference, token: &str, scope: &[Class]) -> Result<()> {
        self.check_not_locked()?;
        let module = self.module(token)?;
        let compiled = self.compiler.compile(related, scope).await?;
        if let Some(related) = self.get_module_by_key(&compiled.token) {
            log_event!(
                self.logger,
                trace,
                module = module.name(),
                import = related.name(),
                "Import linked"
            );
            module.add_import(&related);
        }
        Ok(())
    }

    pub fn add_exported_provider_or_module(&self, export: &Export, token: &str) -> Result<()> {
        self.check_not_locked()?;
        let module = self.module(token)?;
        module.add_exported_provider_or_module(export)?;
        log_event!(
            self.logger,
            trace,
            module = module.name(),
            export = %export.0,
            "Export registered"
        );
        Ok(())
    }

    /// Override the provider registered under `token` in every module
    pub fn replace(&self, token: &Token, provider: &Provider) -> Result<()> {
        self.check_not_locked()?;
        log_event!(self.logger, debug, token = %token, "Replacing provider");
        for module in self.get_modules() {
            module.replace(token, provider, true);
        }
        Ok(())
    }

    /// Override an enhancer registered under `token` in every module
    pub fn replace_injectable(&self, token: &Token, provider: &Provider) -> Result<()> {
        self.check_not_locked()?;
        for module in self.get_modules() {
            module.replace(token, provider, false);
        }
        Ok(())
    }

    // =========================================================================
    // Global modules
    // =========================================================================

    /// Link every global module into every other module
    pub fn bind_global_scope(&self) {
        for module in self.get_modules() {
            self.bind_globals_to_imports(&module);
        }
    }

    pub fn bind_globals_to_imports(&self, module: &Arc<Module>) {
        let globals: Vec<Arc<Module>> = self.global_modules.read().values().cloned().collect();
        for global in globals {
            self.bind_global_module_to_module(module, &global);
        }
    }

    fn bind_global_module_to_module(&self, target: &Arc<Module>, global: &Arc<Module>) {
        if target.id() == global.id() {
            return;
        }
        if self
            .internal_core
            .get()
            .is_some_and(|core| core.id() == target.id())
        {
            return;
        }
        target.add_import(global);
    }

    pub fn global_modules(&self) -> Vec<Arc<Module>> {
        self.global_modules.read().values().cloned().collect()
    }

    pub(crate) fn register_core_module_ref(&self, module: Arc<Module>) {
        self.global_modules.write().insert(module.id(), module.clone());
        let _ = self.internal_core.set(module);
    }

    /// The module providing container services to every other module
    pub fn internal_core_module(&self) -> Option<&Arc<Module>> {
        self.internal_core.get()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Lock the container to prevent further registrations
    pub fn lock(&self) {
        self.locked.store(true, Ordering::Release);
        log_event!(
            self.logger,
            debug,
            modules = self.len(),
            "Container locked - no further registrations allowed"
        );
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    #[inline]
    fn check_not_locked(&self) -> Result<()> {
        if self.is_locked() {
            return Err(DiError::Locked);
        }
        Ok(())
    }

    /// Index of every provider, controller and enhancer token, built on
    /// first use
    pub fn instance_links(&self) -> &InstanceLinksHost {
        self.instance_links
            .get_or_init(|| InstanceLinksHost::new(&self.get_modules()))
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("modules", &self.len())
            .field("global_modules", &self.global_modules.read().len())
            .field("locked", &self.is_locked())
            .finish()
    }
}

// =============================================================================
// Container services
// =============================================================================

/// Read-only view of the module registry, injectable from any module
#[derive(Clone)]
pub struct ModulesContainer {
    container: Weak<Container>,
}

impl ModulesContainer {
    pub(crate) fn new(container: Weak<Container>) -> Self {
        Self { container }
    }

    /// Modules in registration order
    pub fn modules(&self) -> Vec<Arc<Module>> {
        self.container
            .upgrade()
            .map(|container| container.get_modules())
            .unwrap_or_default()
    }

    pub fn get(&self, token: &str) -> Option<Arc<Module>> {
        self.container
            .upgrade()
            .and_then(|container| container.get_module_by_key(token))
    }
}

impl fmt::Debug for ModulesContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModulesContainer")
            .field("modules", &self.modules().len())
            .finish()
    }
}

/// Global module registered ahead of the root module
pub struct InternalCoreModule;

impl ModuleClass for InternalCoreModule {
    fn metadata(_: &mut ModuleMetadata) {}
}

impl InternalCoreModule {
    /// The core module's declarations for one container
    pub(crate) fn register(container: &Arc<Container>) -> DynamicModule {
        let config: Instance = container.application_config().clone();
        let request = Provider::factory(REQUEST, [], |_| async {
            Err::<(), _>(DiError::creation_failed(
                REQUEST,
                "no request is registered for this context id",
            ))
        })
        .with_scope(Scope::Request);

        DynamicModule::new::<InternalCoreModule>()
            .provider(Provider::value(Token::of::<Reflector>(), Reflector))
            .provider(Provider::instance(Token::of::<ApplicationConfig>(), config))
            .provider(Provider::value(
                Token::of::<ModulesContainer>(),
                ModulesContainer::new(Arc::downgrade(container)),
            ))
            .provider(request)
            .export(Token::of::<Reflector>())
            .export(Token::of::<ApplicationConfig>())
            .export(Token::of::<ModulesContainer>())
            .export(REQUEST)
            .global()
    }
}
